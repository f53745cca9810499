//! Trackable registry: the authoritative view of one trackable kind
//!
//! A registry maps each live [`StableId`] to the latest payload reported for
//! it. Batches are applied in a fixed order (removed, then added, then
//! updated) so that an id removed and re-added within one batch is a
//! replacement rather than an update of stale data.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::id::StableId;
use crate::trackable::{Trackable, TrackableKind};

/// A live entry in the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntry<T> {
    pub id: StableId,
    pub payload: T,
    /// Cycle in which the entry was created
    pub created_cycle: u64,
    /// Cycle in which the payload was last replaced
    pub modified_cycle: u64,
}

/// Outcome of applying one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Entries created (including replacements and overwritten duplicates)
    pub added: Vec<StableId>,
    /// Entries whose payload was replaced by an update
    pub updated: Vec<StableId>,
    /// Entries evicted
    pub removed: Vec<StableId>,
    /// Ids removed and re-added within the same batch
    pub replaced: Vec<StableId>,
    /// Additions for ids that were already live
    pub duplicate_adds: usize,
    /// Updates for ids that were not live
    pub stale_updates: usize,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Registry of live trackables of a single kind
#[derive(Debug, Clone)]
pub struct TrackableRegistry<T: Trackable> {
    entries: HashMap<StableId, RegistryEntry<T>>,
}

impl<T: Trackable> Default for TrackableRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Trackable> TrackableRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn kind(&self) -> TrackableKind {
        T::KIND
    }

    /// Apply one batch of changes observed in `cycle`.
    ///
    /// Never fails: protocol violations are logged and degraded to an
    /// overwrite (duplicate add) or a no-op (update for unknown id).
    pub fn apply(
        &mut self,
        cycle: u64,
        added: Vec<(StableId, T)>,
        updated: Vec<(StableId, T)>,
        removed: &[StableId],
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut evicted = HashSet::new();

        for &id in removed {
            if self.entries.remove(&id).is_some() {
                evicted.insert(id);
                report.removed.push(id);
            } else {
                debug!(kind = %T::KIND, id = %id, "Removal for id not in registry");
            }
        }

        for (id, payload) in added {
            if evicted.contains(&id) {
                debug!(kind = %T::KIND, id = %id, "Id removed and re-added in one batch, replacing");
                report.replaced.push(id);
            } else if self.entries.contains_key(&id) {
                warn!(kind = %T::KIND, id = %id, "Addition for id already in registry, overwriting");
                report.duplicate_adds += 1;
            }
            self.entries.insert(
                id,
                RegistryEntry {
                    id,
                    payload,
                    created_cycle: cycle,
                    modified_cycle: cycle,
                },
            );
            report.added.push(id);
        }

        for (id, payload) in updated {
            match self.entries.get_mut(&id) {
                Some(entry) => {
                    entry.payload = payload;
                    entry.modified_cycle = cycle;
                    report.updated.push(id);
                }
                None => {
                    debug!(kind = %T::KIND, id = %id, "Update for id not in registry, ignoring");
                    report.stale_updates += 1;
                }
            }
        }

        report
    }

    /// Latest payload for a live id
    pub fn get(&self, id: StableId) -> Option<&T> {
        self.entries.get(&id).map(|e| &e.payload)
    }

    /// Full entry for a live id
    pub fn entry(&self, id: StableId) -> Option<&RegistryEntry<T>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: StableId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Iterate over all live entries. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (StableId, &T)> {
        self.entries.iter().map(|(id, e)| (*id, &e.payload))
    }

    /// Snapshot of all live entries, ordered by id
    pub fn all(&self) -> Vec<&RegistryEntry<T>> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn ids(&self) -> Vec<StableId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, returning the evicted ids
    pub fn clear(&mut self) -> Vec<StableId> {
        let mut ids: Vec<_> = self.entries.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}
