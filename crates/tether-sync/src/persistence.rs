//! Anchor persistence engine
//!
//! Maps session-scoped [`StableId`]s to [`DurableId`]s that survive across
//! sessions, and tracks the persistence state of each mapping. Records live
//! in an index-keyed arena with two lookup maps on top of it. Every request
//! the provider answers asynchronously is observed by polling
//! ([`AnchorPersistence::state`]) or by watching anchor batches
//! ([`AnchorPersistence::observe`]).

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tether_core::{
    AnchorPayload, ApplyReport, DurableId, PersistKey, PersistState, StableId, TrackableRegistry,
};
use tether_provider::{AnchorProvider, ProviderError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("Anchor persistence is disabled")]
    Disabled,
    #[error("Anchor {0} is not live in this session")]
    NotLive(StableId),
    #[error("Unknown anchor {0}")]
    Unknown(PersistKey),
    #[error("Provider rejected {operation}: {source}")]
    Rejected {
        operation: &'static str,
        #[source]
        source: ProviderError,
    },
}

/// One stable/durable mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistenceRecord {
    /// Live anchor currently holding the durable id, if any
    pub stable_id: Option<StableId>,
    pub durable_id: DurableId,
    /// Never [`PersistState::NotRequested`]: such anchors have no record
    pub state: PersistState,
}

#[derive(Debug, Default)]
pub struct AnchorPersistence {
    slots: Vec<Option<PersistenceRecord>>,
    free: Vec<usize>,
    by_durable: HashMap<DurableId, usize>,
    by_stable: HashMap<StableId, usize>,
    pending_loads: HashSet<DurableId>,
}

impl AnchorPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled<P: AnchorProvider + ?Sized>(&mut self, provider: &mut P, enabled: bool) -> bool {
        let accepted = provider.set_persistence_enabled(enabled);
        if accepted {
            info!(enabled, "Anchor persistence toggled");
        } else {
            warn!(enabled, "Provider refused to toggle anchor persistence");
        }
        accepted
    }

    /// Start persisting a live anchor.
    ///
    /// Returns the durable id immediately; the write completes later.
    /// Persisting an anchor that already has a durable id returns that id.
    pub fn persist<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        registry: &TrackableRegistry<AnchorPayload>,
        stable: StableId,
    ) -> Result<DurableId, PersistenceError> {
        if !provider.persistence_enabled() {
            return Err(PersistenceError::Disabled);
        }
        if !registry.contains(stable) {
            return Err(PersistenceError::NotLive(stable));
        }
        if let Some(record) = self.by_stable.get(&stable).and_then(|&i| self.slot(i)) {
            return Ok(record.durable_id);
        }

        let durable = provider.persist(stable).map_err(|e| match e {
            ProviderError::PersistenceDisabled => PersistenceError::Disabled,
            ProviderError::UnknownStableId(id) => PersistenceError::NotLive(id),
            source => PersistenceError::Rejected {
                operation: "persist",
                source,
            },
        })?;
        self.link(durable, stable, PersistState::Pending);
        info!(stable = %stable, durable = %durable, "Anchor persistence requested");
        Ok(durable)
    }

    /// Persistence state for an anchor or a durable id.
    ///
    /// A live anchor that was never persisted reports
    /// [`PersistState::NotRequested`]; an id this session has never seen
    /// and the provider does not know is an error.
    pub fn state<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &P,
        registry: &TrackableRegistry<AnchorPayload>,
        key: impl Into<PersistKey>,
    ) -> Result<PersistState, PersistenceError> {
        let key = key.into();
        let index = match key {
            PersistKey::Stable(id) => self.by_stable.get(&id).copied(),
            PersistKey::Durable(id) => self.by_durable.get(&id).copied(),
        };
        if let Some(index) = index {
            return self.refresh(provider, index, key);
        }

        match key {
            PersistKey::Stable(id) if registry.contains(id) => Ok(PersistState::NotRequested),
            PersistKey::Stable(_) => Err(PersistenceError::Unknown(key)),
            PersistKey::Durable(id) => match provider.persist_state(key) {
                Ok(PersistState::NotRequested) | Err(_) => Err(PersistenceError::Unknown(key)),
                Ok(state) => {
                    self.insert(PersistenceRecord {
                        stable_id: None,
                        durable_id: id,
                        state,
                    });
                    Ok(state)
                }
            },
        }
    }

    /// Ask the provider to materialize a stored anchor.
    ///
    /// `Ok(Some(id))` when the anchor is already live in this session;
    /// `Ok(None)` when the request was accepted and the anchor will appear
    /// in a later anchor batch.
    pub fn load<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        durable: DurableId,
    ) -> Result<Option<StableId>, PersistenceError> {
        if !provider.persistence_enabled() {
            return Err(PersistenceError::Disabled);
        }
        if let Some(stable) = self.stable_id(durable) {
            return Ok(Some(stable));
        }
        if !provider.load(durable) {
            return Err(PersistenceError::Unknown(PersistKey::Durable(durable)));
        }
        if !self.by_durable.contains_key(&durable) {
            self.insert(PersistenceRecord {
                stable_id: None,
                durable_id: durable,
                state: PersistState::Persisted,
            });
        }
        self.pending_loads.insert(durable);
        info!(durable = %durable, "Anchor load requested");
        Ok(None)
    }

    /// Remove an anchor from durable storage.
    ///
    /// Works by durable id whether or not the anchor is live.
    pub fn unpersist<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        key: impl Into<PersistKey>,
    ) -> Result<(), PersistenceError> {
        let key = key.into();
        let durable = match key {
            PersistKey::Durable(id) => id,
            PersistKey::Stable(id) => match self.persistent_id(id) {
                Some(durable) => durable,
                None => {
                    if !provider.unpersist_by_stable_id(id) {
                        return Err(PersistenceError::Unknown(key));
                    }
                    info!(stable = %id, "Anchor unpersisted");
                    return Ok(());
                }
            },
        };

        let accepted = provider.unpersist_by_durable_id(durable);
        let known = self.remove(durable).is_some();
        self.pending_loads.remove(&durable);
        if !accepted && !known {
            return Err(PersistenceError::Unknown(key));
        }
        if !accepted {
            warn!(durable = %durable, "Provider had no stored entry, dropping local record");
        }
        info!(durable = %durable, "Anchor unpersisted");
        Ok(())
    }

    /// Every durable id in storage, reconciled with local records
    pub fn enumerate_all<P: AnchorProvider + ?Sized>(&mut self, provider: &P) -> BTreeSet<DurableId> {
        let stored: BTreeSet<DurableId> = provider.enumerate_durable_ids().into_iter().collect();

        let stale: Vec<DurableId> = self
            .records()
            .into_iter()
            .filter(|r| r.state == PersistState::Persisted && !stored.contains(&r.durable_id))
            .map(|r| r.durable_id)
            .collect();
        for durable in stale {
            warn!(durable = %durable, "Durable id no longer in storage, dropping record");
            self.remove(durable);
        }
        self.pending_loads.retain(|durable| stored.contains(durable));

        for &durable in &stored {
            match self.by_durable.get(&durable).copied() {
                Some(index) => {
                    if let Some(record) = self.slots[index].as_mut() {
                        record.state = PersistState::Persisted;
                    }
                }
                None => {
                    self.insert(PersistenceRecord {
                        stable_id: None,
                        durable_id: durable,
                        state: PersistState::Persisted,
                    });
                }
            }
        }
        stored
    }

    pub fn persistent_id(&self, stable: StableId) -> Option<DurableId> {
        self.by_stable
            .get(&stable)
            .and_then(|&i| self.slot(i))
            .map(|r| r.durable_id)
    }

    pub fn stable_id(&self, durable: DurableId) -> Option<StableId> {
        self.by_durable
            .get(&durable)
            .and_then(|&i| self.slot(i))
            .and_then(|r| r.stable_id)
    }

    pub fn record(&self, key: impl Into<PersistKey>) -> Option<&PersistenceRecord> {
        let index = match key.into() {
            PersistKey::Stable(id) => self.by_stable.get(&id),
            PersistKey::Durable(id) => self.by_durable.get(&id),
        };
        index.and_then(|&i| self.slot(i))
    }

    /// Snapshot of all records, ordered by durable id
    pub fn records(&self) -> Vec<&PersistenceRecord> {
        let mut records: Vec<_> = self.slots.iter().flatten().collect();
        records.sort_by_key(|r| r.durable_id);
        records
    }

    pub fn is_loading(&self, durable: DurableId) -> bool {
        self.pending_loads.contains(&durable)
    }

    pub fn len(&self) -> usize {
        self.by_durable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_durable.is_empty()
    }

    /// Follow one applied anchor batch.
    ///
    /// Links anchors whose payload carries a durable id, unlinks removed
    /// anchors and anchors whose payload lost or changed its durable id.
    /// Returns the newly established links.
    pub fn observe(
        &mut self,
        registry: &TrackableRegistry<AnchorPayload>,
        report: &ApplyReport,
    ) -> Vec<(StableId, DurableId)> {
        for &stable in &report.removed {
            if let Some(index) = self.by_stable.remove(&stable) {
                if let Some(record) = self.slots[index].as_mut() {
                    debug!(stable = %stable, durable = %record.durable_id, "Anchor left session, keeping durable record");
                    record.stable_id = None;
                }
            }
        }

        let mut linked = Vec::new();
        for &stable in report.added.iter().chain(&report.updated) {
            let reported = registry.get(stable).and_then(|a| a.durable_id);
            let current = self.persistent_id(stable);
            if reported == current {
                continue;
            }
            if let Some(previous) = current {
                warn!(stable = %stable, durable = %previous, "Provider no longer reports durable id for anchor");
                self.unlink(stable);
            }
            let Some(durable) = reported else {
                continue;
            };
            let state = if self.pending_loads.remove(&durable) {
                PersistState::Persisted
            } else {
                self.record(durable)
                    .map(|r| r.state)
                    .unwrap_or(PersistState::Pending)
            };
            self.link(durable, stable, state);
            info!(stable = %stable, durable = %durable, "Anchor linked to durable id");
            linked.push((stable, durable));
        }
        linked
    }

    /// Detach `stable` from its record. A write that never completed is
    /// forgotten along with the link.
    fn unlink(&mut self, stable: StableId) {
        let Some(index) = self.by_stable.remove(&stable) else {
            return;
        };
        let Some(record) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };
        record.stable_id = None;
        if record.state == PersistState::Pending {
            let durable = record.durable_id;
            self.remove(durable);
        }
    }

    /// Forget every live link, keeping durable records
    pub fn detach_all(&mut self) {
        for index in self.by_stable.drain().map(|(_, i)| i) {
            if let Some(record) = self.slots[index].as_mut() {
                record.stable_id = None;
            }
        }
        self.pending_loads.clear();
    }

    fn refresh<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &P,
        index: usize,
        key: PersistKey,
    ) -> Result<PersistState, PersistenceError> {
        let Some(record) = self.slot(index) else {
            return Err(PersistenceError::Unknown(key));
        };
        if record.state != PersistState::Pending {
            return Ok(record.state);
        }

        let durable = record.durable_id;
        match provider.persist_state(PersistKey::Durable(durable)) {
            Ok(PersistState::Persisted) => {
                if let Some(record) = self.slots[index].as_mut() {
                    record.state = PersistState::Persisted;
                }
                info!(durable = %durable, "Anchor persisted");
                Ok(PersistState::Persisted)
            }
            Ok(_) => Ok(PersistState::Pending),
            Err(e) => {
                warn!(durable = %durable, error = %e, "Pending anchor write lost by provider");
                self.remove(durable);
                Err(PersistenceError::Unknown(key))
            }
        }
    }

    fn slot(&self, index: usize) -> Option<&PersistenceRecord> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    fn insert(&mut self, record: PersistenceRecord) -> usize {
        let durable = record.durable_id;
        let stable = record.stable_id;
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(record);
                index
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        self.by_durable.insert(durable, index);
        if let Some(stable) = stable {
            self.by_stable.insert(stable, index);
        }
        index
    }

    fn remove(&mut self, durable: DurableId) -> Option<PersistenceRecord> {
        let index = self.by_durable.remove(&durable)?;
        let record = self.slots.get_mut(index)?.take()?;
        if let Some(stable) = record.stable_id {
            self.by_stable.remove(&stable);
        }
        self.free.push(index);
        Some(record)
    }

    /// Point `durable` at `stable`, creating the record if needed
    fn link(&mut self, durable: DurableId, stable: StableId, state: PersistState) {
        if let Some(previous) = self.by_stable.remove(&stable) {
            if let Some(record) = self.slots[previous].as_mut() {
                record.stable_id = None;
            }
        }
        match self.by_durable.get(&durable).copied() {
            Some(index) => {
                if let Some(record) = self.slots[index].as_mut() {
                    if let Some(old) = record.stable_id.replace(stable) {
                        if old != stable {
                            warn!(durable = %durable, from = %old, to = %stable, "Durable id moved to another anchor");
                            self.by_stable.remove(&old);
                        }
                    }
                    record.state = state;
                }
                self.by_stable.insert(stable, index);
            }
            None => {
                self.insert(PersistenceRecord {
                    stable_id: Some(stable),
                    durable_id: durable,
                    state,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{DurableStore, Pose, TrackableKind};
    use tether_provider::{BatchSource, LibraryProvider, SimConfig, SimulatedProvider};

    use crate::subsystem::TrackableSubsystem;

    struct Rig {
        provider: SimulatedProvider,
        anchors: TrackableSubsystem<AnchorPayload>,
        persistence: AnchorPersistence,
        cycle: u64,
    }

    impl Rig {
        fn new(config: SimConfig) -> Self {
            Self::with_store(config, DurableStore::in_memory())
        }

        fn with_store(config: SimConfig, store: DurableStore) -> Self {
            let mut provider = SimulatedProvider::with_store(config, store);
            let mut anchors = TrackableSubsystem::new();
            anchors.start(&mut provider).unwrap();
            let mut persistence = AnchorPersistence::new();
            persistence.set_enabled(&mut provider, true);
            Self {
                provider,
                anchors,
                persistence,
                cycle: 0,
            }
        }

        fn step(&mut self) -> Vec<(StableId, DurableId)> {
            self.provider.tick();
            self.cycle += 1;
            let report = self.anchors.sync(&mut self.provider, self.cycle);
            self.persistence.observe(self.anchors.registry(), &report)
        }

        fn live_anchor(&mut self) -> StableId {
            let id = self.provider.create_anchor(Pose::IDENTITY).unwrap();
            self.step();
            id
        }

        fn persist(&mut self, id: StableId) -> Result<DurableId, PersistenceError> {
            self.persistence
                .persist(&mut self.provider, self.anchors.registry(), id)
        }

        fn state(&mut self, key: impl Into<PersistKey>) -> Result<PersistState, PersistenceError> {
            self.persistence
                .state(&self.provider, self.anchors.registry(), key)
        }
    }

    #[test]
    fn test_persist_goes_pending_then_persisted() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 2,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        assert_eq!(rig.state(a), Ok(PersistState::NotRequested));

        let d = rig.persist(a).unwrap();
        assert_eq!(rig.persist(a), Ok(d));
        assert_eq!(rig.persistence.persistent_id(a), Some(d));
        assert_eq!(rig.state(d), Ok(PersistState::Pending));

        rig.step();
        assert_eq!(rig.state(a), Ok(PersistState::Pending));
        rig.step();
        assert_eq!(rig.state(d), Ok(PersistState::Persisted));
        assert_eq!(rig.state(a), Ok(PersistState::Persisted));
    }

    #[test]
    fn test_persist_requires_enabled_and_live() {
        let mut rig = Rig::new(SimConfig::default());
        let a = rig.live_anchor();
        assert_eq!(rig.persist(StableId(4242)), Err(PersistenceError::NotLive(StableId(4242))));

        rig.persistence.set_enabled(&mut rig.provider, false);
        assert_eq!(rig.persist(a), Err(PersistenceError::Disabled));
        assert_eq!(rig.persistence.load(&mut rig.provider, DurableId::new_random()), Err(PersistenceError::Disabled));
    }

    #[test]
    fn test_unknown_ids_are_errors_not_states() {
        let mut rig = Rig::new(SimConfig::default());
        let d = DurableId::new_random();
        assert_eq!(rig.state(d), Err(PersistenceError::Unknown(PersistKey::Durable(d))));
        assert_eq!(
            rig.state(StableId(77)),
            Err(PersistenceError::Unknown(PersistKey::Stable(StableId(77))))
        );
    }

    #[test]
    fn test_unpersist_without_live_anchor() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        rig.provider.destroy_anchor(a);
        rig.step();
        assert_eq!(rig.persistence.stable_id(d), None);
        assert!(rig.persistence.enumerate_all(&rig.provider).contains(&d));

        rig.persistence.unpersist(&mut rig.provider, d).unwrap();
        assert!(!rig.persistence.enumerate_all(&rig.provider).contains(&d));
        assert!(rig.persistence.record(d).is_none());
        assert_eq!(
            rig.persistence.unpersist(&mut rig.provider, d),
            Err(PersistenceError::Unknown(PersistKey::Durable(d)))
        );
    }

    #[test]
    fn test_unpersist_by_stable_id_clears_link() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        rig.persist(a).unwrap();
        rig.step();

        rig.persistence.unpersist(&mut rig.provider, a).unwrap();
        assert_eq!(rig.persistence.persistent_id(a), None);
        assert_eq!(rig.state(a), Ok(PersistState::NotRequested));
        assert!(rig.persistence.enumerate_all(&rig.provider).is_empty());
    }

    #[test]
    fn test_load_links_new_stable_id() {
        let mut first = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = first.live_anchor();
        let d = first.persist(a).unwrap();

        let mut second = Rig {
            provider: SimulatedProvider::with_store(
                SimConfig {
                    load_latency_ticks: 1,
                    ..SimConfig::default()
                },
                first.provider.into_store(),
            ),
            anchors: TrackableSubsystem::new(),
            persistence: AnchorPersistence::new(),
            cycle: 0,
        };
        second.anchors.start(&mut second.provider).unwrap();
        second.persistence.set_enabled(&mut second.provider, true);

        assert_eq!(second.persistence.enumerate_all(&second.provider), BTreeSet::from([d]));
        assert_eq!(second.persistence.load(&mut second.provider, d), Ok(None));
        assert!(second.persistence.is_loading(d));

        let linked = second.step();
        assert_eq!(linked.len(), 1);
        let (reloaded, durable) = linked[0];
        assert_eq!(durable, d);
        assert_eq!(second.persistence.persistent_id(reloaded), Some(d));
        assert_eq!(second.persistence.stable_id(d), Some(reloaded));
        assert_eq!(second.state(reloaded), Ok(PersistState::Persisted));
        assert_eq!(second.persistence.load(&mut second.provider, d), Ok(Some(reloaded)));
    }

    #[test]
    fn test_load_unknown_durable_id_is_rejected() {
        let mut rig = Rig::new(SimConfig::default());
        let d = DurableId::new_random();
        assert_eq!(
            rig.persistence.load(&mut rig.provider, d),
            Err(PersistenceError::Unknown(PersistKey::Durable(d)))
        );
    }

    #[test]
    fn test_arena_slots_are_reused() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        rig.persistence.unpersist(&mut rig.provider, d).unwrap();

        let b = rig.live_anchor();
        rig.persist(b).unwrap();
        assert_eq!(rig.persistence.slots.len(), 1);
        assert_eq!(rig.persistence.len(), 1);
    }

    #[test]
    fn test_anchor_tracking_must_be_enabled() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        assert!(provider.create_anchor(Pose::IDENTITY).is_err());
        provider.set_tracking_enabled(TrackableKind::Anchor, true);
        provider.create_anchor(Pose::IDENTITY).unwrap();
        assert!(provider.pull(TrackableKind::Anchor).is_some());
    }

    #[test]
    fn test_enumerate_drops_records_missing_from_storage() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        rig.provider.destroy_anchor(a);
        rig.step();
        assert_eq!(rig.state(d), Ok(PersistState::Persisted));

        // Storage changes behind the engine's back
        assert!(rig.provider.unpersist_by_durable_id(d));
        assert_eq!(rig.persistence.record(d).map(|r| r.state), Some(PersistState::Persisted));

        assert!(rig.persistence.enumerate_all(&rig.provider).is_empty());
        assert!(rig.persistence.record(d).is_none());
        assert_eq!(rig.state(d), Err(PersistenceError::Unknown(PersistKey::Durable(d))));
    }

    #[test]
    fn test_lost_pending_write_is_dropped_on_refresh() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 5,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        assert_eq!(rig.state(d), Ok(PersistState::Pending));

        assert!(rig.provider.unpersist_by_durable_id(d));
        assert_eq!(rig.state(d), Err(PersistenceError::Unknown(PersistKey::Durable(d))));
        assert!(rig.persistence.record(d).is_none());
        assert_eq!(rig.persistence.persistent_id(a), None);
        assert!(rig.persistence.is_empty());
    }

    #[test]
    fn test_state_of_stored_id_without_load() {
        let mut first = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = first.live_anchor();
        let d = first.persist(a).unwrap();

        let mut second = Rig::with_store(SimConfig::default(), first.provider.into_store());
        assert!(second.persistence.is_empty());

        assert_eq!(second.state(d), Ok(PersistState::Persisted));
        let record = second.persistence.record(d).unwrap();
        assert_eq!(record.stable_id, None);
        assert_eq!(record.state, PersistState::Persisted);
        assert!(!second.persistence.is_loading(d));
        assert_eq!(second.persistence.len(), 1);
    }

    #[test]
    fn test_failed_write_unlinks_anchor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = DurableStore::open(blocker.join("anchors.json")).unwrap();

        let mut rig = Rig::with_store(
            SimConfig {
                persist_latency_ticks: 1,
                ..SimConfig::default()
            },
            store,
        );
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        assert_eq!(rig.persistence.persistent_id(a), Some(d));

        rig.step();
        let payload = rig.anchors.registry().get(a).unwrap();
        assert_eq!(payload.durable_id, None);
        assert_eq!(rig.persistence.persistent_id(a), None);
        assert_eq!(rig.persistence.stable_id(d), None);
        assert_eq!(rig.state(a), Ok(PersistState::NotRequested));
        assert_eq!(rig.state(d), Err(PersistenceError::Unknown(PersistKey::Durable(d))));
        assert!(rig.persistence.enumerate_all(&rig.provider).is_empty());
    }

    #[test]
    fn test_provider_side_unpersist_unlinks_live_anchor() {
        let mut rig = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = rig.live_anchor();
        let d = rig.persist(a).unwrap();
        rig.step();
        assert_eq!(rig.persistence.stable_id(d), Some(a));

        assert!(rig.provider.unpersist_by_durable_id(d));
        rig.step();
        assert_eq!(rig.persistence.persistent_id(a), None);
        assert_eq!(rig.persistence.stable_id(d), None);
        assert_eq!(rig.state(a), Ok(PersistState::NotRequested));

        rig.persistence.enumerate_all(&rig.provider);
        assert!(rig.persistence.record(d).is_none());
    }

    #[test]
    fn test_vanished_load_stops_loading() {
        let mut first = Rig::new(SimConfig {
            persist_latency_ticks: 0,
            ..SimConfig::default()
        });
        let a = first.live_anchor();
        let d = first.persist(a).unwrap();

        let mut second = Rig::with_store(
            SimConfig {
                load_latency_ticks: 3,
                ..SimConfig::default()
            },
            first.provider.into_store(),
        );
        assert_eq!(second.persistence.load(&mut second.provider, d), Ok(None));
        assert!(second.persistence.is_loading(d));

        assert!(second.provider.unpersist_by_durable_id(d));
        for _ in 0..3 {
            assert!(second.step().is_empty());
        }
        assert!(second.persistence.enumerate_all(&second.provider).is_empty());
        assert!(!second.persistence.is_loading(d));
    }
}
