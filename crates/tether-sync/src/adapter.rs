//! Change-set adapter: one provider batch per cycle, normalized
//!
//! The adapter pulls at most one batch per call, decodes it into owned
//! payloads while holding a [`BatchLease`], and releases the batch before
//! returning on every path. The change set it returns has three pairwise
//! disjoint lists, and only reports removals for ids it previously surfaced
//! as additions.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::mem::size_of;
use tether_core::{ActivatedConfiguration, ApplyReport, StableId, TrackableKind, TrackableRegistry};
use tether_provider::{
    decode_record, decode_removed, BatchLease, BatchSection, BatchSource, DecodeError,
    LibraryProvider, NativeRecord, ProviderError,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("{kind} batch reports element size {reported}, expected {expected}")]
    ElementSizeMismatch {
        kind: TrackableKind,
        reported: usize,
        expected: usize,
    },
    #[error("Malformed {kind} record: {source}")]
    Decode {
        kind: TrackableKind,
        #[source]
        source: DecodeError,
    },
    #[error("{0} tracking requires an activated reference library")]
    NotConfigured(TrackableKind),
    #[error("Reference library for {library} cannot configure {kind} tracking")]
    WrongLibrary {
        kind: TrackableKind,
        library: TrackableKind,
    },
    #[error("Provider refused to enable {0} tracking")]
    TrackingRefused(TrackableKind),
    #[error("Provider rejected reference library: {0}")]
    Activation(#[from] ProviderError),
}

/// Normalized changes for one kind in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet<T> {
    pub added: Vec<(StableId, T)>,
    pub updated: Vec<(StableId, T)>,
    pub removed: Vec<StableId>,
    /// Ids the provider removed and re-added within this batch. They appear
    /// in `added` only.
    pub replaced: Vec<StableId>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            replaced: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn added_ids(&self) -> impl Iterator<Item = StableId> + '_ {
        self.added.iter().map(|(id, _)| *id)
    }

    pub fn updated_ids(&self) -> impl Iterator<Item = StableId> + '_ {
        self.updated.iter().map(|(id, _)| *id)
    }
}

impl<T: NativeRecord> ChangeSet<T> {
    /// Apply to a registry. Replaced ids are evicted before being re-added.
    pub fn apply_to(self, registry: &mut TrackableRegistry<T>, cycle: u64) -> ApplyReport {
        let mut removed = self.removed;
        removed.extend(self.replaced);
        registry.apply(cycle, self.added, self.updated, &removed)
    }
}

/// Pulls and normalizes batches for one trackable kind
#[derive(Debug)]
pub struct ChangeSetAdapter<T: NativeRecord> {
    surfaced: HashSet<StableId>,
    configuration: Option<ActivatedConfiguration>,
    started: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T: NativeRecord> Default for ChangeSetAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NativeRecord> ChangeSetAdapter<T> {
    pub fn new() -> Self {
        Self {
            surfaced: HashSet::new(),
            configuration: None,
            started: false,
            _payload: PhantomData,
        }
    }

    pub fn kind(&self) -> TrackableKind {
        T::KIND
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn configuration(&self) -> Option<&ActivatedConfiguration> {
        self.configuration.as_ref()
    }

    /// Ids reported as added and not yet removed
    pub fn surfaced(&self) -> &HashSet<StableId> {
        &self.surfaced
    }

    /// Hand a validated reference library to the provider
    pub fn configure<P: LibraryProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        configuration: ActivatedConfiguration,
    ) -> Result<(), AdapterError> {
        if configuration.kind() != T::KIND {
            return Err(AdapterError::WrongLibrary {
                kind: T::KIND,
                library: configuration.kind(),
            });
        }
        provider.activate(&configuration)?;
        info!(
            kind = %T::KIND,
            entries = configuration.entries().len(),
            "Reference library configured"
        );
        self.configuration = Some(configuration);
        Ok(())
    }

    /// Enable tracking. Reference-driven kinds refuse to start until a
    /// library has been configured.
    pub fn start<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) -> Result<(), AdapterError> {
        if T::KIND.requires_reference_library() && self.configuration.is_none() {
            return Err(AdapterError::NotConfigured(T::KIND));
        }
        if !provider.set_tracking_enabled(T::KIND, true) {
            return Err(AdapterError::TrackingRefused(T::KIND));
        }
        self.started = true;
        info!(kind = %T::KIND, "Tracking started");
        Ok(())
    }

    /// Disable tracking and forget every surfaced id
    pub fn stop<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) {
        if self.started {
            provider.set_tracking_enabled(T::KIND, false);
            info!(kind = %T::KIND, "Tracking stopped");
        }
        self.started = false;
        self.surfaced.clear();
    }

    /// Pull at most one batch.
    ///
    /// An unstarted adapter or an empty provider yields an empty change set.
    /// The batch is released before this returns, whatever the outcome.
    pub fn pull<S: BatchSource + ?Sized>(&mut self, source: &mut S) -> Result<ChangeSet<T>, AdapterError> {
        if !self.started {
            return Ok(ChangeSet::default());
        }
        let Some(lease) = BatchLease::acquire(source, T::KIND) else {
            return Ok(ChangeSet::default());
        };

        let expected = size_of::<T::Raw>();
        let reported = lease.element_size();
        if reported != expected {
            return Err(AdapterError::ElementSizeMismatch {
                kind: T::KIND,
                reported,
                expected,
            });
        }

        let added = decode_section::<T, _>(&lease, BatchSection::Added)?;
        let updated = decode_section::<T, _>(&lease, BatchSection::Updated)?;
        let removed = lease
            .section(BatchSection::Removed)
            .records()
            .map(|bytes| decode_removed(bytes).map_err(|source| decode_error::<T>(source)))
            .collect::<Result<Vec<_>, _>>()?;
        drop(lease);

        let changes = self.normalize(added, updated, removed);
        for id in changes.added_ids() {
            self.surfaced.insert(id);
        }
        for id in &changes.removed {
            self.surfaced.remove(id);
        }
        Ok(changes)
    }

    fn normalize(
        &self,
        added: Vec<(StableId, T)>,
        updated: Vec<(StableId, T)>,
        removed: Vec<StableId>,
    ) -> ChangeSet<T> {
        let mut added = dedup_last(added);
        let updated = dedup_last(updated);

        let mut removed_ids = Vec::with_capacity(removed.len());
        let mut removed_set = HashSet::with_capacity(removed.len());
        for id in removed {
            if removed_set.insert(id) {
                removed_ids.push(id);
            }
        }

        let added_index: HashMap<StableId, usize> = added
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (*id, i))
            .collect();

        // An update in the same batch as the addition carries the newer payload
        let mut kept_updates = Vec::with_capacity(updated.len());
        for (id, payload) in updated {
            if let Some(&i) = added_index.get(&id) {
                added[i].1 = payload;
            } else if removed_set.contains(&id) {
                debug!(kind = %T::KIND, id = %id, "Dropping update for id removed in the same batch");
            } else {
                kept_updates.push((id, payload));
            }
        }

        let mut replaced = Vec::new();
        let mut kept_removals = Vec::with_capacity(removed_ids.len());
        for id in removed_ids {
            if added_index.contains_key(&id) {
                if self.surfaced.contains(&id) {
                    debug!(kind = %T::KIND, id = %id, "Id removed and re-added in one batch, treating as replacement");
                    replaced.push(id);
                }
            } else if self.surfaced.contains(&id) {
                kept_removals.push(id);
            } else {
                debug!(kind = %T::KIND, id = %id, "Dropping removal for id never surfaced");
            }
        }

        ChangeSet {
            added,
            updated: kept_updates,
            removed: kept_removals,
            replaced,
        }
    }
}

fn decode_error<T: NativeRecord>(source: DecodeError) -> AdapterError {
    AdapterError::Decode {
        kind: T::KIND,
        source,
    }
}

fn decode_section<T: NativeRecord, S: BatchSource + ?Sized>(
    lease: &BatchLease<'_, S>,
    section: BatchSection,
) -> Result<Vec<(StableId, T)>, AdapterError> {
    lease
        .section(section)
        .records()
        .map(|bytes| decode_record::<T>(bytes).map_err(decode_error::<T>))
        .collect()
}

/// Collapse repeated ids, keeping the first position and the last payload
fn dedup_last<T>(entries: Vec<(StableId, T)>) -> Vec<(StableId, T)> {
    let mut index = HashMap::with_capacity(entries.len());
    let mut out: Vec<(StableId, T)> = Vec::with_capacity(entries.len());
    for (id, payload) in entries {
        match index.get(&id) {
            Some(&i) => out[i] = (id, payload),
            None => {
                index.insert(id, out.len());
                out.push((id, payload));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use tether_core::{
        MarkerPayload, PlaneAlignment, PlaneClass, PlanePayload, Pose, ReferenceEntry,
        ReferenceLibrary, ReferenceScheme, Trackable,
    };
    use tether_provider::records::RawPlane;
    use tether_provider::{encode_record, Fault, SimChange, SimConfig, SimulatedProvider};

    fn plane(width: f32) -> PlanePayload {
        PlanePayload {
            pose: Pose::IDENTITY,
            extents: [width, 1.0],
            alignment: PlaneAlignment::Vertical,
            class: PlaneClass::Wall,
        }
    }

    fn started() -> (SimulatedProvider, ChangeSetAdapter<PlanePayload>) {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        let mut adapter = ChangeSetAdapter::new();
        adapter.start(&mut provider).unwrap();
        (provider, adapter)
    }

    fn assert_disjoint<T>(changes: &ChangeSet<T>) {
        let added: HashSet<_> = changes.added_ids().collect();
        let updated: HashSet<_> = changes.updated_ids().collect();
        let removed: HashSet<_> = changes.removed.iter().copied().collect();
        assert!(added.is_disjoint(&updated));
        assert!(added.is_disjoint(&removed));
        assert!(updated.is_disjoint(&removed));
    }

    #[test]
    fn test_unstarted_adapter_pulls_nothing() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        provider.set_tracking_enabled(TrackableKind::Plane, true);
        provider.detect(plane(1.0));

        let mut adapter = ChangeSetAdapter::<PlanePayload>::new();
        assert!(adapter.pull(&mut provider).unwrap().is_empty());
        assert_eq!(provider.pull_count(), 0);
    }

    #[test]
    fn test_no_batch_is_empty_change_set() {
        let (mut provider, mut adapter) = started();
        let changes = adapter.pull(&mut provider).unwrap();
        assert!(changes.is_empty());
        assert_eq!(provider.release_count(), 0);
    }

    #[test]
    fn test_pull_surfaces_and_releases() {
        let (mut provider, mut adapter) = started();
        let a = provider.detect(plane(1.0)).unwrap();

        let changes = adapter.pull(&mut provider).unwrap();
        assert_eq!(changes.added, vec![(a, plane(1.0))]);
        assert!(adapter.surfaced().contains(&a));
        assert_eq!(provider.release_count(), 1);

        provider.update(a, plane(2.0));
        let changes = adapter.pull(&mut provider).unwrap();
        assert_eq!(changes.updated, vec![(a, plane(2.0))]);

        provider.lose(TrackableKind::Plane, a);
        let changes = adapter.pull(&mut provider).unwrap();
        assert_eq!(changes.removed, vec![a]);
        assert!(adapter.surfaced().is_empty());
        assert_eq!(provider.release_count(), 3);
        assert_eq!(provider.outstanding_batches(), 0);
    }

    #[test]
    fn test_normalization_keeps_lists_disjoint() {
        let (mut provider, mut adapter) = started();
        let old = provider.detect(plane(1.0)).unwrap();
        let gone = provider.detect(plane(1.0)).unwrap();
        adapter.pull(&mut provider).unwrap();

        let fresh = StableId(500);
        let plane_change = |id, width| encode_record(id, &plane(width));
        provider.push_change(TrackableKind::Plane, SimChange::Added(plane_change(fresh, 1.0)));
        provider.push_change(TrackableKind::Plane, SimChange::Updated(plane_change(fresh, 3.0)));
        provider.push_change(TrackableKind::Plane, SimChange::Updated(plane_change(old, 4.0)));
        provider.push_change(TrackableKind::Plane, SimChange::Updated(plane_change(old, 5.0)));
        provider.push_change(TrackableKind::Plane, SimChange::Updated(plane_change(gone, 6.0)));
        provider.push_change(TrackableKind::Plane, SimChange::Removed(gone));
        provider.push_change(TrackableKind::Plane, SimChange::Removed(gone));
        provider.push_change(TrackableKind::Plane, SimChange::Removed(StableId(999)));

        let changes = adapter.pull(&mut provider).unwrap();
        assert_disjoint(&changes);
        assert_eq!(changes.added, vec![(fresh, plane(3.0))]);
        assert_eq!(changes.updated, vec![(old, plane(5.0))]);
        assert_eq!(changes.removed, vec![gone]);
        assert!(changes.replaced.is_empty());
    }

    #[test]
    fn test_remove_and_add_in_one_batch_is_replacement() {
        let (mut provider, mut adapter) = started();
        let a = provider.detect(plane(1.0)).unwrap();
        adapter.pull(&mut provider).unwrap();

        provider.push_change(TrackableKind::Plane, SimChange::Removed(a));
        provider.push_change(TrackableKind::Plane, SimChange::Added(encode_record(a, &plane(8.0))));

        let changes = adapter.pull(&mut provider).unwrap();
        assert_disjoint(&changes);
        assert_eq!(changes.added, vec![(a, plane(8.0))]);
        assert_eq!(changes.replaced, vec![a]);
        assert!(changes.removed.is_empty());

        let mut registry = TrackableRegistry::new();
        registry.apply(1, vec![(a, plane(1.0))], vec![], &[]);
        let report = changes.apply_to(&mut registry, 2);
        assert_eq!(report.replaced, vec![a]);
        assert_eq!(report.duplicate_adds, 0);
        assert_eq!(registry.get(a), Some(&plane(8.0)));
    }

    #[test]
    fn test_decode_fault_still_releases_once() {
        let (mut provider, mut adapter) = started();
        provider.detect(plane(1.0));
        provider.inject_fault(TrackableKind::Plane, Fault::CorruptRecord);

        let err = adapter.pull(&mut provider).unwrap_err();
        assert!(matches!(err, AdapterError::Decode { source: DecodeError::ZeroId, .. }));
        assert_eq!(provider.release_count(), 1);
        assert_eq!(provider.double_release_count(), 0);
        assert_eq!(provider.outstanding_batches(), 0);
    }

    #[test]
    fn test_element_size_mismatch_still_releases_once() {
        let (mut provider, mut adapter) = started();
        provider.detect(plane(1.0));
        provider.inject_fault(TrackableKind::Plane, Fault::WrongElementSize);

        let err = adapter.pull(&mut provider).unwrap_err();
        assert!(matches!(err, AdapterError::ElementSizeMismatch { reported: 60, expected: 56, .. }));
        assert_eq!(provider.release_count(), 1);
        assert!(adapter.surfaced().is_empty());
    }

    #[test]
    fn test_short_buffer_is_truncated() {
        let (mut provider, mut adapter) = started();
        let a = provider.detect(plane(1.0)).unwrap();
        provider.detect(plane(2.0));
        provider.inject_fault(TrackableKind::Plane, Fault::ShortBuffer);

        let changes = adapter.pull(&mut provider).unwrap();
        assert_eq!(changes.added, vec![(a, plane(1.0))]);
        assert_eq!(provider.release_count(), 1);
    }

    /// Plane layout whose decoder panics, to fault the adapter mid-batch
    #[derive(Debug, Clone)]
    struct ExplodingPlane(PlanePayload);

    impl Trackable for ExplodingPlane {
        const KIND: TrackableKind = TrackableKind::Plane;

        fn pose(&self) -> &Pose {
            &self.0.pose
        }
    }

    impl NativeRecord for ExplodingPlane {
        type Raw = RawPlane;

        fn from_raw(_raw: &RawPlane) -> Result<(StableId, Self), DecodeError> {
            panic!("decoder fault");
        }

        fn to_raw(&self, id: StableId) -> RawPlane {
            self.0.to_raw(id)
        }
    }

    #[test]
    fn test_panic_mid_batch_still_releases_once() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        let mut adapter = ChangeSetAdapter::<ExplodingPlane>::new();
        adapter.start(&mut provider).unwrap();
        provider.detect(plane(1.0));

        let result = catch_unwind(AssertUnwindSafe(|| adapter.pull(&mut provider)));
        assert!(result.is_err());
        assert_eq!(provider.release_count(), 1);
        assert_eq!(provider.outstanding_batches(), 0);
    }

    #[test]
    fn test_reference_kind_refuses_to_start_unconfigured() {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        let mut adapter = ChangeSetAdapter::<MarkerPayload>::new();
        assert_eq!(
            adapter.start(&mut provider),
            Err(AdapterError::NotConfigured(TrackableKind::Marker))
        );

        let wrong = ReferenceLibrary::with_entries(
            TrackableKind::Image,
            vec![ReferenceEntry::parse_name("image-0").unwrap()],
        )
        .build()
        .unwrap();
        assert!(matches!(
            adapter.configure(&mut provider, wrong),
            Err(AdapterError::WrongLibrary { .. })
        ));

        let library = ReferenceLibrary::with_entries(
            TrackableKind::Marker,
            vec![ReferenceEntry::new(ReferenceScheme::Qr, tether_core::ReferenceTarget::All)],
        )
        .build()
        .unwrap();
        adapter.configure(&mut provider, library).unwrap();
        adapter.start(&mut provider).unwrap();
        assert!(provider.is_tracking_enabled(TrackableKind::Marker));
    }
}
