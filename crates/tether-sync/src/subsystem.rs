//! Per-kind subsystem: adapter plus registry

use tether_core::{ActivatedConfiguration, ApplyReport, StableId, TrackableKind, TrackableRegistry};
use tether_provider::{BatchSource, LibraryProvider, NativeRecord};
use tracing::{debug, warn};

use crate::adapter::{AdapterError, ChangeSetAdapter};

/// Keeps one registry in step with the provider
#[derive(Debug)]
pub struct TrackableSubsystem<T: NativeRecord> {
    adapter: ChangeSetAdapter<T>,
    registry: TrackableRegistry<T>,
    dropped_batches: usize,
}

impl<T: NativeRecord> Default for TrackableSubsystem<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NativeRecord> TrackableSubsystem<T> {
    pub fn new() -> Self {
        Self {
            adapter: ChangeSetAdapter::new(),
            registry: TrackableRegistry::new(),
            dropped_batches: 0,
        }
    }

    pub fn kind(&self) -> TrackableKind {
        T::KIND
    }

    pub fn registry(&self) -> &TrackableRegistry<T> {
        &self.registry
    }

    pub fn adapter(&self) -> &ChangeSetAdapter<T> {
        &self.adapter
    }

    pub fn is_started(&self) -> bool {
        self.adapter.is_started()
    }

    /// Batches discarded because they could not be decoded
    pub fn dropped_batches(&self) -> usize {
        self.dropped_batches
    }

    pub fn configure<P: LibraryProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        configuration: ActivatedConfiguration,
    ) -> Result<(), AdapterError> {
        self.adapter.configure(provider, configuration)
    }

    pub fn start<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) -> Result<(), AdapterError> {
        self.adapter.start(provider)
    }

    /// Stop tracking and evict everything, returning the evicted ids
    pub fn stop<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) -> Vec<StableId> {
        self.adapter.stop(provider);
        self.registry.clear()
    }

    /// Pull one batch and apply it.
    ///
    /// A malformed batch is dropped whole; the registry is left untouched
    /// and the cycle reports no changes.
    pub fn sync<S: BatchSource + ?Sized>(&mut self, source: &mut S, cycle: u64) -> ApplyReport {
        match self.adapter.pull(source) {
            Ok(changes) if changes.is_empty() => ApplyReport::default(),
            Ok(changes) => {
                let report = changes.apply_to(&mut self.registry, cycle);
                debug!(
                    kind = %T::KIND,
                    cycle,
                    added = report.added.len(),
                    updated = report.updated.len(),
                    removed = report.removed.len(),
                    "Applied batch"
                );
                report
            }
            Err(e) => {
                self.dropped_batches += 1;
                warn!(kind = %T::KIND, cycle, error = %e, "Dropped malformed batch");
                ApplyReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ObjectPayload, Pose, ReferenceEntry, ReferenceLibrary, ReferenceScheme, ReferenceTarget};
    use tether_provider::{Fault, SimConfig, SimulatedProvider};

    fn bottle(confidence: f32) -> ObjectPayload {
        ObjectPayload {
            pose: Pose::from_position([0.0, 0.0, -1.0]),
            label: 7,
            confidence,
            extents: [0.1, 0.3, 0.1],
        }
    }

    fn started() -> (SimulatedProvider, TrackableSubsystem<ObjectPayload>) {
        let mut provider = SimulatedProvider::new(SimConfig::default());
        let mut subsystem = TrackableSubsystem::new();
        let library = ReferenceLibrary::with_entries(
            TrackableKind::Object,
            vec![ReferenceEntry::new(ReferenceScheme::Object, ReferenceTarget::Id(7))],
        )
        .build()
        .unwrap();
        subsystem.configure(&mut provider, library).unwrap();
        subsystem.start(&mut provider).unwrap();
        (provider, subsystem)
    }

    #[test]
    fn test_sync_follows_provider() {
        let (mut provider, mut subsystem) = started();
        let id = provider.detect(bottle(0.5)).unwrap();

        let report = subsystem.sync(&mut provider, 1);
        assert_eq!(report.added, vec![id]);
        assert_eq!(subsystem.registry().entry(id).unwrap().created_cycle, 1);

        provider.update(id, bottle(0.9));
        let report = subsystem.sync(&mut provider, 2);
        assert_eq!(report.updated, vec![id]);
        assert_eq!(subsystem.registry().get(id).unwrap().confidence, 0.9);

        provider.lose(TrackableKind::Object, id);
        let report = subsystem.sync(&mut provider, 3);
        assert_eq!(report.removed, vec![id]);
        assert!(subsystem.registry().is_empty());
    }

    #[test]
    fn test_unlisted_label_is_never_reported() {
        let (mut provider, mut subsystem) = started();
        let mut chair = bottle(0.8);
        chair.label = 3;
        assert!(provider.detect(chair).is_none());
        assert!(subsystem.sync(&mut provider, 1).is_empty());
    }

    #[test]
    fn test_malformed_batch_leaves_registry_untouched() {
        let (mut provider, mut subsystem) = started();
        let id = provider.detect(bottle(0.5)).unwrap();
        subsystem.sync(&mut provider, 1);

        provider.update(id, bottle(0.7));
        provider.inject_fault(TrackableKind::Object, Fault::WrongElementSize);
        assert!(subsystem.sync(&mut provider, 2).is_empty());
        assert_eq!(subsystem.dropped_batches(), 1);
        assert_eq!(subsystem.registry().get(id).unwrap().confidence, 0.5);
        assert_eq!(provider.outstanding_batches(), 0);
    }

    #[test]
    fn test_stop_evicts_everything() {
        let (mut provider, mut subsystem) = started();
        let id = provider.detect(bottle(0.5)).unwrap();
        subsystem.sync(&mut provider, 1);

        assert_eq!(subsystem.stop(&mut provider), vec![id]);
        assert!(!provider.is_tracking_enabled(TrackableKind::Object));
        assert!(subsystem.adapter().surfaced().is_empty());
    }
}
