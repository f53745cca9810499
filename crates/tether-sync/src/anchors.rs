//! Anchor subsystem: the anchor registry plus its persistence engine

use std::collections::BTreeSet;
use tether_core::{
    AnchorPayload, ApplyReport, DurableId, PersistKey, PersistState, Pose, StableId,
    TrackableRegistry,
};
use tether_provider::{AnchorProvider, BatchSource, LibraryProvider, ProviderError};
use tracing::info;

use crate::adapter::AdapterError;
use crate::persistence::{AnchorPersistence, PersistenceError};
use crate::subsystem::TrackableSubsystem;

#[derive(Debug, Default)]
pub struct AnchorSubsystem {
    trackables: TrackableSubsystem<AnchorPayload>,
    persistence: AnchorPersistence,
}

impl AnchorSubsystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TrackableRegistry<AnchorPayload> {
        self.trackables.registry()
    }

    pub fn persistence(&self) -> &AnchorPersistence {
        &self.persistence
    }

    pub fn is_started(&self) -> bool {
        self.trackables.is_started()
    }

    pub fn dropped_batches(&self) -> usize {
        self.trackables.dropped_batches()
    }

    pub fn start<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) -> Result<(), AdapterError> {
        self.trackables.start(provider)
    }

    /// Stop tracking. Durable records survive; live links do not.
    pub fn stop<P: LibraryProvider + ?Sized>(&mut self, provider: &mut P) -> Vec<StableId> {
        self.persistence.detach_all();
        self.trackables.stop(provider)
    }

    /// Apply one anchor batch and link any anchors that arrived carrying a
    /// durable id
    pub fn sync<S: BatchSource + ?Sized>(
        &mut self,
        source: &mut S,
        cycle: u64,
    ) -> (ApplyReport, Vec<(StableId, DurableId)>) {
        let report = self.trackables.sync(source, cycle);
        let linked = self.persistence.observe(self.trackables.registry(), &report);
        (report, linked)
    }

    /// Request a new anchor; it becomes visible after a later sync
    pub fn create<P: AnchorProvider + ?Sized>(&mut self, provider: &mut P, pose: Pose) -> Result<StableId, ProviderError> {
        let id = provider.create_anchor(pose)?;
        info!(id = %id, "Anchor creation requested");
        Ok(id)
    }

    pub fn destroy<P: AnchorProvider + ?Sized>(&mut self, provider: &mut P, id: StableId) -> bool {
        provider.destroy_anchor(id)
    }

    pub fn set_persistence_enabled<P: AnchorProvider + ?Sized>(&mut self, provider: &mut P, enabled: bool) -> bool {
        self.persistence.set_enabled(provider, enabled)
    }

    pub fn persist<P: AnchorProvider + ?Sized>(&mut self, provider: &mut P, id: StableId) -> Result<DurableId, PersistenceError> {
        self.persistence.persist(provider, self.trackables.registry(), id)
    }

    pub fn persist_state<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &P,
        key: impl Into<PersistKey>,
    ) -> Result<PersistState, PersistenceError> {
        self.persistence.state(provider, self.trackables.registry(), key)
    }

    pub fn load<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        id: DurableId,
    ) -> Result<Option<StableId>, PersistenceError> {
        self.persistence.load(provider, id)
    }

    pub fn unpersist<P: AnchorProvider + ?Sized>(
        &mut self,
        provider: &mut P,
        key: impl Into<PersistKey>,
    ) -> Result<(), PersistenceError> {
        self.persistence.unpersist(provider, key)
    }

    pub fn enumerate_durable_ids<P: AnchorProvider + ?Sized>(&mut self, provider: &P) -> BTreeSet<DurableId> {
        self.persistence.enumerate_all(provider)
    }

    pub fn persistent_id(&self, id: StableId) -> Option<DurableId> {
        self.persistence.persistent_id(id)
    }

    pub fn stable_id(&self, id: DurableId) -> Option<StableId> {
        self.persistence.stable_id(id)
    }
}
