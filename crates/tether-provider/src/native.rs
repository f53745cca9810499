//! Native provider traits
//!
//! These traits mirror the handle-based interface a device tracking runtime
//! exposes. Batches are flat arrays of fixed-size records whose lifetime is
//! owned by the provider until [`BatchSource::release_batch`] is called.

use tether_core::{
    ActivatedConfiguration, DurableId, PersistKey, PersistState, Pose, StableId, TrackableKind,
};
use thiserror::Error;

/// Opaque handle to one provider-owned batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchHandle(pub u64);

impl std::fmt::Display for BatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch#{}", self.0)
    }
}

/// The three record lists carried by a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSection {
    Added,
    Updated,
    /// Flat array of little-endian `u64` stable ids
    Removed,
}

/// Errors reported synchronously by provider requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Anchor persistence is disabled")]
    PersistenceDisabled,
    #[error("Unknown stable id: {0}")]
    UnknownStableId(StableId),
    #[error("Unknown durable id: {0}")]
    UnknownDurableId(DurableId),
    #[error("Tracking is not enabled for {0}")]
    TrackingDisabled(TrackableKind),
    #[error("Provider rejected request: {0}")]
    Rejected(String),
}

/// Source of per-kind change batches
pub trait BatchSource {
    /// Acquire the next batch for `kind`. `None` means nothing is ready.
    fn pull(&mut self, kind: TrackableKind) -> Option<BatchHandle>;

    /// Number of records in a section
    fn count(&self, handle: BatchHandle, section: BatchSection) -> usize;

    /// Raw bytes of a section
    fn list(&self, handle: BatchHandle, section: BatchSection) -> &[u8];

    /// Size in bytes of one added/updated record
    fn element_size(&self, handle: BatchHandle) -> usize;

    /// Return a batch to the provider. Must be called exactly once per pull.
    fn release_batch(&mut self, handle: BatchHandle);
}

/// Anchor creation and persistence requests
///
/// All requests are fire-and-forget. Completion is observed by polling
/// [`persist_state`](AnchorProvider::persist_state) or by watching anchor
/// batches.
pub trait AnchorProvider {
    /// Request a new anchor. It appears in a later anchor batch.
    fn create_anchor(&mut self, pose: Pose) -> Result<StableId, ProviderError>;

    /// Request removal of an anchor from the session
    fn destroy_anchor(&mut self, id: StableId) -> bool;

    fn set_persistence_enabled(&mut self, enabled: bool) -> bool;

    fn persistence_enabled(&self) -> bool;

    /// Begin writing an anchor to durable storage
    fn persist(&mut self, id: StableId) -> Result<DurableId, ProviderError>;

    fn unpersist_by_durable_id(&mut self, id: DurableId) -> bool;

    fn unpersist_by_stable_id(&mut self, id: StableId) -> bool;

    fn persist_state(&self, key: PersistKey) -> Result<PersistState, ProviderError>;

    /// Every durable id currently in storage
    fn enumerate_durable_ids(&self) -> Vec<DurableId>;

    /// Request materialization of a stored anchor. `true` means accepted,
    /// not completed.
    fn load(&mut self, id: DurableId) -> bool;
}

/// Reference library activation and per-kind tracking switches
pub trait LibraryProvider {
    fn activate(&mut self, config: &ActivatedConfiguration) -> Result<(), ProviderError>;

    /// Enable or disable tracking for a kind. Returns whether the provider
    /// accepted the request.
    fn set_tracking_enabled(&mut self, kind: TrackableKind, enabled: bool) -> bool;
}

/// Everything a tracking session needs from the device runtime
pub trait TrackingProvider: BatchSource + AnchorProvider + LibraryProvider {
    /// Whether the provider has finished initializing
    fn is_ready(&self) -> bool;

    /// Whether the device session is currently tracking
    fn is_tracking_active(&self) -> bool;
}
