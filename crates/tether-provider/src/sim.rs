//! Deterministic in-process tracking provider
//!
//! `SimulatedProvider` behaves like a device runtime from the engine's point
//! of view: changes accumulate per kind until the next pull, batches are
//! handed out as flat record buffers, persistence writes complete after a
//! configurable number of provider ticks, and stored anchors survive across
//! sessions through a [`DurableStore`].
//!
//! It also exposes the counters and fault injection hooks tests need to
//! check release discipline.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use tether_core::{
    ActivatedConfiguration, AnchorPayload, DurableId, DurableStore, PersistKey, PersistState,
    Pose, StableId, TrackableKind, TrackingState,
};
use tracing::{debug, error, info, warn};

use crate::native::{
    AnchorProvider, BatchHandle, BatchSection, BatchSource, LibraryProvider, ProviderError,
    TrackingProvider,
};
use crate::records::{encode_record, record_size, NativeRecord};

/// Timing knobs for the simulated runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Provider ticks between a persist request and the durable write
    #[serde(default = "default_persist_latency")]
    pub persist_latency_ticks: u32,
    /// Provider ticks between a load request and the anchor appearing
    #[serde(default = "default_load_latency")]
    pub load_latency_ticks: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            persist_latency_ticks: default_persist_latency(),
            load_latency_ticks: default_load_latency(),
        }
    }
}

fn default_persist_latency() -> u32 {
    3
}

fn default_load_latency() -> u32 {
    2
}

/// One queued change, in native form
#[derive(Debug, Clone, PartialEq)]
pub enum SimChange {
    Added(Vec<u8>),
    Updated(Vec<u8>),
    Removed(StableId),
}

/// Fault applied to the next batch pulled for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Zero the stable id of the first added record
    CorruptRecord,
    /// Report an element size that does not match the record layout
    WrongElementSize,
    /// Drop the last byte of the added buffer while keeping its count
    ShortBuffer,
}

#[derive(Debug)]
struct NativeBatch {
    element_size: usize,
    added: Vec<u8>,
    added_count: usize,
    updated: Vec<u8>,
    updated_count: usize,
    removed: Vec<u8>,
    removed_count: usize,
}

#[derive(Debug, Clone)]
struct SimAnchor {
    pose: Pose,
    durable_id: Option<DurableId>,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    pose: Pose,
    remaining: u32,
}

/// In-process tracking provider
#[derive(Debug)]
pub struct SimulatedProvider {
    config: SimConfig,
    ready: bool,
    running: bool,
    next_stable: u64,
    next_handle: u64,
    queues: HashMap<TrackableKind, Vec<SimChange>>,
    live: HashMap<TrackableKind, HashSet<StableId>>,
    outstanding: HashMap<BatchHandle, NativeBatch>,
    faults: HashMap<TrackableKind, Fault>,
    tracking: HashSet<TrackableKind>,
    libraries: HashMap<TrackableKind, ActivatedConfiguration>,
    anchors: HashMap<StableId, SimAnchor>,
    persistence_enabled: bool,
    persistence_supported: bool,
    store: DurableStore,
    pending_writes: HashMap<DurableId, PendingWrite>,
    pending_loads: HashMap<DurableId, u32>,
    pulls: usize,
    releases: usize,
    double_releases: usize,
}

impl SimulatedProvider {
    /// Ready, running provider with an in-memory store
    pub fn new(config: SimConfig) -> Self {
        Self::with_store(config, DurableStore::in_memory())
    }

    /// Ready, running provider backed by `store`
    pub fn with_store(config: SimConfig, store: DurableStore) -> Self {
        Self {
            config,
            ready: true,
            running: true,
            next_stable: 1,
            next_handle: 1,
            queues: HashMap::new(),
            live: HashMap::new(),
            outstanding: HashMap::new(),
            faults: HashMap::new(),
            tracking: HashSet::new(),
            libraries: HashMap::new(),
            anchors: HashMap::new(),
            persistence_enabled: false,
            persistence_supported: true,
            store,
            pending_writes: HashMap::new(),
            pending_loads: HashMap::new(),
            pulls: 0,
            releases: 0,
            double_releases: 0,
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// When unsupported, requests to enable persistence are refused
    pub fn set_persistence_supported(&mut self, supported: bool) {
        self.persistence_supported = supported;
    }

    pub fn store(&self) -> &DurableStore {
        &self.store
    }

    /// Hand the durable store back, ending this simulated session
    pub fn into_store(self) -> DurableStore {
        self.store
    }

    /// Whether a library has been activated for `kind`
    pub fn library(&self, kind: TrackableKind) -> Option<&ActivatedConfiguration> {
        self.libraries.get(&kind)
    }

    pub fn is_tracking_enabled(&self, kind: TrackableKind) -> bool {
        self.tracking.contains(&kind)
    }

    /// Total successful pulls
    pub fn pull_count(&self) -> usize {
        self.pulls
    }

    /// Total batches released (excluding double releases)
    pub fn release_count(&self) -> usize {
        self.releases
    }

    pub fn double_release_count(&self) -> usize {
        self.double_releases
    }

    /// Batches pulled but not yet released
    pub fn outstanding_batches(&self) -> usize {
        self.outstanding.len()
    }

    /// Fault to apply to the next batch pulled for `kind`
    pub fn inject_fault(&mut self, kind: TrackableKind, fault: Fault) {
        self.faults.insert(kind, fault);
    }

    /// Queue a raw change, bypassing all bookkeeping. Lets tests feed the
    /// engine batches a well-behaved runtime would never produce.
    pub fn push_change(&mut self, kind: TrackableKind, change: SimChange) {
        self.queues.entry(kind).or_default().push(change);
    }

    /// Detect a new trackable.
    ///
    /// Returns `None` when the runtime would not report it: tracking is off
    /// for the kind, or the payload is not covered by the activated
    /// reference library. Anchors go through [`AnchorProvider::create_anchor`].
    pub fn detect<T: NativeRecord>(&mut self, payload: T) -> Option<StableId> {
        if T::KIND == TrackableKind::Anchor {
            warn!("Anchors are created through create_anchor, not detect");
            return None;
        }
        if !self.accepts(&payload) {
            return None;
        }
        let id = self.allocate_id();
        self.live.entry(T::KIND).or_default().insert(id);
        self.push_change(T::KIND, SimChange::Added(encode_record(id, &payload)));
        Some(id)
    }

    /// Report a new payload for a live trackable
    pub fn update<T: NativeRecord>(&mut self, id: StableId, payload: T) -> bool {
        if T::KIND == TrackableKind::Anchor {
            let Some(anchor) = self.anchors.get_mut(&id) else {
                return false;
            };
            anchor.pose = *payload.pose();
        } else if !self.is_live(T::KIND, id) {
            return false;
        }
        self.push_change(T::KIND, SimChange::Updated(encode_record(id, &payload)));
        true
    }

    /// Stop reporting a live trackable
    pub fn lose(&mut self, kind: TrackableKind, id: StableId) -> bool {
        if kind == TrackableKind::Anchor {
            return self.destroy_anchor(id);
        }
        let removed = self
            .live
            .get_mut(&kind)
            .map(|ids| ids.remove(&id))
            .unwrap_or(false);
        if removed && !self.cancel_unpulled_add(kind, id) {
            self.push_change(kind, SimChange::Removed(id));
        }
        removed
    }

    pub fn is_live(&self, kind: TrackableKind, id: StableId) -> bool {
        if kind == TrackableKind::Anchor {
            return self.anchors.contains_key(&id);
        }
        self.live.get(&kind).is_some_and(|ids| ids.contains(&id))
    }

    /// Advance the runtime's background work by one tick: finish due
    /// durable writes and materialize due anchor loads.
    pub fn tick(&mut self) {
        let mut due_writes = Vec::new();
        for (id, write) in self.pending_writes.iter_mut() {
            write.remaining = write.remaining.saturating_sub(1);
            if write.remaining == 0 {
                due_writes.push(*id);
            }
        }
        for id in due_writes {
            if let Some(write) = self.pending_writes.remove(&id) {
                self.commit_write(id, write.pose);
            }
        }

        let mut due_loads = Vec::new();
        for (id, remaining) in self.pending_loads.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                due_loads.push(*id);
            }
        }
        for id in due_loads {
            self.pending_loads.remove(&id);
            self.materialize(id);
        }
    }

    /// Drop queued changes for a trackable whose addition was never pulled.
    /// Returns whether such an addition existed.
    fn cancel_unpulled_add(&mut self, kind: TrackableKind, id: StableId) -> bool {
        let Some(queue) = self.queues.get_mut(&kind) else {
            return false;
        };
        let was_added = queue
            .iter()
            .any(|c| matches!(c, SimChange::Added(bytes) if record_id(bytes) == Some(id)));
        if was_added {
            queue.retain(|c| match c {
                SimChange::Added(bytes) | SimChange::Updated(bytes) => record_id(bytes) != Some(id),
                SimChange::Removed(_) => true,
            });
        }
        was_added
    }

    fn allocate_id(&mut self) -> StableId {
        let id = StableId(self.next_stable);
        self.next_stable += 1;
        id
    }

    fn accepts<T: NativeRecord>(&self, payload: &T) -> bool {
        if !self.tracking.contains(&T::KIND) {
            return false;
        }
        match payload.reference_key() {
            Some((scheme, id)) => self
                .libraries
                .get(&T::KIND)
                .is_some_and(|library| library.matches(scheme, id)),
            None => true,
        }
    }

    fn anchor_payload(anchor: &SimAnchor) -> AnchorPayload {
        AnchorPayload {
            pose: anchor.pose,
            tracking_state: TrackingState::Tracking,
            durable_id: anchor.durable_id,
        }
    }

    fn push_anchor(&mut self, id: StableId, added: bool) {
        let Some(anchor) = self.anchors.get(&id) else {
            return;
        };
        let bytes = encode_record(id, &Self::anchor_payload(anchor));
        let change = if added {
            SimChange::Added(bytes)
        } else {
            SimChange::Updated(bytes)
        };
        self.push_change(TrackableKind::Anchor, change);
    }

    fn commit_write(&mut self, id: DurableId, pose: Pose) {
        match self.store.insert(id, pose) {
            Ok(()) => info!(durable = %id, "Anchor written to durable storage"),
            Err(e) => {
                error!(durable = %id, error = %e, "Durable write failed");
                let holder = self
                    .anchors
                    .iter()
                    .find(|(_, a)| a.durable_id == Some(id))
                    .map(|(sid, _)| *sid);
                if let Some(sid) = holder {
                    if let Some(anchor) = self.anchors.get_mut(&sid) {
                        anchor.durable_id = None;
                    }
                    self.push_anchor(sid, false);
                }
            }
        }
    }

    fn materialize(&mut self, durable: DurableId) {
        let Some(stored) = self.store.get(&durable) else {
            debug!(durable = %durable, "Load target vanished before materializing");
            return;
        };
        let pose = stored.pose;
        let id = self.allocate_id();
        self.anchors.insert(
            id,
            SimAnchor {
                pose,
                durable_id: Some(durable),
            },
        );
        debug!(durable = %durable, id = %id, "Materialized stored anchor");
        self.push_anchor(id, true);
    }

    fn anchor_holding(&self, durable: DurableId) -> Option<StableId> {
        self.anchors
            .iter()
            .find(|(_, a)| a.durable_id == Some(durable))
            .map(|(id, _)| *id)
    }

    fn batch(&self, handle: BatchHandle) -> Option<&NativeBatch> {
        let batch = self.outstanding.get(&handle);
        if batch.is_none() {
            error!(handle = %handle, "Access to unknown or released batch");
        }
        batch
    }
}

fn record_id(bytes: &[u8]) -> Option<StableId> {
    let head: [u8; 8] = bytes.get(..size_of::<u64>())?.try_into().ok()?;
    Some(StableId(u64::from_le_bytes(head)))
}

impl BatchSource for SimulatedProvider {
    fn pull(&mut self, kind: TrackableKind) -> Option<BatchHandle> {
        if !self.ready || !self.tracking.contains(&kind) {
            return None;
        }
        let changes = self.queues.remove(&kind).filter(|c| !c.is_empty())?;

        let mut batch = NativeBatch {
            element_size: record_size(kind),
            added: Vec::new(),
            added_count: 0,
            updated: Vec::new(),
            updated_count: 0,
            removed: Vec::with_capacity(changes.len() * size_of::<u64>()),
            removed_count: 0,
        };
        for change in changes {
            match change {
                SimChange::Added(bytes) => {
                    batch.added.extend_from_slice(&bytes);
                    batch.added_count += 1;
                }
                SimChange::Updated(bytes) => {
                    batch.updated.extend_from_slice(&bytes);
                    batch.updated_count += 1;
                }
                SimChange::Removed(id) => {
                    batch.removed.extend_from_slice(&id.as_u64().to_le_bytes());
                    batch.removed_count += 1;
                }
            }
        }

        match self.faults.remove(&kind) {
            Some(Fault::CorruptRecord) if batch.added.len() >= size_of::<u64>() => {
                batch.added[..size_of::<u64>()].fill(0);
            }
            Some(Fault::WrongElementSize) => batch.element_size += 4,
            Some(Fault::ShortBuffer) => {
                batch.added.pop();
            }
            _ => {}
        }

        let handle = BatchHandle(self.next_handle);
        self.next_handle += 1;
        self.outstanding.insert(handle, batch);
        self.pulls += 1;
        Some(handle)
    }

    fn count(&self, handle: BatchHandle, section: BatchSection) -> usize {
        self.batch(handle)
            .map(|b| match section {
                BatchSection::Added => b.added_count,
                BatchSection::Updated => b.updated_count,
                BatchSection::Removed => b.removed_count,
            })
            .unwrap_or(0)
    }

    fn list(&self, handle: BatchHandle, section: BatchSection) -> &[u8] {
        self.batch(handle)
            .map(|b| match section {
                BatchSection::Added => b.added.as_slice(),
                BatchSection::Updated => b.updated.as_slice(),
                BatchSection::Removed => b.removed.as_slice(),
            })
            .unwrap_or(&[])
    }

    fn element_size(&self, handle: BatchHandle) -> usize {
        self.batch(handle).map(|b| b.element_size).unwrap_or(0)
    }

    fn release_batch(&mut self, handle: BatchHandle) {
        if self.outstanding.remove(&handle).is_some() {
            self.releases += 1;
        } else {
            error!(handle = %handle, "Batch released twice or never pulled");
            self.double_releases += 1;
        }
    }
}

impl AnchorProvider for SimulatedProvider {
    fn create_anchor(&mut self, pose: Pose) -> Result<StableId, ProviderError> {
        if !self.tracking.contains(&TrackableKind::Anchor) {
            return Err(ProviderError::TrackingDisabled(TrackableKind::Anchor));
        }
        let id = self.allocate_id();
        self.anchors.insert(
            id,
            SimAnchor {
                pose,
                durable_id: None,
            },
        );
        self.push_anchor(id, true);
        Ok(id)
    }

    fn destroy_anchor(&mut self, id: StableId) -> bool {
        if self.anchors.remove(&id).is_some() {
            if !self.cancel_unpulled_add(TrackableKind::Anchor, id) {
                self.push_change(TrackableKind::Anchor, SimChange::Removed(id));
            }
            true
        } else {
            false
        }
    }

    fn set_persistence_enabled(&mut self, enabled: bool) -> bool {
        if enabled && !self.persistence_supported {
            warn!("Anchor persistence is not supported on this device");
            return false;
        }
        self.persistence_enabled = enabled;
        true
    }

    fn persistence_enabled(&self) -> bool {
        self.persistence_enabled
    }

    fn persist(&mut self, id: StableId) -> Result<DurableId, ProviderError> {
        if !self.persistence_enabled {
            return Err(ProviderError::PersistenceDisabled);
        }
        let anchor = self
            .anchors
            .get_mut(&id)
            .ok_or(ProviderError::UnknownStableId(id))?;
        if let Some(durable) = anchor.durable_id {
            return Ok(durable);
        }

        let durable = DurableId::new_random();
        anchor.durable_id = Some(durable);
        let pose = anchor.pose;

        if self.config.persist_latency_ticks == 0 {
            self.commit_write(durable, pose);
        } else {
            self.pending_writes.insert(
                durable,
                PendingWrite {
                    pose,
                    remaining: self.config.persist_latency_ticks,
                },
            );
        }
        self.push_anchor(id, false);
        Ok(durable)
    }

    fn unpersist_by_durable_id(&mut self, id: DurableId) -> bool {
        let stored = match self.store.remove(&id) {
            Ok(removed) => removed,
            Err(e) => {
                error!(durable = %id, error = %e, "Failed to remove anchor from durable storage");
                false
            }
        };
        let pending = self.pending_writes.remove(&id).is_some();
        self.pending_loads.remove(&id);

        if let Some(holder) = self.anchor_holding(id) {
            if let Some(anchor) = self.anchors.get_mut(&holder) {
                anchor.durable_id = None;
            }
            self.push_anchor(holder, false);
        }
        stored || pending
    }

    fn unpersist_by_stable_id(&mut self, id: StableId) -> bool {
        match self.anchors.get(&id).and_then(|a| a.durable_id) {
            Some(durable) => self.unpersist_by_durable_id(durable),
            None => false,
        }
    }

    fn persist_state(&self, key: PersistKey) -> Result<PersistState, ProviderError> {
        match key {
            PersistKey::Durable(id) => {
                if self.store.contains(&id) {
                    Ok(PersistState::Persisted)
                } else if self.pending_writes.contains_key(&id) {
                    Ok(PersistState::Pending)
                } else {
                    Err(ProviderError::UnknownDurableId(id))
                }
            }
            PersistKey::Stable(id) => {
                let anchor = self
                    .anchors
                    .get(&id)
                    .ok_or(ProviderError::UnknownStableId(id))?;
                match anchor.durable_id {
                    Some(durable) => self.persist_state(PersistKey::Durable(durable)),
                    None => Ok(PersistState::NotRequested),
                }
            }
        }
    }

    fn enumerate_durable_ids(&self) -> Vec<DurableId> {
        self.store.ids()
    }

    fn load(&mut self, id: DurableId) -> bool {
        if !self.persistence_enabled || !self.store.contains(&id) {
            return false;
        }
        if self.anchor_holding(id).is_some() {
            return true;
        }
        if self.config.load_latency_ticks == 0 {
            self.materialize(id);
        } else {
            self.pending_loads
                .entry(id)
                .or_insert(self.config.load_latency_ticks);
        }
        true
    }
}

impl LibraryProvider for SimulatedProvider {
    fn activate(&mut self, config: &ActivatedConfiguration) -> Result<(), ProviderError> {
        info!(
            kind = %config.kind(),
            entries = config.entries().len(),
            "Reference library activated"
        );
        self.libraries.insert(config.kind(), config.clone());
        Ok(())
    }

    fn set_tracking_enabled(&mut self, kind: TrackableKind, enabled: bool) -> bool {
        if !enabled {
            self.tracking.remove(&kind);
            return true;
        }
        if kind.requires_reference_library() && !self.libraries.contains_key(&kind) {
            warn!(kind = %kind, "Refusing to track without an activated reference library");
            return false;
        }
        self.tracking.insert(kind);
        true
    }
}

impl TrackingProvider for SimulatedProvider {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn is_tracking_active(&self) -> bool {
        self.running
    }
}
