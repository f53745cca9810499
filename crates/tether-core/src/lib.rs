//! Tether Core - Core types, trackable registry, and reference libraries
//!
//! This crate provides the foundational types for the Tether system:
//! - Session-scoped and durable identifiers for tracked entities
//! - Trackable kinds and their payloads (planes, anchors, objects, markers, images)
//! - The trackable registry that applies change batches
//! - Reference library validation and reference-name parsing
//! - The on-disk durable anchor store

pub mod id;
pub mod reference;
pub mod registry;
pub mod store;
pub mod trackable;

pub use id::{DurableId, PersistKey, PersistState, StableId};
pub use reference::{
    ActivatedConfiguration, ReferenceEntry, ReferenceLibrary, ReferenceParseError,
    ReferenceScheme, ReferenceTarget, ReferenceViolation, ValidationErrors,
};
pub use registry::{ApplyReport, RegistryEntry, TrackableRegistry};
pub use store::{DurableStore, StoreError, StoredAnchor};
pub use trackable::{
    AnchorPayload, ImagePayload, MarkerPayload, ObjectPayload, PlaneAlignment, PlaneClass,
    PlanePayload, Pose, Trackable, TrackableKind, TrackingState,
};
