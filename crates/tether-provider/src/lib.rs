//! Tether Provider - The boundary to the native tracking provider
//!
//! This crate describes what Tether needs from a device tracking runtime:
//! - Batch polling of added/updated/removed records as flat native buffers
//! - Fixed-size record layouts and their decoding
//! - A scoped lease that releases every acquired batch exactly once
//! - Anchor persistence and reference library activation requests
//!
//! It also ships a deterministic in-process provider for tests and tooling.

pub mod lease;
pub mod native;
pub mod records;
pub mod sim;

pub use lease::{BatchLease, RawSection};
pub use native::{
    AnchorProvider, BatchHandle, BatchSection, BatchSource, LibraryProvider, ProviderError,
    TrackingProvider,
};
pub use records::{decode_record, decode_removed, encode_record, record_size, DecodeError, NativeRecord};
pub use sim::{Fault, SimChange, SimConfig, SimulatedProvider};
