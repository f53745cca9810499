//! Tether Sync - Trackable synchronization and anchor persistence
//!
//! This crate reconciles the application's view of tracked entities with the
//! tracking provider, one polled cycle at a time:
//! - Change-set adapters pull and normalize provider batches per kind
//! - Subsystems apply those batches to their trackable registries
//! - The anchor persistence engine maps session anchors to durable ids
//! - Cycle-driven wait helpers observe asynchronous persistence results
//!
//! Nothing here spawns threads or blocks; the host drives [`TrackingSession::tick`].

pub mod adapter;
pub mod anchors;
pub mod config;
pub mod persistence;
pub mod session;
pub mod subsystem;
pub mod wait;

pub use adapter::{AdapterError, ChangeSet, ChangeSetAdapter};
pub use anchors::AnchorSubsystem;
pub use config::{ReferenceConfig, SessionConfig};
pub use persistence::{AnchorPersistence, PersistenceError, PersistenceRecord};
pub use session::{SessionError, SessionEvent, TrackingSession};
pub use subsystem::TrackableSubsystem;
pub use wait::{LoadWait, PersistWait, WaitStatus};
