//! Identifier types for tracked entities

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Session-scoped identifier issued by the tracking provider.
///
/// Unique within one trackable kind for the lifetime of a session and never
/// reused after removal. Carries no meaning across sessions or kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableId(pub u64);

impl StableId {
    /// Raw provider value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for StableId {
    type Err = std::num::ParseIntError;

    /// Accepts decimal or `0x`-prefixed hexadecimal
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map(Self),
            None => s.parse().map(Self),
        }
    }
}

/// Cross-session 128-bit identifier for a persisted anchor.
///
/// The byte layout is opaque; storage format belongs to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DurableId(Uuid);

impl DurableId {
    /// Generate a fresh random identifier
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build from the 16 raw bytes a provider hands out.
    ///
    /// All-zero bytes mean "no durable identifier" and yield `None`.
    pub fn from_bytes(bytes: [u8; 16]) -> Option<Self> {
        let uuid = Uuid::from_bytes(bytes);
        if uuid.is_nil() {
            None
        } else {
            Some(Self(uuid))
        }
    }

    /// Raw bytes, suitable for a native record
    pub fn to_bytes(self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DurableId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for DurableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DurableId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Persistence state of a single durable identifier.
///
/// `Persisted` is terminal; unpersisting removes the record entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistState {
    /// Known anchor, persistence never requested
    NotRequested,
    /// Write to durable storage requested but not yet confirmed
    Pending,
    /// Present in durable storage
    Persisted,
}

impl std::fmt::Display for PersistState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotRequested => "not_requested",
            Self::Pending => "pending",
            Self::Persisted => "persisted",
        };
        f.write_str(s)
    }
}

/// Either identifier of an anchor, for operations that accept both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistKey {
    Stable(StableId),
    Durable(DurableId),
}

impl From<StableId> for PersistKey {
    fn from(id: StableId) -> Self {
        Self::Stable(id)
    }
}

impl From<DurableId> for PersistKey {
    fn from(id: DurableId) -> Self {
        Self::Durable(id)
    }
}

impl std::fmt::Display for PersistKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable(id) => write!(f, "stable:{}", id),
            Self::Durable(id) => write!(f, "durable:{}", id),
        }
    }
}
