//! Durable anchor store
//!
//! Device-local storage for persisted anchors. Each durable identifier maps
//! to the last pose written for it. The manifest is a JSON file that is
//! loaded (or created) when a session starts and rewritten on every change,
//! so its contents only change between sessions from the point of view of
//! any other session.
//!
//! A store without a path keeps everything in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::id::DurableId;
use crate::trackable::Pose;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Manifest entry for a single persisted anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnchor {
    /// Pose at the time of the last write
    pub pose: Pose,
    /// When the anchor was written
    pub persisted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreManifest {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    anchors: BTreeMap<DurableId, StoredAnchor>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Persistent set of durable anchors
#[derive(Debug, Clone)]
pub struct DurableStore {
    path: Option<PathBuf>,
    manifest: StoreManifest,
}

impl DurableStore {
    /// Store that lives only as long as this value
    pub fn in_memory() -> Self {
        Self {
            path: None,
            manifest: StoreManifest {
                version: default_version(),
                anchors: BTreeMap::new(),
            },
        }
    }

    /// Open the store at `path`, creating an empty one if the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let manifest = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            StoreManifest {
                version: default_version(),
                anchors: BTreeMap::new(),
            }
        };
        debug!(path = %path.display(), anchors = manifest.anchors.len(), "Opened durable store");
        Ok(Self {
            path: Some(path),
            manifest,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write an anchor and flush the manifest.
    ///
    /// The in-memory view only changes once the manifest is on disk.
    pub fn insert(&mut self, id: DurableId, pose: Pose) -> Result<(), StoreError> {
        let mut next = self.manifest.clone();
        next.anchors.insert(
            id,
            StoredAnchor {
                pose,
                persisted_at: Utc::now(),
            },
        );
        self.save(&next)?;
        self.manifest = next;
        Ok(())
    }

    /// Remove an anchor, returning whether it was present
    pub fn remove(&mut self, id: &DurableId) -> Result<bool, StoreError> {
        if !self.manifest.anchors.contains_key(id) {
            return Ok(false);
        }
        let mut next = self.manifest.clone();
        next.anchors.remove(id);
        self.save(&next)?;
        self.manifest = next;
        Ok(true)
    }

    pub fn get(&self, id: &DurableId) -> Option<&StoredAnchor> {
        self.manifest.anchors.get(id)
    }

    pub fn contains(&self, id: &DurableId) -> bool {
        self.manifest.anchors.contains_key(id)
    }

    /// Every stored identifier, in a stable order
    pub fn ids(&self) -> Vec<DurableId> {
        self.manifest.anchors.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.manifest.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.anchors.is_empty()
    }

    fn save(&self, manifest: &StoreManifest) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(manifest)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_store() {
        let mut store = DurableStore::in_memory();
        let id = DurableId::new_random();

        store.insert(id, Pose::from_position([1.0, 2.0, 3.0])).unwrap();
        assert!(store.contains(&id));
        assert_eq!(store.get(&id).unwrap().pose.position, [1.0, 2.0, 3.0]);

        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("anchors").join("store.json");
        let id = DurableId::new_random();

        {
            let mut store = DurableStore::open(&path).unwrap();
            assert!(store.is_empty());
            store.insert(id, Pose::IDENTITY).unwrap();
        }

        let store = DurableStore::open(&path).unwrap();
        assert_eq!(store.ids(), vec![id]);
        assert_eq!(store.get(&id).unwrap().pose, Pose::IDENTITY);
    }

    #[test]
    fn test_failed_write_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();
        let id = DurableId::new_random();

        let mut store = DurableStore::open(blocker.join("store.json")).unwrap();
        assert!(store.insert(id, Pose::IDENTITY).is_err());
        assert!(!store.contains(&id));
        assert!(store.is_empty());
        assert!(!blocker.join("store.json").exists());
    }

    #[test]
    fn test_failed_remove_keeps_anchor() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("anchors").join("store.json");
        let id = DurableId::new_random();

        let mut store = DurableStore::open(&path).unwrap();
        store.insert(id, Pose::IDENTITY).unwrap();

        // Swap the parent directory for a regular file so the flush fails
        std::fs::remove_dir_all(temp_dir.path().join("anchors")).unwrap();
        std::fs::write(temp_dir.path().join("anchors"), "not a directory").unwrap();

        assert!(store.remove(&id).is_err());
        assert!(store.contains(&id));
    }
}
