//! Configuration loading and validation

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tether_core::{PlaneClass, ReferenceScheme};
use tether_provider::SimConfig;
use tether_sync::{ReferenceConfig, SessionConfig};
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Synchronization cycles per second
    #[serde(default = "default_cycle_hz")]
    pub cycle_hz: f64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cycle_hz: default_cycle_hz(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_cycle_hz() -> f64 {
    30.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the durable anchor manifest
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "./tether-anchors.json".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(flatten)]
    pub provider: SimConfig,
    /// Scripted detections fed to the simulated provider
    #[serde(default, rename = "sighting")]
    pub sightings: Vec<Sighting>,
}

/// One scripted event: something appears, moves or is lost at a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    /// Cycle at which the event fires
    pub at: u64,
    /// Name tying later events to the same trackable
    pub key: String,
    #[serde(default)]
    pub action: SightingAction,
    #[serde(default)]
    pub position: [f32; 3],
    #[serde(flatten)]
    pub target: SightingTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SightingAction {
    #[default]
    Appear,
    Move,
    Lose,
}

/// What was seen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SightingTarget {
    Plane {
        #[serde(default = "default_plane_extents")]
        extents: [f32; 2],
        #[serde(default)]
        class: PlaneClass,
    },
    Object {
        label: u32,
        #[serde(default = "default_confidence")]
        confidence: f32,
    },
    Marker {
        scheme: ReferenceScheme,
        #[serde(default)]
        id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decoded: Option<String>,
    },
    Image {
        index: u32,
    },
}

fn default_plane_extents() -> [f32; 2] {
    [1.0, 1.0]
}

fn default_confidence() -> f32 {
    0.9
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&example_config())?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Defaults plus a short scripted scene exercising every kind
fn example_config() -> Config {
    Config {
        session: SessionConfig {
            markers: true,
            objects: true,
            persistence: true,
            marker_library: vec![ReferenceConfig::named("qr"), ReferenceConfig::named("aruco4x4_50-7")],
            object_library: vec![ReferenceConfig::named("object-1")],
            ..SessionConfig::default()
        },
        simulation: SimulationConfig {
            provider: SimConfig::default(),
            sightings: vec![
                Sighting {
                    at: 2,
                    key: "floor".to_string(),
                    action: SightingAction::Appear,
                    position: [0.0, 0.0, 0.0],
                    target: SightingTarget::Plane {
                        extents: [4.0, 3.0],
                        class: PlaneClass::Floor,
                    },
                },
                Sighting {
                    at: 10,
                    key: "door-tag".to_string(),
                    action: SightingAction::Appear,
                    position: [1.5, 1.2, -2.0],
                    target: SightingTarget::Marker {
                        scheme: ReferenceScheme::Aruco4x4_50,
                        id: 7,
                        decoded: None,
                    },
                },
                Sighting {
                    at: 20,
                    key: "mug".to_string(),
                    action: SightingAction::Appear,
                    position: [0.3, 0.9, -0.5],
                    target: SightingTarget::Object {
                        label: 1,
                        confidence: 0.8,
                    },
                },
                Sighting {
                    at: 40,
                    key: "mug".to_string(),
                    action: SightingAction::Lose,
                    position: [0.0, 0.0, 0.0],
                    target: SightingTarget::Object {
                        label: 1,
                        confidence: 0.8,
                    },
                },
            ],
        },
        ..Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::TrackableKind;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.daemon.bind, default_bind());
        assert!(config.session.is_enabled(TrackableKind::Plane));
        assert!(config.simulation.sightings.is_empty());
    }

    #[test]
    fn test_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        save_default_config(&path).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.session.persistence);
        assert_eq!(config.session.marker_library.len(), 2);
        assert_eq!(config.simulation.sightings, example_config().simulation.sightings);
    }

    #[test]
    fn test_parse_sightings() {
        let config: Config = toml::from_str(
            r#"
            [daemon]
            cycle_hz = 60.0

            [simulation]
            persist_latency_ticks = 5

            [[simulation.sighting]]
            at = 1
            key = "desk"
            kind = "plane"
            class = "table"
            position = [0.0, 0.7, -1.0]

            [[simulation.sighting]]
            at = 3
            key = "desk"
            action = "lose"
            kind = "plane"
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.cycle_hz, 60.0);
        assert_eq!(config.simulation.provider.persist_latency_ticks, 5);
        let sightings = &config.simulation.sightings;
        assert_eq!(sightings.len(), 2);
        assert_eq!(
            sightings[0].target,
            SightingTarget::Plane {
                extents: [1.0, 1.0],
                class: PlaneClass::Table
            }
        );
        assert_eq!(sightings[1].action, SightingAction::Lose);
    }
}
