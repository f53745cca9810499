//! Session configuration

use serde::{Deserialize, Serialize};
use tether_core::{ReferenceEntry, ReferenceLibrary, ReferenceParseError, TrackableKind};

/// Which kinds to track and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub planes: bool,
    #[serde(default = "default_true")]
    pub anchors: bool,
    #[serde(default)]
    pub objects: bool,
    #[serde(default)]
    pub markers: bool,
    #[serde(default)]
    pub images: bool,
    /// Enable anchor persistence at session start
    #[serde(default)]
    pub persistence: bool,
    #[serde(default)]
    pub object_library: Vec<ReferenceConfig>,
    #[serde(default)]
    pub marker_library: Vec<ReferenceConfig>,
    #[serde(default)]
    pub image_library: Vec<ReferenceConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            planes: true,
            anchors: true,
            objects: false,
            markers: false,
            images: false,
            persistence: false,
            object_library: Vec::new(),
            marker_library: Vec::new(),
            image_library: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One reference library entry as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// `scheme` to match every id, or `scheme-id` for one id
    pub name: String,
    /// Physical size in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f32>,
    /// Provider handle for the reference data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
}

impl ReferenceConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            handle: None,
        }
    }

    pub fn to_entry(&self) -> Result<ReferenceEntry, ReferenceParseError> {
        let mut entry = ReferenceEntry::parse_name(&self.name)?;
        entry.physical_size = self.size;
        entry.native_handle = self.handle;
        Ok(entry)
    }
}

impl SessionConfig {
    pub fn is_enabled(&self, kind: TrackableKind) -> bool {
        match kind {
            TrackableKind::Plane => self.planes,
            TrackableKind::Anchor => self.anchors,
            TrackableKind::Object => self.objects,
            TrackableKind::Marker => self.markers,
            TrackableKind::Image => self.images,
        }
    }

    pub fn library_entries(&self, kind: TrackableKind) -> &[ReferenceConfig] {
        match kind {
            TrackableKind::Object => &self.object_library,
            TrackableKind::Marker => &self.marker_library,
            TrackableKind::Image => &self.image_library,
            TrackableKind::Plane | TrackableKind::Anchor => &[],
        }
    }

    /// Parse the configured entries for a reference-driven kind.
    ///
    /// Returns every name that failed to parse, not just the first.
    pub fn library(&self, kind: TrackableKind) -> Result<ReferenceLibrary, Vec<ReferenceParseError>> {
        let mut library = ReferenceLibrary::new(kind);
        let mut errors = Vec::new();
        for config in self.library_entries(kind) {
            match config.to_entry() {
                Ok(entry) => library.push(entry),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(library)
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ReferenceScheme, ReferenceTarget};

    #[test]
    fn test_defaults_track_planes_and_anchors() {
        let config: SessionConfig = toml::from_str("").unwrap();
        assert!(config.is_enabled(TrackableKind::Plane));
        assert!(config.is_enabled(TrackableKind::Anchor));
        assert!(!config.is_enabled(TrackableKind::Marker));
        assert!(!config.persistence);
    }

    #[test]
    fn test_library_from_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            markers = true

            [[marker_library]]
            name = "qr"

            [[marker_library]]
            name = "apriltag36h11-5"
            size = 0.16
            "#,
        )
        .unwrap();

        let library = config.library(TrackableKind::Marker).unwrap();
        assert_eq!(library.entries().len(), 2);
        assert_eq!(library.entries()[0].target, ReferenceTarget::All);
        assert_eq!(library.entries()[1].scheme, ReferenceScheme::AprilTag36h11);
        assert_eq!(library.entries()[1].physical_size, Some(0.16));
    }

    #[test]
    fn test_library_reports_every_bad_name() {
        let config = SessionConfig {
            image_library: vec![
                ReferenceConfig::named("nonsense"),
                ReferenceConfig::named("image-1"),
                ReferenceConfig::named("image-x"),
            ],
            ..SessionConfig::default()
        };
        assert_eq!(config.library(TrackableKind::Image).unwrap_err().len(), 2);
    }
}
