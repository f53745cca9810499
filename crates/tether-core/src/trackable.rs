//! Trackable kinds and their payloads
//!
//! Payloads are opaque data passed through from the tracking provider. Poses
//! and classifications are never computed here, only carried.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::id::DurableId;
use crate::reference::ReferenceScheme;

/// Kind of entity reported by the tracking provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackableKind {
    Plane,
    Anchor,
    Object,
    Marker,
    Image,
}

impl TrackableKind {
    /// All kinds, in synchronization order
    pub const ALL: [TrackableKind; 5] = [
        Self::Plane,
        Self::Anchor,
        Self::Object,
        Self::Marker,
        Self::Image,
    ];

    /// Whether the provider needs an activated reference library before it
    /// reports any additions of this kind
    pub fn requires_reference_library(self) -> bool {
        matches!(self, Self::Object | Self::Marker | Self::Image)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plane => "plane",
            Self::Anchor => "anchor",
            Self::Object => "object",
            Self::Marker => "marker",
            Self::Image => "image",
        }
    }
}

impl std::fmt::Display for TrackableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackableKind {
    type Err = String;

    /// Accepts singular or plural lowercase names (`plane`, `planes`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        let singular = s.strip_suffix('s').unwrap_or(&s);
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == singular)
            .ok_or_else(|| format!("unknown trackable kind: {}", s))
    }
}

/// Position and orientation (unit quaternion, x/y/z/w) in session space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };

    pub fn from_position(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// How well the provider currently tracks an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingState {
    #[default]
    None,
    Limited,
    Tracking,
}

/// Plane orientation relative to gravity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneAlignment {
    HorizontalUp,
    HorizontalDown,
    Vertical,
    #[default]
    Arbitrary,
}

/// Semantic classification of a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneClass {
    #[default]
    Unknown,
    Floor,
    Ceiling,
    Wall,
    Table,
}

/// A detected planar surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanePayload {
    pub pose: Pose,
    /// Width and height of the bounding rectangle in meters
    pub extents: [f32; 2],
    pub alignment: PlaneAlignment,
    pub class: PlaneClass,
}

/// A spatial anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorPayload {
    pub pose: Pose,
    pub tracking_state: TrackingState,
    /// Durable identifier, when the provider has one for this anchor
    pub durable_id: Option<DurableId>,
}

/// A recognized object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPayload {
    pub pose: Pose,
    /// Index of the matched entry in the object reference library
    pub label: u32,
    pub confidence: f32,
    /// Bounding box in meters
    pub extents: [f32; 3],
}

/// A detected fiducial marker or barcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerPayload {
    pub pose: Pose,
    pub scheme: ReferenceScheme,
    pub marker_id: u32,
    /// Edge length in meters
    pub physical_size: f32,
    /// Decoded content for barcode schemes
    pub decoded: Option<String>,
}

/// A detected reference image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub pose: Pose,
    /// Index of the matched entry in the image reference library
    pub reference_index: u32,
    /// Measured width and height in meters
    pub extents: [f32; 2],
    pub tracking_state: TrackingState,
}

/// A payload type the registry can hold, tagged with its kind
pub trait Trackable: Clone + std::fmt::Debug + Send + Sync + 'static {
    const KIND: TrackableKind;

    fn pose(&self) -> &Pose;
}

impl Trackable for PlanePayload {
    const KIND: TrackableKind = TrackableKind::Plane;

    fn pose(&self) -> &Pose {
        &self.pose
    }
}

impl Trackable for AnchorPayload {
    const KIND: TrackableKind = TrackableKind::Anchor;

    fn pose(&self) -> &Pose {
        &self.pose
    }
}

impl Trackable for ObjectPayload {
    const KIND: TrackableKind = TrackableKind::Object;

    fn pose(&self) -> &Pose {
        &self.pose
    }
}

impl Trackable for MarkerPayload {
    const KIND: TrackableKind = TrackableKind::Marker;

    fn pose(&self) -> &Pose {
        &self.pose
    }
}

impl Trackable for ImagePayload {
    const KIND: TrackableKind = TrackableKind::Image;

    fn pose(&self) -> &Pose {
        &self.pose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("plane".parse::<TrackableKind>().unwrap(), TrackableKind::Plane);
        assert_eq!("Markers".parse::<TrackableKind>().unwrap(), TrackableKind::Marker);
        assert!("mesh".parse::<TrackableKind>().is_err());
    }

    #[test]
    fn test_reference_library_requirement() {
        assert!(!TrackableKind::Plane.requires_reference_library());
        assert!(!TrackableKind::Anchor.requires_reference_library());
        assert!(TrackableKind::Marker.requires_reference_library());
        assert!(TrackableKind::Image.requires_reference_library());
    }
}
