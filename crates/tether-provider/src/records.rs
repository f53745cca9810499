//! Fixed-size native record layouts
//!
//! Every added/updated record starts with the provider's `u64` stable id,
//! followed by kind-specific fields. All layouts are `#[repr(C)]` with no
//! implicit padding and little-endian scalars, so they can be read straight
//! out of a provider buffer.

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;
use tether_core::{
    AnchorPayload, DurableId, ImagePayload, MarkerPayload, ObjectPayload, PlaneAlignment,
    PlaneClass, PlanePayload, Pose, ReferenceScheme, StableId, Trackable, TrackableKind,
    TrackingState,
};
use thiserror::Error;

/// Capacity of the decoded-content field in marker records
pub const MARKER_DECODED_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Record size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Record carries reserved stable id 0")]
    ZeroId,
    #[error("Invalid {field} value {value} in {kind} record")]
    InvalidField {
        kind: TrackableKind,
        field: &'static str,
        value: u32,
    },
    #[error("Invalid UTF-8 in {field} of {kind} record: {source}")]
    InvalidText {
        kind: TrackableKind,
        field: &'static str,
        #[source]
        source: std::str::Utf8Error,
    },
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RawPose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl From<RawPose> for Pose {
    fn from(raw: RawPose) -> Self {
        Pose {
            position: raw.position,
            orientation: raw.orientation,
        }
    }
}

impl From<Pose> for RawPose {
    fn from(pose: Pose) -> Self {
        RawPose {
            position: pose.position,
            orientation: pose.orientation,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawPlane {
    pub id: u64,
    pub pose: RawPose,
    pub extents: [f32; 2],
    pub alignment: u32,
    pub class: u32,
    pub reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawAnchor {
    pub id: u64,
    /// All zero when the anchor has no durable id
    pub durable_id: [u8; 16],
    pub pose: RawPose,
    pub tracking_state: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawObject {
    pub id: u64,
    pub pose: RawPose,
    pub extents: [f32; 3],
    pub label: u32,
    pub confidence: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawMarker {
    pub id: u64,
    pub pose: RawPose,
    pub scheme: u32,
    pub marker_id: u32,
    pub physical_size: f32,
    pub decoded_len: u32,
    pub decoded: [u8; MARKER_DECODED_CAPACITY],
    pub reserved: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct RawImage {
    pub id: u64,
    pub pose: RawPose,
    pub extents: [f32; 2],
    pub reference_index: u32,
    pub tracking_state: u32,
    pub reserved: u32,
}

/// A payload with a fixed native record layout
pub trait NativeRecord: Trackable {
    type Raw: Pod;

    fn from_raw(raw: &Self::Raw) -> Result<(StableId, Self), DecodeError>;

    fn to_raw(&self, id: StableId) -> Self::Raw;

    /// Reference library entry this payload was matched against, if the
    /// kind is reference-driven
    fn reference_key(&self) -> Option<(ReferenceScheme, u32)> {
        None
    }
}

/// Record size the provider reports for a kind
pub fn record_size(kind: TrackableKind) -> usize {
    match kind {
        TrackableKind::Plane => size_of::<RawPlane>(),
        TrackableKind::Anchor => size_of::<RawAnchor>(),
        TrackableKind::Object => size_of::<RawObject>(),
        TrackableKind::Marker => size_of::<RawMarker>(),
        TrackableKind::Image => size_of::<RawImage>(),
    }
}

/// Decode one added/updated record
pub fn decode_record<T: NativeRecord>(bytes: &[u8]) -> Result<(StableId, T), DecodeError> {
    let expected = size_of::<T::Raw>();
    if bytes.len() != expected {
        return Err(DecodeError::SizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    let raw: T::Raw = bytemuck::pod_read_unaligned(bytes);
    T::from_raw(&raw)
}

/// Decode one entry of a removed list
pub fn decode_removed(bytes: &[u8]) -> Result<StableId, DecodeError> {
    if bytes.len() != size_of::<u64>() {
        return Err(DecodeError::SizeMismatch {
            expected: size_of::<u64>(),
            actual: bytes.len(),
        });
    }
    let id = u64::from_le_bytes(bytemuck::pod_read_unaligned(bytes));
    stable_id(id)
}

/// Encode a payload into its native record bytes
pub fn encode_record<T: NativeRecord>(id: StableId, payload: &T) -> Vec<u8> {
    bytemuck::bytes_of(&payload.to_raw(id)).to_vec()
}

fn stable_id(raw: u64) -> Result<StableId, DecodeError> {
    if raw == 0 {
        Err(DecodeError::ZeroId)
    } else {
        Ok(StableId(raw))
    }
}

fn tracking_state(kind: TrackableKind, value: u32) -> Result<TrackingState, DecodeError> {
    match value {
        0 => Ok(TrackingState::None),
        1 => Ok(TrackingState::Limited),
        2 => Ok(TrackingState::Tracking),
        _ => Err(DecodeError::InvalidField {
            kind,
            field: "tracking_state",
            value,
        }),
    }
}

fn tracking_state_code(state: TrackingState) -> u32 {
    match state {
        TrackingState::None => 0,
        TrackingState::Limited => 1,
        TrackingState::Tracking => 2,
    }
}

impl NativeRecord for PlanePayload {
    type Raw = RawPlane;

    fn from_raw(raw: &RawPlane) -> Result<(StableId, Self), DecodeError> {
        let id = stable_id(raw.id)?;
        let alignment = match raw.alignment {
            0 => PlaneAlignment::HorizontalUp,
            1 => PlaneAlignment::HorizontalDown,
            2 => PlaneAlignment::Vertical,
            3 => PlaneAlignment::Arbitrary,
            value => {
                return Err(DecodeError::InvalidField {
                    kind: TrackableKind::Plane,
                    field: "alignment",
                    value,
                })
            }
        };
        // Unrecognized semantic labels degrade to Unknown
        let class = match raw.class {
            1 => PlaneClass::Floor,
            2 => PlaneClass::Ceiling,
            3 => PlaneClass::Wall,
            4 => PlaneClass::Table,
            _ => PlaneClass::Unknown,
        };
        Ok((
            id,
            PlanePayload {
                pose: raw.pose.into(),
                extents: raw.extents,
                alignment,
                class,
            },
        ))
    }

    fn to_raw(&self, id: StableId) -> RawPlane {
        RawPlane {
            id: id.as_u64(),
            pose: self.pose.into(),
            extents: self.extents,
            alignment: match self.alignment {
                PlaneAlignment::HorizontalUp => 0,
                PlaneAlignment::HorizontalDown => 1,
                PlaneAlignment::Vertical => 2,
                PlaneAlignment::Arbitrary => 3,
            },
            class: match self.class {
                PlaneClass::Unknown => 0,
                PlaneClass::Floor => 1,
                PlaneClass::Ceiling => 2,
                PlaneClass::Wall => 3,
                PlaneClass::Table => 4,
            },
            reserved: 0,
        }
    }
}

impl NativeRecord for AnchorPayload {
    type Raw = RawAnchor;

    fn from_raw(raw: &RawAnchor) -> Result<(StableId, Self), DecodeError> {
        let id = stable_id(raw.id)?;
        Ok((
            id,
            AnchorPayload {
                pose: raw.pose.into(),
                tracking_state: tracking_state(TrackableKind::Anchor, raw.tracking_state)?,
                durable_id: DurableId::from_bytes(raw.durable_id),
            },
        ))
    }

    fn to_raw(&self, id: StableId) -> RawAnchor {
        RawAnchor {
            id: id.as_u64(),
            durable_id: self.durable_id.map(DurableId::to_bytes).unwrap_or([0; 16]),
            pose: self.pose.into(),
            tracking_state: tracking_state_code(self.tracking_state),
        }
    }
}

impl NativeRecord for ObjectPayload {
    type Raw = RawObject;

    fn from_raw(raw: &RawObject) -> Result<(StableId, Self), DecodeError> {
        let id = stable_id(raw.id)?;
        Ok((
            id,
            ObjectPayload {
                pose: raw.pose.into(),
                label: raw.label,
                confidence: raw.confidence,
                extents: raw.extents,
            },
        ))
    }

    fn to_raw(&self, id: StableId) -> RawObject {
        RawObject {
            id: id.as_u64(),
            pose: self.pose.into(),
            extents: self.extents,
            label: self.label,
            confidence: self.confidence,
        }
    }

    fn reference_key(&self) -> Option<(ReferenceScheme, u32)> {
        Some((ReferenceScheme::Object, self.label))
    }
}

impl NativeRecord for MarkerPayload {
    type Raw = RawMarker;

    fn from_raw(raw: &RawMarker) -> Result<(StableId, Self), DecodeError> {
        let id = stable_id(raw.id)?;
        let scheme = ReferenceScheme::from_code(raw.scheme)
            .filter(|s| s.kind() == TrackableKind::Marker)
            .ok_or(DecodeError::InvalidField {
                kind: TrackableKind::Marker,
                field: "scheme",
                value: raw.scheme,
            })?;

        let len = raw.decoded_len as usize;
        if len > MARKER_DECODED_CAPACITY {
            return Err(DecodeError::InvalidField {
                kind: TrackableKind::Marker,
                field: "decoded_len",
                value: raw.decoded_len,
            });
        }
        let decoded = if scheme.is_barcode() && len > 0 {
            let text = std::str::from_utf8(&raw.decoded[..len]).map_err(|source| {
                DecodeError::InvalidText {
                    kind: TrackableKind::Marker,
                    field: "decoded",
                    source,
                }
            })?;
            Some(text.to_string())
        } else {
            None
        };

        Ok((
            id,
            MarkerPayload {
                pose: raw.pose.into(),
                scheme,
                marker_id: raw.marker_id,
                physical_size: raw.physical_size,
                decoded,
            },
        ))
    }

    fn to_raw(&self, id: StableId) -> RawMarker {
        let mut decoded = [0u8; MARKER_DECODED_CAPACITY];
        let mut decoded_len = 0;
        if let Some(text) = &self.decoded {
            // Truncate to capacity without splitting a character
            let mut len = text.len().min(MARKER_DECODED_CAPACITY);
            while !text.is_char_boundary(len) {
                len -= 1;
            }
            decoded[..len].copy_from_slice(&text.as_bytes()[..len]);
            decoded_len = len as u32;
        }
        RawMarker {
            id: id.as_u64(),
            pose: self.pose.into(),
            scheme: self.scheme.code(),
            marker_id: self.marker_id,
            physical_size: self.physical_size,
            decoded_len,
            decoded,
            reserved: 0,
        }
    }

    fn reference_key(&self) -> Option<(ReferenceScheme, u32)> {
        Some((self.scheme, self.marker_id))
    }
}

impl NativeRecord for ImagePayload {
    type Raw = RawImage;

    fn from_raw(raw: &RawImage) -> Result<(StableId, Self), DecodeError> {
        let id = stable_id(raw.id)?;
        Ok((
            id,
            ImagePayload {
                pose: raw.pose.into(),
                reference_index: raw.reference_index,
                extents: raw.extents,
                tracking_state: tracking_state(TrackableKind::Image, raw.tracking_state)?,
            },
        ))
    }

    fn to_raw(&self, id: StableId) -> RawImage {
        RawImage {
            id: id.as_u64(),
            pose: self.pose.into(),
            extents: self.extents,
            reference_index: self.reference_index,
            tracking_state: tracking_state_code(self.tracking_state),
            reserved: 0,
        }
    }

    fn reference_key(&self) -> Option<(ReferenceScheme, u32)> {
        Some((ReferenceScheme::Image, self.reference_index))
    }
}
