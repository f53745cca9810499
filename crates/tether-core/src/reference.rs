//! Reference libraries - Known markers, images, and objects the provider detects
//!
//! A reference library must be validated and activated before the provider
//! reports any additions for marker, image, or object trackables. Entries are
//! authored externally as reference names of the form `scheme` (match every
//! id of the scheme) or `scheme-id` (one explicit id), e.g. `qr` or
//! `apriltag36h11-12`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use thiserror::Error;

use crate::trackable::TrackableKind;

/// Decoding scheme or dictionary a reference entry belongs to
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReferenceScheme {
    #[serde(rename = "aruco4x4_50")]
    Aruco4x4_50,
    #[serde(rename = "aruco4x4_100")]
    Aruco4x4_100,
    #[serde(rename = "aruco5x5_100")]
    Aruco5x5_100,
    #[serde(rename = "aruco6x6_250")]
    Aruco6x6_250,
    #[serde(rename = "apriltag16h5")]
    AprilTag16h5,
    #[serde(rename = "apriltag25h9")]
    AprilTag25h9,
    #[serde(rename = "apriltag36h10")]
    AprilTag36h10,
    #[serde(rename = "apriltag36h11")]
    AprilTag36h11,
    #[serde(rename = "qr")]
    Qr,
    #[serde(rename = "ean13")]
    Ean13,
    #[serde(rename = "upca")]
    UpcA,
    #[serde(rename = "code128")]
    Code128,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "object")]
    Object,
}

impl ReferenceScheme {
    pub const ALL: [ReferenceScheme; 14] = [
        Self::Aruco4x4_50,
        Self::Aruco4x4_100,
        Self::Aruco5x5_100,
        Self::Aruco6x6_250,
        Self::AprilTag16h5,
        Self::AprilTag25h9,
        Self::AprilTag36h10,
        Self::AprilTag36h11,
        Self::Qr,
        Self::Ean13,
        Self::UpcA,
        Self::Code128,
        Self::Image,
        Self::Object,
    ];

    /// Token used in reference names
    pub fn token(self) -> &'static str {
        match self {
            Self::Aruco4x4_50 => "aruco4x4_50",
            Self::Aruco4x4_100 => "aruco4x4_100",
            Self::Aruco5x5_100 => "aruco5x5_100",
            Self::Aruco6x6_250 => "aruco6x6_250",
            Self::AprilTag16h5 => "apriltag16h5",
            Self::AprilTag25h9 => "apriltag25h9",
            Self::AprilTag36h10 => "apriltag36h10",
            Self::AprilTag36h11 => "apriltag36h11",
            Self::Qr => "qr",
            Self::Ean13 => "ean13",
            Self::UpcA => "upca",
            Self::Code128 => "code128",
            Self::Image => "image",
            Self::Object => "object",
        }
    }

    /// Case-insensitive lookup by token
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.token().eq_ignore_ascii_case(token))
    }

    /// Trackable kind whose library this scheme belongs to
    pub fn kind(self) -> TrackableKind {
        match self {
            Self::Image => TrackableKind::Image,
            Self::Object => TrackableKind::Object,
            _ => TrackableKind::Marker,
        }
    }

    /// Number of distinct ids in a fixed dictionary, if the scheme has one
    pub fn dictionary_size(self) -> Option<u32> {
        match self {
            Self::Aruco4x4_50 => Some(50),
            Self::Aruco4x4_100 | Self::Aruco5x5_100 => Some(100),
            Self::Aruco6x6_250 => Some(250),
            Self::AprilTag16h5 => Some(30),
            Self::AprilTag25h9 => Some(35),
            Self::AprilTag36h10 => Some(2320),
            Self::AprilTag36h11 => Some(587),
            _ => None,
        }
    }

    /// Barcode schemes carry decoded content rather than a dictionary id
    pub fn is_barcode(self) -> bool {
        matches!(self, Self::Qr | Self::Ean13 | Self::UpcA | Self::Code128)
    }

    /// Stable numeric code used in native records
    pub fn code(self) -> u32 {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .map(|i| i as u32)
            .unwrap_or(u32::MAX)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl std::fmt::Display for ReferenceScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Which ids of a scheme an entry covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceTarget {
    All,
    Id(u32),
}

impl std::fmt::Display for ReferenceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::Id(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceParseError {
    #[error("Empty reference name")]
    Empty,
    #[error("Unknown reference scheme: {0}")]
    UnknownScheme(String),
    #[error("Invalid identifier in reference name {name}: {reason}")]
    InvalidId { name: String, reason: String },
}

/// One entry in a reference library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub scheme: ReferenceScheme,
    pub target: ReferenceTarget,
    /// Physical edge length in meters, when known
    #[serde(default)]
    pub physical_size: Option<f32>,
    /// Provider-side handle for reference data (image or object model)
    #[serde(default)]
    pub native_handle: Option<u64>,
}

impl ReferenceEntry {
    pub fn new(scheme: ReferenceScheme, target: ReferenceTarget) -> Self {
        Self {
            scheme,
            target,
            physical_size: None,
            native_handle: None,
        }
    }

    pub fn with_size(mut self, size: f32) -> Self {
        self.physical_size = Some(size);
        self
    }

    pub fn with_native_handle(mut self, handle: u64) -> Self {
        self.native_handle = Some(handle);
        self
    }

    /// Parse a reference name (`scheme` or `scheme-id`)
    pub fn parse_name(name: &str) -> Result<Self, ReferenceParseError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ReferenceParseError::Empty);
        }

        let (token, id) = match name.split_once('-') {
            Some((token, id)) => (token, Some(id)),
            None => (name, None),
        };

        let scheme = ReferenceScheme::from_token(token)
            .ok_or_else(|| ReferenceParseError::UnknownScheme(token.to_string()))?;

        let target = match id {
            None => ReferenceTarget::All,
            Some(id) => {
                let id = id.parse::<u32>().map_err(|e| ReferenceParseError::InvalidId {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                ReferenceTarget::Id(id)
            }
        };

        Ok(Self::new(scheme, target))
    }

    /// Reference name for this entry, the inverse of [`parse_name`](Self::parse_name)
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Whether a detection of `scheme`/`id` is covered by this entry
    pub fn matches(&self, scheme: ReferenceScheme, id: u32) -> bool {
        self.scheme == scheme
            && match self.target {
                ReferenceTarget::All => true,
                ReferenceTarget::Id(own) => own == id,
            }
    }
}

impl std::fmt::Display for ReferenceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            ReferenceTarget::All => write!(f, "{}", self.scheme),
            ReferenceTarget::Id(id) => write!(f, "{}-{}", self.scheme, id),
        }
    }
}

impl FromStr for ReferenceEntry {
    type Err = ReferenceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_name(s)
    }
}

/// A problem that prevents a reference library from being activated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReferenceViolation {
    #[error("Reference library for {0} is empty")]
    Empty(TrackableKind),
    #[error("Duplicate reference entry {scheme}-{target}")]
    DuplicateEntry {
        scheme: ReferenceScheme,
        target: ReferenceTarget,
    },
    #[error("Scheme {0} has a match-all entry alongside explicit entries")]
    MatchAllConflict(ReferenceScheme),
    #[error("Scheme {scheme} does not belong to a {kind} library")]
    WrongKind {
        scheme: ReferenceScheme,
        kind: TrackableKind,
    },
    #[error("Reference entry {name} has non-positive physical size {size}")]
    InvalidSize { name: String, size: f32 },
    #[error("Id {id} is outside dictionary {scheme} (size {size})")]
    IdOutOfRange {
        scheme: ReferenceScheme,
        id: u32,
        size: u32,
    },
}

/// Every violation found in a reference library
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(Vec<ReferenceViolation>);

impl ValidationErrors {
    pub fn violations(&self) -> &[ReferenceViolation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ReferenceViolation;
    type IntoIter = std::vec::IntoIter<ReferenceViolation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} reference library violation(s)", self.0.len())?;
        for violation in &self.0 {
            write!(f, "; {}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// An unvalidated reference library for one trackable kind
#[derive(Debug, Clone)]
pub struct ReferenceLibrary {
    kind: TrackableKind,
    entries: Vec<ReferenceEntry>,
}

impl ReferenceLibrary {
    pub fn new(kind: TrackableKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn with_entries(kind: TrackableKind, entries: Vec<ReferenceEntry>) -> Self {
        Self { kind, entries }
    }

    pub fn push(&mut self, entry: ReferenceEntry) {
        self.entries.push(entry);
    }

    pub fn kind(&self) -> TrackableKind {
        self.kind
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    /// Collect every violation. Does not stop at the first one.
    pub fn validate(&self) -> Vec<ReferenceViolation> {
        let mut violations = Vec::new();

        if self.entries.is_empty() {
            violations.push(ReferenceViolation::Empty(self.kind));
            return violations;
        }

        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut match_all = BTreeSet::new();
        let mut explicit = BTreeSet::new();

        for entry in &self.entries {
            if entry.scheme.kind() != self.kind {
                violations.push(ReferenceViolation::WrongKind {
                    scheme: entry.scheme,
                    kind: self.kind,
                });
            }

            if let Some(size) = entry.physical_size {
                if !(size > 0.0) {
                    violations.push(ReferenceViolation::InvalidSize {
                        name: entry.name(),
                        size,
                    });
                }
            }

            let key = (entry.scheme, entry.target);
            if !seen.insert(key) && reported.insert(key) {
                violations.push(ReferenceViolation::DuplicateEntry {
                    scheme: entry.scheme,
                    target: entry.target,
                });
            }

            match entry.target {
                ReferenceTarget::All => {
                    match_all.insert(entry.scheme);
                }
                ReferenceTarget::Id(id) => {
                    explicit.insert(entry.scheme);
                    if let Some(size) = entry.scheme.dictionary_size() {
                        if id >= size {
                            violations.push(ReferenceViolation::IdOutOfRange {
                                scheme: entry.scheme,
                                id,
                                size,
                            });
                        }
                    }
                }
            }
        }

        for scheme in match_all.intersection(&explicit) {
            violations.push(ReferenceViolation::MatchAllConflict(*scheme));
        }

        violations
    }

    /// Validate and, if clean, produce a configuration ready for activation
    pub fn build(self) -> Result<ActivatedConfiguration, ValidationErrors> {
        let violations = self.validate();
        if !violations.is_empty() {
            return Err(ValidationErrors(violations));
        }
        Ok(ActivatedConfiguration {
            kind: self.kind,
            entries: self.entries,
        })
    }
}

/// A validated reference library, ready to hand to the provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivatedConfiguration {
    kind: TrackableKind,
    entries: Vec<ReferenceEntry>,
}

impl ActivatedConfiguration {
    pub fn kind(&self) -> TrackableKind {
        self.kind
    }

    pub fn entries(&self) -> &[ReferenceEntry] {
        &self.entries
    }

    /// Schemes covered by this configuration
    pub fn schemes(&self) -> BTreeSet<ReferenceScheme> {
        self.entries.iter().map(|e| e.scheme).collect()
    }

    /// Find the entry covering a detection, explicit entries first
    pub fn find_match(&self, scheme: ReferenceScheme, id: u32) -> Option<&ReferenceEntry> {
        self.entries
            .iter()
            .find(|e| e.target == ReferenceTarget::Id(id) && e.scheme == scheme)
            .or_else(|| self.entries.iter().find(|e| e.matches(scheme, id)))
    }

    pub fn matches(&self, scheme: ReferenceScheme, id: u32) -> bool {
        self.find_match(scheme, id).is_some()
    }
}
