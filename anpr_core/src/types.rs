//! Fundamental types shared by every component of the lane pipeline.

use crate::geometry::BBox;
use nalgebra::{Matrix6, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Filter state: [cx, cy, w, h, vx, vy] in image units, one step = one frame.
// ---------------------------------------------------------------------------

/// Box filter state vector: [cx, cy, w, h, vx, vy]
pub type StateVec = Vector6<f64>;

/// 6×6 state covariance matrix
pub type StateCov = Matrix6<f64>;

/// Seconds on the caller's clock (frame timestamps).
pub type Timestamp = f64;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CameraId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Vehicle class
// ---------------------------------------------------------------------------

/// Closed set of vehicle categories the lane logs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Motorcycle,
    Bus,
    Truck,
    #[default]
    Unknown,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 5] = [
        VehicleClass::Car,
        VehicleClass::Motorcycle,
        VehicleClass::Bus,
        VehicleClass::Truck,
        VehicleClass::Unknown,
    ];

    /// Map a COCO class id from the detector to a lane vehicle class.
    pub fn from_coco_id(id: u32) -> Self {
        match id {
            2 => VehicleClass::Car,
            3 => VehicleClass::Motorcycle,
            5 => VehicleClass::Bus,
            7 => VehicleClass::Truck,
            _ => VehicleClass::Unknown,
        }
    }

    /// Map a free-form detector label. Unrecognised labels become `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" => VehicleClass::Car,
            "motorcycle" | "motorbike" => VehicleClass::Motorcycle,
            "bus" => VehicleClass::Bus,
            "truck" => VehicleClass::Truck,
            _ => VehicleClass::Unknown,
        }
    }

    /// Dense index used by the per-track class vote.
    pub fn index(self) -> usize {
        match self {
            VehicleClass::Car => 0,
            VehicleClass::Motorcycle => 1,
            VehicleClass::Bus => 2,
            VehicleClass::Truck => 3,
            VehicleClass::Unknown => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
            VehicleClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Perception inputs
// ---------------------------------------------------------------------------

/// A single vehicle detection produced by the external detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box corners (x1, y1, x2, y2), pixel or normalised coordinates
    pub bbox: BBox,
    /// Detector score in [0, 1]
    pub confidence: f64,
    pub class: VehicleClass,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64, class: VehicleClass) -> Self {
        Self {
            bbox,
            confidence,
            class,
        }
    }

    /// Well-formed box and a finite confidence inside [0, 1].
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_valid() && self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// One OCR reading, tagged by the orchestrator with the track it believes
/// the plate belongs to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateCandidate {
    pub track_id: TrackId,
    /// Raw OCR text (normalised by the fusion engine on ingest)
    pub text: String,
    pub confidence: f64,
    pub timestamp: Timestamp,
}

impl PlateCandidate {
    pub fn new(track_id: TrackId, text: impl Into<String>, confidence: f64, timestamp: Timestamp) -> Self {
        Self {
            track_id,
            text: text.into(),
            confidence,
            timestamp,
        }
    }
}

/// Everything the core consumes for one processed frame of one camera.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Frame {
    /// Monotonic frame counter assigned by the acquisition side
    pub index: u64,
    /// Capture time in seconds
    pub timestamp: Timestamp,
    /// Frame height in the same units as the boxes (1.0 for normalised boxes)
    pub height: f64,
    pub detections: Vec<Detection>,
    pub plates: Vec<PlateCandidate>,
}

impl Frame {
    pub fn new(index: u64, timestamp: Timestamp, height: f64) -> Self {
        Self {
            index,
            timestamp,
            height,
            detections: Vec::new(),
            plates: Vec::new(),
        }
    }

    pub fn with_detections(mut self, detections: Vec<Detection>) -> Self {
        self.detections = detections;
        self
    }

    pub fn with_plates(mut self, plates: Vec<PlateCandidate>) -> Self {
        self.plates = plates;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
