//! Ground-truth vehicle trajectories in normalised image coordinates.
//!
//! A vehicle enters at the top of the frame and drives down the lane at a
//! constant speed. It may turn back (U-turn) or be hidden for a while
//! (occlusion). y grows downward; the frame spans [0, 1] in x and y.

use anpr_core::{BBox, VehicleClass};
use serde::{Deserialize, Serialize};

/// How the vehicle moves along the lane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MotionSpec {
    /// Constant speed down the lane
    Straight,
    /// Reverse direction once the centre reaches `turn_y`
    UTurn { turn_y: f64 },
}

/// A simulated vehicle with ground-truth state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vehicle {
    /// Unique vehicle ID (ground truth, unrelated to track IDs)
    pub id: u64,
    pub plate: String,
    pub class: VehicleClass,
    /// Box centre
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Vertical speed in frame heights per second (positive = down)
    pub speed: f64,
    pub motion: MotionSpec,
    /// No detections before this time
    pub appear_at: f64,
    /// Hidden from the detector and OCR during [start, end)
    pub occluded: Option<(f64, f64)>,
}

impl Vehicle {
    pub fn new(id: u64, plate: impl Into<String>, x: f64, appear_at: f64) -> Self {
        Self {
            id,
            plate: plate.into(),
            class: VehicleClass::Car,
            x,
            y: -0.05,
            width: 0.18,
            height: 0.1,
            speed: 0.15,
            motion: MotionSpec::Straight,
            appear_at,
            occluded: None,
        }
    }

    pub fn with_class(mut self, class: VehicleClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_motion(mut self, motion: MotionSpec) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_occlusion(mut self, start: f64, end: f64) -> Self {
        self.occluded = Some((start, end));
        self
    }

    /// Propagate the true position by `dt` seconds at sim time `t`.
    pub fn step(&mut self, t: f64, dt: f64) {
        if t < self.appear_at {
            return;
        }
        self.y += self.speed * dt;
        if let MotionSpec::UTurn { turn_y } = self.motion {
            if self.speed > 0.0 && self.y >= turn_y {
                self.speed = -self.speed;
            }
        }
    }

    /// True box, clipped to the frame. `None` once fully outside.
    pub fn bbox(&self) -> Option<BBox> {
        let b = BBox::from_center_size(self.x, self.y, self.width, self.height);
        let clipped = BBox::new(b.x1.max(0.0), b.y1.max(0.0), b.x2.min(1.0), b.y2.min(1.0));
        clipped.is_valid().then_some(clipped)
    }

    /// Whether a camera can see the vehicle at time `t`.
    pub fn is_visible(&self, t: f64) -> bool {
        if t < self.appear_at {
            return false;
        }
        if let Some((start, end)) = self.occluded {
            if t >= start && t < end {
                return false;
            }
        }
        self.bbox().is_some()
    }

    /// Completed its passage (left through the bottom of the frame).
    pub fn has_left(&self) -> bool {
        self.y - self.height / 2.0 >= 1.0 || (self.speed < 0.0 && self.y + self.height / 2.0 <= 0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
