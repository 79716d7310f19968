//! Track: filter state, lifecycle status, class vote and box history.

use crate::{
    geometry::BBox,
    kf::state_to_bbox,
    types::{StateCov, StateVec, Timestamp, TrackId, VehicleClass},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle status of a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Not yet confirmed, may be spurious
    Tentative,
    /// Seen on `min_hits` consecutive frames
    Confirmed,
    /// Confirmed but missed on the latest frame(s), may recover
    Lost,
    /// Terminal; removed from the live set at the end of the frame
    Deleted,
}

/// Advisory lifecycle notification for observers (dashboards, metrics).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleKind {
    Created,
    Confirmed,
    Lost,
    Recovered,
    Deleted,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub track_id: TrackId,
    pub kind: LifecycleKind,
    pub timestamp: Timestamp,
}

/// A single vehicle track.
#[derive(Clone, Debug)]
pub struct Track {
    /// Unique identifier, never reused
    pub id: TrackId,
    /// Filter state [cx, cy, w, h, vx, vy]
    pub state: StateVec,
    /// Filter covariance
    pub cov: StateCov,
    /// Current box estimate (prediction on missed frames)
    pub bbox: BBox,
    pub status: TrackStatus,
    /// Consecutive associated frames
    pub hits: u32,
    /// Consecutive missed frames
    pub misses: u32,
    /// Total associated frames over the lifetime
    pub total_hits: u32,
    /// Majority-vote vehicle class
    pub class: VehicleClass,
    class_votes: [u32; 5],
    last_class: VehicleClass,
    /// Confidence of the last associated detection
    pub confidence: f64,
    pub born_at: Timestamp,
    /// Time of the last associated detection
    pub last_updated: Timestamp,
    /// Centre y over frame height at the last associated detection
    pub last_norm_y: f64,
    /// Past box estimates (most recent last)
    pub history: VecDeque<BBox>,
    history_len: usize,
}

impl Track {
    /// Create a new tentative track. Birth counts as the first hit.
    pub fn new(
        id: TrackId,
        state: StateVec,
        cov: StateCov,
        class: VehicleClass,
        confidence: f64,
        birth_time: Timestamp,
        frame_height: f64,
        history_len: usize,
    ) -> Self {
        let bbox = state_to_bbox(&state);
        let mut history = VecDeque::with_capacity(history_len.min(256));
        if history_len > 0 {
            history.push_back(bbox);
        }
        let mut class_votes = [0u32; 5];
        class_votes[class.index()] = 1;
        Self {
            id,
            state,
            cov,
            bbox,
            status: TrackStatus::Tentative,
            hits: 1,
            misses: 0,
            total_hits: 1,
            class,
            class_votes,
            last_class: class,
            confidence,
            born_at: birth_time,
            last_updated: birth_time,
            last_norm_y: normalized_y(&bbox, frame_height),
            history,
            history_len,
        }
    }

    /// True until the track is deleted.
    pub fn is_live(&self) -> bool {
        self.status != TrackStatus::Deleted
    }

    /// Replace filter state and refresh the derived box.
    pub fn set_estimate(&mut self, state: StateVec, cov: StateCov) {
        self.state = state;
        self.cov = cov;
        self.bbox = state_to_bbox(&state);
    }

    /// Count one class observation. The majority wins; ties go to the most
    /// recently observed class among the tied ones.
    pub fn record_class(&mut self, class: VehicleClass) {
        self.class_votes[class.index()] += 1;
        self.last_class = class;
        let best = self.class_votes.iter().copied().max().unwrap_or(0);
        self.class = if self.class_votes[class.index()] == best {
            class
        } else if self.class_votes[self.class.index()] == best {
            self.class
        } else {
            VehicleClass::ALL
                .iter()
                .copied()
                .find(|c| self.class_votes[c.index()] == best)
                .unwrap_or(self.last_class)
        };
    }

    /// Push the current box to the bounded history.
    pub fn push_history(&mut self) {
        if self.history_len == 0 {
            return;
        }
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(self.bbox);
    }

    /// Centre velocity (vx, vy) per frame.
    pub fn velocity(&self) -> (f64, f64) {
        (self.state[4], self.state[5])
    }

    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }
}

/// Box centre y over frame height. Non-positive heights are treated as a
/// normalised frame (height 1).
pub fn normalized_y(bbox: &BBox, frame_height: f64) -> f64 {
    let h = if frame_height.is_finite() && frame_height > 0.0 {
        frame_height
    } else {
        1.0
    };
    bbox.center().1 / h
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
