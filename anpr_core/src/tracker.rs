//! Track Lifecycle Manager: the per-frame tracking step for one camera.
//!
//! # Processing steps per frame
//! 1. Discard malformed and low-confidence detections
//! 2. Predict all live tracks one frame ahead
//! 3. Associate predicted boxes with detections by IOU
//! 4. Update matched tracks, register misses, birth unmatched detections
//! 5. Prune deleted tracks and hand their final snapshots to the caller

use crate::{
    association::associate,
    config::TrackingConfig,
    geometry::BBox,
    kf::{BoxKalmanFilter, KalmanFilter},
    track::{normalized_y, LifecycleEvent, LifecycleKind, Track, TrackStatus},
    track_manager::TrackManager,
    types::{Detection, Frame, TrackId},
};
use tracing::{debug, info};

/// Outputs of one tracking step.
#[derive(Clone, Debug, Default)]
pub struct TrackerOutput {
    /// Lifecycle notifications in the order they happened
    pub lifecycle: Vec<LifecycleEvent>,
    /// Final snapshots of tracks deleted this frame
    pub deleted: Vec<Track>,
    pub births: usize,
    pub confirmations: usize,
    pub losses: usize,
    pub recoveries: usize,
    pub deletions: usize,
    /// Detections that passed the boundary filter
    pub accepted_detections: usize,
    /// Detections dropped as malformed or below the confidence floor
    pub discarded_detections: usize,
}

impl TrackerOutput {
    fn note(&mut self, track_id: TrackId, kind: LifecycleKind, timestamp: f64) {
        match kind {
            LifecycleKind::Created => self.births += 1,
            LifecycleKind::Confirmed => self.confirmations += 1,
            LifecycleKind::Lost => self.losses += 1,
            LifecycleKind::Recovered => self.recoveries += 1,
            LifecycleKind::Deleted => self.deletions += 1,
        }
        self.lifecycle.push(LifecycleEvent {
            track_id,
            kind,
            timestamp,
        });
    }
}

/// Holds the live track pool, the box filter and the lifecycle policy.
pub struct Tracker {
    pub config: TrackingConfig,
    tracks: Vec<Track>,
    manager: TrackManager,
    kf: BoxKalmanFilter,
}

impl Tracker {
    pub fn new(config: TrackingConfig) -> Self {
        let manager = TrackManager::new(&config);
        let kf = BoxKalmanFilter::new(config.kalman.clone());
        Self {
            config,
            tracks: Vec::new(),
            manager,
            kf,
        }
    }

    /// Live tracks (tentative, confirmed and lost), in birth order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.status == TrackStatus::Confirmed)
    }

    /// Drop every live track. The id counter is not rewound.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    fn accepts(&self, det: &Detection) -> bool {
        if !det.is_well_formed() {
            debug!(bbox = ?det.bbox, confidence = det.confidence, "discarding malformed detection");
            return false;
        }
        det.confidence >= self.config.min_detection_confidence
    }

    /// Run one frame through the tracker.
    pub fn step(&mut self, frame: &Frame) -> TrackerOutput {
        let mut out = TrackerOutput::default();
        let now = frame.timestamp;

        // ----------------------------------------------------------------
        // Step 1: Boundary filter
        // ----------------------------------------------------------------
        let detections: Vec<&Detection> =
            frame.detections.iter().filter(|d| self.accepts(d)).collect();
        out.accepted_detections = detections.len();
        out.discarded_detections = frame.detections.len() - detections.len();

        // ----------------------------------------------------------------
        // Step 2: Predict
        // ----------------------------------------------------------------
        for track in &mut self.tracks {
            let (state, cov) = self.kf.predict(&track.state, &track.cov);
            track.set_estimate(state, cov);
        }

        // ----------------------------------------------------------------
        // Step 3: Associate
        // ----------------------------------------------------------------
        let track_boxes: Vec<BBox> = self.tracks.iter().map(|t| t.bbox).collect();
        let det_boxes: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
        let det_confidences: Vec<f64> = detections.iter().map(|d| d.confidence).collect();
        let assignment = associate(
            &track_boxes,
            &det_boxes,
            &det_confidences,
            self.config.iou_threshold,
            self.config.association,
        );

        // ----------------------------------------------------------------
        // Step 4: Update, miss, birth
        // ----------------------------------------------------------------
        for &(ti, di) in &assignment.pairs {
            let det = detections[di];
            let track = &mut self.tracks[ti];
            match self.kf.update(&track.state, &track.cov, &det.bbox.to_measurement()) {
                Some(res) => track.set_estimate(res.state, res.cov),
                None => debug!(track = %track.id, "singular innovation covariance, keeping prediction"),
            }
            track.record_class(det.class);
            track.confidence = det.confidence;
            track.last_updated = now;
            track.last_norm_y = normalized_y(&track.bbox, frame.height);
            track.push_history();
            if let Some(kind) = self.manager.register_hit(track) {
                match kind {
                    LifecycleKind::Confirmed => info!(track = %track.id, class = %track.class, "track confirmed"),
                    _ => debug!(track = %track.id, "track recovered"),
                }
                out.note(track.id, kind, now);
            }
        }

        for &ti in &assignment.unmatched_tracks {
            let track = &mut self.tracks[ti];
            track.push_history();
            if let Some(kind) = self.manager.register_miss(track) {
                debug!(track = %track.id, misses = track.misses, ?kind, "track missed");
                out.note(track.id, kind, now);
            }
        }

        for &di in &assignment.unmatched_dets {
            let track = self.manager.birth_track(&self.kf, detections[di], now, frame.height);
            out.note(track.id, LifecycleKind::Created, now);
            if track.status == TrackStatus::Confirmed {
                out.note(track.id, LifecycleKind::Confirmed, now);
            }
            self.tracks.push(track);
        }

        // ----------------------------------------------------------------
        // Step 5: Prune
        // ----------------------------------------------------------------
        out.deleted = TrackManager::prune_deleted(&mut self.tracks);
        for t in &out.deleted {
            debug!(track = %t.id, total_hits = t.total_hits, "track deleted");
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
