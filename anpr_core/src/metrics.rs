//! Pipeline statistics: per-camera counters, mergeable across cameras.

use crate::{events::EventStats, types::CameraId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accumulated counters for one camera pipeline (or a merged set).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Frames processed
    pub frames: u64,
    /// Frames whose timestamp did not increase
    pub out_of_order_frames: u64,
    pub detections_seen: u64,
    /// Malformed or below the confidence floor
    pub detections_discarded: u64,
    pub births: u64,
    pub confirmations: u64,
    pub losses: u64,
    pub recoveries: u64,
    pub deletions: u64,
    pub plate_samples_recorded: u64,
    /// Low confidence, malformed text or unknown track
    pub plate_samples_rejected: u64,
    pub plates_locked: u64,
    pub entries: u64,
    pub exits: u64,
    pub duplicates_suppressed: u64,
    pub withheld_for_plate: u64,
    pub sink_failures: u64,
    /// Wall-clock processing time over all frames, microseconds
    pub total_time_us: u64,
}

impl PipelineStats {
    /// Fold another camera's counters into this one.
    pub fn merge(&mut self, other: &PipelineStats) {
        self.frames += other.frames;
        self.out_of_order_frames += other.out_of_order_frames;
        self.detections_seen += other.detections_seen;
        self.detections_discarded += other.detections_discarded;
        self.births += other.births;
        self.confirmations += other.confirmations;
        self.losses += other.losses;
        self.recoveries += other.recoveries;
        self.deletions += other.deletions;
        self.plate_samples_recorded += other.plate_samples_recorded;
        self.plate_samples_rejected += other.plate_samples_rejected;
        self.plates_locked += other.plates_locked;
        self.entries += other.entries;
        self.exits += other.exits;
        self.duplicates_suppressed += other.duplicates_suppressed;
        self.withheld_for_plate += other.withheld_for_plate;
        self.sink_failures += other.sink_failures;
        self.total_time_us += other.total_time_us;
    }

    /// Copy the event engine's counters (they are cumulative).
    pub fn absorb_events(&mut self, events: &EventStats) {
        self.entries = events.entries;
        self.exits = events.exits;
        self.duplicates_suppressed = events.duplicates_suppressed;
        self.withheld_for_plate = events.withheld_for_plate;
    }

    /// Mean processing time per frame in microseconds.
    pub fn mean_frame_time_us(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.total_time_us as f64 / self.frames as f64
    }
}

/// Per-camera statistics plus their total.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsReport {
    pub cameras: BTreeMap<CameraId, PipelineStats>,
    pub total: PipelineStats,
}

impl StatsReport {
    pub fn add(&mut self, camera: CameraId, stats: PipelineStats) {
        self.total.merge(&stats);
        self.cameras.entry(camera).or_default().merge(&stats);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn merge_adds_counters() {
        let a = PipelineStats {
            frames: 10,
            entries: 2,
            total_time_us: 100,
            ..Default::default()
        };
        let b = PipelineStats {
            frames: 5,
            exits: 1,
            total_time_us: 50,
            ..Default::default()
        };
        let mut report = StatsReport::default();
        report.add(CameraId(0), a);
        report.add(CameraId(1), b);
        assert_eq!(report.total.frames, 15);
        assert_eq!(report.total.entries, 2);
        assert_eq!(report.total.exits, 1);
        assert_eq!(report.cameras.len(), 2);
        assert_abs_diff_eq!(report.total.mean_frame_time_us(), 10.0);
    }

    #[test]
    fn empty_stats_have_zero_mean() {
        assert_eq!(PipelineStats::default().mean_frame_time_us(), 0.0);
    }
}
