//! Configuration for the lane core: tracking, plate fusion and event rules.
//!
//! Every struct carries `#[serde(default)]` so a partial JSON document only
//! overrides the keys it names.

use crate::{association::AssociationMethod, kf::KalmanConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration value.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        key: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{key} must be at least 1")]
    Zero { key: &'static str },
    #[error("entry threshold {entry} must lie below exit threshold {exit}")]
    ThresholdOrder { entry: f64, exit: f64 },
    #[error("frame margin {margin} must lie below entry threshold {entry}")]
    MarginOrder { margin: f64, entry: f64 },
}

// ---------------------------------------------------------------------------
// Tracking
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Detections below this score are discarded before association
    pub min_detection_confidence: f64,
    /// Minimum IOU for a track/detection pair to be associable
    pub iou_threshold: f64,
    /// Consecutive hits to confirm a tentative track
    pub min_hits: u32,
    /// Consecutive misses a lost track survives
    pub max_lost_frames: u32,
    pub association: AssociationMethod,
    /// Box history kept per track
    pub history_len: usize,
    pub kalman: KalmanConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.4,
            iou_threshold: 0.3,
            min_hits: 3,
            max_lost_frames: 30,
            association: AssociationMethod::Greedy,
            history_len: 64,
            kalman: KalmanConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Fusion
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// OCR samples at or below this confidence are discarded
    pub min_plate_confidence: f64,
    /// Per-track sample history cap (FIFO)
    pub max_samples: usize,
    /// Cluster support that locks the fused plate
    pub fusion_min_samples: usize,
    /// Maximum edit distance between two samples of one cluster
    pub cluster_radius: usize,
    /// Normalised texts shorter than this are malformed
    pub min_plate_len: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            min_plate_confidence: 0.6,
            max_samples: 5,
            fusion_min_samples: 3,
            cluster_radius: 2,
            min_plate_len: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Normalised y of the entry line
    pub entry_y_threshold: f64,
    /// Normalised y of the exit line
    pub exit_y_threshold: f64,
    /// Band at the top of the frame ignored for approach
    pub frame_margin: f64,
    /// Seconds a track must spend approaching before it may enter
    pub min_dwell_time: f64,
    /// Seconds between entry and exit before EXIT may be logged
    pub min_inside_time: f64,
    /// Seconds a (camera, plate, kind) stays in the dedup cache
    pub dedup_window: f64,
    /// Optional hard cap on dedup cache entries (oldest evicted)
    pub dedup_capacity: Option<usize>,
    pub require_plate_for_entry: bool,
    pub require_plate_for_exit: bool,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            entry_y_threshold: 0.6,
            exit_y_threshold: 0.9,
            frame_margin: 0.05,
            min_dwell_time: 1.0,
            min_inside_time: 2.0,
            dedup_window: 60.0,
            dedup_capacity: None,
            require_plate_for_entry: false,
            require_plate_for_exit: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnprConfig {
    pub tracking: TrackingConfig,
    pub fusion: FusionConfig,
    pub events: EventConfig,
}

fn check_range(key: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { key, value, min, max })
    }
}

fn check_nonzero(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero { key })
    } else {
        Ok(())
    }
}

impl AnprConfig {
    /// Check every value before pipelines are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.tracking;
        check_range("tracking.min_detection_confidence", t.min_detection_confidence, 0.0, 1.0)?;
        check_range("tracking.iou_threshold", t.iou_threshold, 0.0, 1.0)?;
        check_nonzero("tracking.min_hits", t.min_hits as usize)?;
        check_nonzero("tracking.max_lost_frames", t.max_lost_frames as usize)?;
        let k = &t.kalman;
        check_range("tracking.kalman.position_std_weight", k.position_std_weight, 0.0, f64::MAX)?;
        check_range("tracking.kalman.velocity_std_weight", k.velocity_std_weight, 0.0, f64::MAX)?;
        check_range("tracking.kalman.size_std_weight", k.size_std_weight, 0.0, f64::MAX)?;

        let f = &self.fusion;
        check_range("fusion.min_plate_confidence", f.min_plate_confidence, 0.0, 1.0)?;
        check_nonzero("fusion.max_samples", f.max_samples)?;
        check_nonzero("fusion.fusion_min_samples", f.fusion_min_samples)?;
        check_nonzero("fusion.min_plate_len", f.min_plate_len)?;

        let e = &self.events;
        check_range("events.entry_y_threshold", e.entry_y_threshold, 0.0, 1.0)?;
        check_range("events.exit_y_threshold", e.exit_y_threshold, 0.0, 1.0)?;
        check_range("events.frame_margin", e.frame_margin, 0.0, 1.0)?;
        check_range("events.min_dwell_time", e.min_dwell_time, 0.0, f64::MAX)?;
        check_range("events.min_inside_time", e.min_inside_time, 0.0, f64::MAX)?;
        check_range("events.dedup_window", e.dedup_window, 0.0, f64::MAX)?;
        if let Some(cap) = e.dedup_capacity {
            check_nonzero("events.dedup_capacity", cap)?;
        }
        if e.entry_y_threshold >= e.exit_y_threshold {
            return Err(ConfigError::ThresholdOrder {
                entry: e.entry_y_threshold,
                exit: e.exit_y_threshold,
            });
        }
        if e.frame_margin >= e.entry_y_threshold {
            return Err(ConfigError::MarginOrder {
                margin: e.frame_margin,
                entry: e.entry_y_threshold,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(AnprConfig::default().validate(), Ok(()));
    }

    #[test]
    fn partial_json_overrides_only_named_keys() {
        let cfg: AnprConfig =
            serde_json::from_str(r#"{"events": {"dedup_window": 10.0}, "tracking": {"association": "optimal"}}"#)
                .expect("valid json");
        assert_eq!(cfg.events.dedup_window, 10.0);
        assert_eq!(cfg.events.entry_y_threshold, 0.6);
        assert_eq!(cfg.tracking.association, AssociationMethod::Optimal);
        assert_eq!(cfg.fusion, FusionConfig::default());
    }

    #[test]
    fn inverted_lines_are_rejected() {
        let mut cfg = AnprConfig::default();
        cfg.events.entry_y_threshold = 0.95;
        assert!(matches!(cfg.validate(), Err(ConfigError::ThresholdOrder { .. })));
    }

    #[test]
    fn zero_caps_are_rejected() {
        let mut cfg = AnprConfig::default();
        cfg.fusion.max_samples = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Zero { key: "fusion.max_samples" })
        );
    }

    #[test]
    fn nan_threshold_is_rejected() {
        let mut cfg = AnprConfig::default();
        cfg.tracking.iou_threshold = f64::NAN;
        assert!(matches!(cfg.validate(), Err(ConfigError::OutOfRange { .. })));
    }
}
