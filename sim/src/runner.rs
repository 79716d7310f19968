//! Drive a recorded camera stream through a `CameraPipeline`.
//!
//! OCR readings arrive untagged. Each reading is attributed to the live
//! track whose lower box half (where the plate sits) overlaps its region
//! best, using the tracks from the previous frame.

use crate::{
    camera_sim::{PlateReading, SimFrame},
    replay::CameraStream,
};
use anpr_core::{
    geometry::iou, AnprConfig, BBox, CameraId, CameraPipeline, EventSink, FrameReport,
    PipelineStats, PlateCandidate, Timestamp, Track,
};
use anyhow::Context;
use tracing::{debug, info};

/// Minimum overlap between a reading and a track's plate region.
pub const MIN_TAG_IOU: f64 = 0.2;

fn plate_region(bbox: &BBox) -> BBox {
    BBox::new(bbox.x1, bbox.center().1, bbox.x2, bbox.y2)
}

/// Attach each reading to the best-overlapping live track. Readings that
/// overlap no track by at least [`MIN_TAG_IOU`] are dropped.
pub fn tag_readings(readings: &[PlateReading], tracks: &[Track], timestamp: Timestamp) -> Vec<PlateCandidate> {
    readings
        .iter()
        .filter_map(|r| {
            let (best, score) = tracks
                .iter()
                .filter(|t| t.is_live())
                .map(|t| (t, iou(&plate_region(&t.bbox), &r.roi)))
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if score < MIN_TAG_IOU {
                debug!(text = %r.text, score, "untagged plate reading");
                return None;
            }
            Some(PlateCandidate::new(best.id, r.text.clone(), r.confidence, timestamp))
        })
        .collect()
}

/// A pipeline fed with simulator frames.
pub struct StreamRunner {
    pipeline: CameraPipeline,
}

impl StreamRunner {
    pub fn new(camera_id: CameraId, config: AnprConfig) -> anyhow::Result<Self> {
        let pipeline = CameraPipeline::new(camera_id, config)
            .with_context(|| format!("invalid configuration for camera {camera_id}"))?;
        Ok(Self { pipeline })
    }

    pub fn pipeline(&self) -> &CameraPipeline {
        &self.pipeline
    }

    /// Tag the frame's readings, then process it.
    pub fn feed<S: EventSink + ?Sized>(&mut self, sim_frame: &SimFrame, sink: &mut S) -> FrameReport {
        let plates = tag_readings(
            &sim_frame.readings,
            self.pipeline.tracker().tracks(),
            sim_frame.frame.timestamp,
        );
        let frame = sim_frame.frame.clone().with_plates(plates);
        let report = self.pipeline.process_frame(&frame, sink);
        for event in &report.events {
            info!(
                camera = %event.camera_id,
                track = %event.track_id,
                kind = %event.kind,
                plate = event.plate_text.as_deref().unwrap_or("-"),
                t = event.timestamp,
                "lane event"
            );
        }
        report
    }

    pub fn finish(mut self) -> PipelineStats {
        self.pipeline.finish()
    }
}

/// Run a whole stream in frame order and return the final statistics.
pub fn run_stream<S: EventSink + ?Sized>(
    stream: &CameraStream,
    config: &AnprConfig,
    sink: &mut S,
) -> anyhow::Result<PipelineStats> {
    let mut runner = StreamRunner::new(stream.camera_id, config.clone())?;
    for sim_frame in &stream.frames {
        runner.feed(sim_frame, sink);
    }
    Ok(runner.finish())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
