//! Camera pipeline: one frame through tracking, plate fusion and events.
//!
//! # Processing steps per frame
//! 1. Tracker step (predict, associate, update, birth, prune)
//! 2. Ingest the frame's plate candidates for live tracks
//! 3. Evaluate the crossing state of every live track
//! 4. Final crossing attempt for deleted tracks, then release their plates
//! 5. Sweep expired dedup entries
//! 6. Hand emitted events to the sink
//! 7. Update statistics
//!
//! A pipeline owns every per-track table of one camera. It is driven from a
//! single thread in frame order; separate cameras use separate pipelines.

use crate::{
    config::{AnprConfig, ConfigError},
    events::{Event, EventEngine, TrackView},
    fusion::{IngestOutcome, PlateFusionEngine},
    metrics::PipelineStats,
    sink::EventSink,
    track::LifecycleEvent,
    tracker::Tracker,
    types::{CameraId, Frame, Timestamp},
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outputs of one processed frame.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp: Timestamp,
    /// Events emitted this frame, in emission order
    pub events: Vec<Event>,
    pub lifecycle: Vec<LifecycleEvent>,
    pub live_tracks: usize,
    pub confirmed_tracks: usize,
    /// Events the sink refused this frame
    pub sink_failures: usize,
    /// Wall-clock time of processing
    pub processing_time_us: u64,
}

/// Tracker, fusion engine and event engine for one camera.
pub struct CameraPipeline {
    pub camera_id: CameraId,
    pub config: AnprConfig,
    tracker: Tracker,
    fusion: PlateFusionEngine,
    events: EventEngine,
    stats: PipelineStats,
    last_timestamp: Option<Timestamp>,
}

impl CameraPipeline {
    /// Build a pipeline after validating `config`.
    pub fn new(camera_id: CameraId, config: AnprConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            camera_id,
            tracker: Tracker::new(config.tracking.clone()),
            fusion: PlateFusionEngine::new(config.fusion.clone()),
            events: EventEngine::new(camera_id, config.events.clone()),
            config,
            stats: PipelineStats::default(),
            last_timestamp: None,
        })
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn fusion(&self) -> &PlateFusionEngine {
        &self.fusion
    }

    pub fn events(&self) -> &EventEngine {
        &self.events
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Process one frame and push its events to `sink`.
    pub fn process_frame<S: EventSink + ?Sized>(&mut self, frame: &Frame, sink: &mut S) -> FrameReport {
        let start = Instant::now();
        let now = frame.timestamp;

        if let Some(prev) = self.last_timestamp {
            if now <= prev {
                self.stats.out_of_order_frames += 1;
                warn!(camera = %self.camera_id, frame = frame.index, now, prev, "frame timestamp did not increase");
            }
        }
        self.last_timestamp = Some(now);

        // ----------------------------------------------------------------
        // Step 1: Tracking
        // ----------------------------------------------------------------
        let tracked = self.tracker.step(frame);

        // ----------------------------------------------------------------
        // Step 2: Plate samples for live tracks only
        // ----------------------------------------------------------------
        for candidate in &frame.plates {
            if self.tracker.get(candidate.track_id).is_none() {
                debug!(camera = %self.camera_id, track = %candidate.track_id, "plate sample for unknown track");
                self.stats.plate_samples_rejected += 1;
                continue;
            }
            match self.fusion.ingest(candidate) {
                IngestOutcome::Rejected(_) => self.stats.plate_samples_rejected += 1,
                IngestOutcome::Recorded => self.stats.plate_samples_recorded += 1,
                IngestOutcome::Locked => {
                    self.stats.plate_samples_recorded += 1;
                    self.stats.plates_locked += 1;
                }
            }
        }

        // ----------------------------------------------------------------
        // Step 3: Crossing state for live tracks
        // ----------------------------------------------------------------
        let mut emitted = Vec::new();
        for track in self.tracker.tracks() {
            let view = TrackView::from(track);
            emitted.extend(self.events.evaluate(&view, self.fusion.current(track.id), now));
        }

        // ----------------------------------------------------------------
        // Step 4: Deleted tracks
        // ----------------------------------------------------------------
        for track in &tracked.deleted {
            let view = TrackView::from(track);
            emitted.extend(self.events.track_deleted(&view, self.fusion.current(track.id), now));
            self.fusion.release(track.id);
        }

        // ----------------------------------------------------------------
        // Step 5: Dedup expiry
        // ----------------------------------------------------------------
        let expired = self.events.sweep(now);
        if expired > 0 {
            debug!(camera = %self.camera_id, expired, "dedup entries expired");
        }

        // ----------------------------------------------------------------
        // Step 6: Sink
        // ----------------------------------------------------------------
        let mut sink_failures = 0;
        for event in &emitted {
            if let Err(e) = sink.record(event) {
                sink_failures += 1;
                warn!(camera = %self.camera_id, track = %event.track_id, kind = %event.kind, error = %e, "sink failed to record event");
            }
        }

        // ----------------------------------------------------------------
        // Step 7: Statistics
        // ----------------------------------------------------------------
        let processing_time_us = start.elapsed().as_micros() as u64;
        let s = &mut self.stats;
        s.frames += 1;
        s.detections_seen += frame.detections.len() as u64;
        s.detections_discarded += tracked.discarded_detections as u64;
        s.births += tracked.births as u64;
        s.confirmations += tracked.confirmations as u64;
        s.losses += tracked.losses as u64;
        s.recoveries += tracked.recoveries as u64;
        s.deletions += tracked.deletions as u64;
        s.sink_failures += sink_failures as u64;
        s.total_time_us += processing_time_us;
        s.absorb_events(self.events.stats());

        FrameReport {
            frame_index: frame.index,
            timestamp: now,
            events: emitted,
            lifecycle: tracked.lifecycle,
            live_tracks: self.tracker.tracks().len(),
            confirmed_tracks: self.tracker.confirmed().count(),
            sink_failures,
            processing_time_us,
        }
    }

    /// Shut down: in-flight tracks are dropped without synthetic EXIT
    /// events. Returns the final statistics.
    pub fn finish(&mut self) -> PipelineStats {
        let dropped = self.tracker.tracks().len();
        self.tracker.reset();
        self.fusion.clear();
        self.events.clear();
        info!(camera = %self.camera_id, dropped, frames = self.stats.frames, "pipeline finished");
        self.stats.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::EventKind,
        geometry::BBox,
        sink::{MemorySink, SinkError},
        types::{Detection, PlateCandidate, TrackId, VehicleClass},
    };

    struct FailingSink;

    impl EventSink for FailingSink {
        fn record(&mut self, _event: &Event) -> Result<(), SinkError> {
            Err(SinkError::Rejected("read-only".into()))
        }
    }

    /// One vehicle driving down a normalised frame at 10 fps, plate read on
    /// frames 5..8, then gone.
    fn passage() -> Vec<Frame> {
        (0..60u32)
            .map(|i| {
                let t = f64::from(i) / 10.0;
                let mut frame = Frame::new(u64::from(i), t, 1.0);
                if i <= 45 {
                    let cy = f64::from(20 + 2 * i) / 100.0;
                    let det = Detection::new(BBox::from_center_size(0.5, cy, 0.1, 0.08), 0.9, VehicleClass::Car);
                    frame.detections.push(det);
                }
                if (5..8).contains(&i) {
                    frame.plates.push(PlateCandidate::new(TrackId(1), "abc-123", 0.9, t));
                }
                frame
            })
            .collect()
    }

    #[test]
    fn passage_produces_one_entry_and_one_exit() {
        let mut pipeline = CameraPipeline::new(CameraId(3), AnprConfig::default()).expect("valid config");
        let mut sink = MemorySink::new();
        for frame in passage() {
            pipeline.process_frame(&frame, &mut sink);
        }
        let kinds: Vec<EventKind> = sink.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Entry, EventKind::Exit]);
        let exit = &sink.events[1];
        assert_eq!(exit.plate_text.as_deref(), Some("ABC123"));
        assert_eq!(exit.camera_id, CameraId(3));
        assert_eq!(exit.vehicle_class, VehicleClass::Car);
        assert!(exit.dwell.is_some_and(|d| d >= 2.0));

        let stats = pipeline.stats();
        assert_eq!(stats.plates_locked, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.exits, 1);
        assert_eq!(stats.births, 1);
        assert_eq!(stats.frames, 60);
    }

    #[test]
    fn sink_failure_is_counted_not_retried() {
        let mut pipeline = CameraPipeline::new(CameraId(0), AnprConfig::default()).expect("valid config");
        let mut sink = FailingSink;
        let mut reported = 0;
        for frame in passage() {
            reported += pipeline.process_frame(&frame, &mut sink).events.len();
        }
        assert_eq!(reported, 2, "events stay logically emitted");
        assert_eq!(pipeline.stats().sink_failures, 2);
        assert_eq!(pipeline.stats().exits, 1);
    }

    #[test]
    fn plates_for_unknown_tracks_are_rejected() {
        let mut pipeline = CameraPipeline::new(CameraId(0), AnprConfig::default()).expect("valid config");
        let frame = Frame::new(0, 0.0, 1.0).with_plates(vec![PlateCandidate::new(TrackId(99), "ABC123", 0.9, 0.0)]);
        pipeline.process_frame(&frame, &mut MemorySink::new());
        assert_eq!(pipeline.stats().plate_samples_rejected, 1);
        assert!(pipeline.fusion().is_empty());
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = AnprConfig::default();
        config.fusion.fusion_min_samples = 0;
        assert!(CameraPipeline::new(CameraId(0), config).is_err());
    }

    #[test]
    fn finish_drops_in_flight_tracks_silently() {
        let mut pipeline = CameraPipeline::new(CameraId(0), AnprConfig::default()).expect("valid config");
        let mut sink = MemorySink::new();
        for frame in passage().iter().take(25) {
            pipeline.process_frame(frame, &mut sink);
        }
        assert_eq!(sink.events.len(), 1, "entered, not yet exited");
        let stats = pipeline.finish();
        assert_eq!(stats.exits, 0);
        assert!(pipeline.tracker().tracks().is_empty());
        assert_eq!(pipeline.events().active_tracks(), 0);
    }

    #[test]
    fn out_of_order_frames_are_counted() {
        let mut pipeline = CameraPipeline::new(CameraId(0), AnprConfig::default()).expect("valid config");
        let mut sink = MemorySink::new();
        pipeline.process_frame(&Frame::new(0, 1.0, 1.0), &mut sink);
        pipeline.process_frame(&Frame::new(1, 0.5, 1.0), &mut sink);
        assert_eq!(pipeline.stats().out_of_order_frames, 1);
    }
}
