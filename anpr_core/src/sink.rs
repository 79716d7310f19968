//! Persistence contract for emitted lane events.
//!
//! The core hands each event to the sink once. A failed `record` is reported
//! and counted by the caller but never retried and never rolls back crossing
//! state; durability is the sink's own business.

use crate::events::Event;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("event rejected: {0}")]
    Rejected(String),
}

/// Destination for emitted events.
pub trait EventSink {
    fn record(&mut self, event: &Event) -> Result<(), SinkError>;
}

/// In-memory sink, mostly for tests and replays.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MemorySink {
    fn record(&mut self, event: &Event) -> Result<(), SinkError> {
        self.events.push(event.clone());
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn record(&mut self, event: &Event) -> Result<(), SinkError> {
        (**self).record(event)
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn record(&mut self, event: &Event) -> Result<(), SinkError> {
        (**self).record(event)
    }
}

/// Handle to a sink shared by several camera pipelines. Each `record` holds
/// the lock for one event, so events of one camera keep their order.
pub struct SharedSink<'a, S: ?Sized> {
    inner: &'a Mutex<S>,
}

impl<'a, S: EventSink + ?Sized> SharedSink<'a, S> {
    pub fn new(inner: &'a Mutex<S>) -> Self {
        Self { inner }
    }
}

impl<S: EventSink + ?Sized> EventSink for SharedSink<'_, S> {
    fn record(&mut self, event: &Event) -> Result<(), SinkError> {
        // A poisoned lock still guards a usable sink
        let mut sink = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        sink.record(event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::types::{CameraId, TrackId, VehicleClass};

    fn event(camera: u32, track: u64) -> Event {
        Event {
            camera_id: CameraId(camera),
            track_id: TrackId(track),
            kind: EventKind::Entry,
            plate_text: None,
            plate_confidence: None,
            vehicle_class: VehicleClass::Car,
            timestamp: track as f64,
            entry_time: None,
            dwell: None,
        }
    }

    #[test]
    fn shared_sink_collects_from_every_thread() {
        let shared = Mutex::new(MemorySink::new());
        std::thread::scope(|s| {
            for camera in 0..3 {
                let shared = &shared;
                s.spawn(move || {
                    let mut sink = SharedSink::new(shared);
                    for track in 1..=4 {
                        sink.record(&event(camera, track)).expect("memory sink");
                    }
                });
            }
        });
        let events = shared.into_inner().expect("not poisoned").events;
        assert_eq!(events.len(), 12);
        for camera in 0..3 {
            let tracks: Vec<u64> = events
                .iter()
                .filter(|e| e.camera_id == CameraId(camera))
                .map(|e| e.track_id.0)
                .collect();
            assert_eq!(tracks, vec![1, 2, 3, 4], "per-camera order kept");
        }
    }
}
