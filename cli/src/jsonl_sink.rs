//! Event sink writing one JSON object per line. Each line is flushed as it
//! is written so a crash loses at most the event in flight.

use anpr_core::{Event, EventSink, SinkError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn record(&mut self, event: &Event) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, event).map_err(io::Error::from)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.written += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anpr_core::{CameraId, EventKind, TrackId, VehicleClass};

    fn event(kind: EventKind) -> Event {
        Event {
            camera_id: CameraId(2),
            track_id: TrackId(9),
            kind,
            plate_text: Some("ABC1234".into()),
            plate_confidence: Some(0.9),
            vehicle_class: VehicleClass::Car,
            timestamp: 12.5,
            entry_time: None,
            dwell: None,
        }
    }

    #[test]
    fn one_line_per_event() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.record(&event(EventKind::Entry)).expect("vec write");
        sink.record(&event(EventKind::Exit)).expect("vec write");
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: Event = serde_json::from_str(lines[1]).expect("valid json");
        assert_eq!(back.kind, EventKind::Exit);
        assert_eq!(back.plate_text.as_deref(), Some("ABC1234"));
    }
}
