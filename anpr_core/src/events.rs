//! Entry/Exit Event Engine: per-track crossing state machine and dedup.
//!
//! # Phases
//! `Outside → Approaching → Inside → Exiting → Logged`
//!
//! - **Outside → Approaching**: confirmed track between the frame margin and
//!   the entry line.
//! - **Approaching → Inside**: at or past the entry line, moving down, after
//!   `min_dwell_time` in Approaching. Emits ENTRY. The line is inclusive:
//!   `y == entry_y_threshold` counts as crossed.
//! - **Inside → Exiting**: at or past the exit line moving down, or the track
//!   was deleted while Inside.
//! - **Exiting → Logged**: `min_inside_time` since entry. Emits EXIT.
//!
//! A track that turns back before the entry line stays in Approaching.
//! Transitions that need a plate are withheld until one is fused.

use crate::{
    config::EventConfig,
    fusion::FusedPlate,
    track::{Track, TrackStatus},
    types::{CameraId, Timestamp, TrackId, VehicleClass},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossingPhase {
    #[default]
    Outside,
    Approaching,
    Inside,
    Exiting,
    Logged,
}

/// Per-track crossing progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossingState {
    pub phase: CrossingPhase,
    pub approach_started_at: Option<Timestamp>,
    pub entry_time: Option<Timestamp>,
    pub exit_time: Option<Timestamp>,
    pub entry_emitted: bool,
    pub exit_emitted: bool,
    /// Normalised y at the previous evaluation
    pub last_y: Option<f64>,
    /// Set once the lifecycle manager deleted the track
    pub track_gone: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Entry,
    Exit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Entry => f.write_str("ENTRY"),
            EventKind::Exit => f.write_str("EXIT"),
        }
    }
}

/// Immutable lane event handed to the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub camera_id: CameraId,
    pub track_id: TrackId,
    pub kind: EventKind,
    pub plate_text: Option<String>,
    pub plate_confidence: Option<f64>,
    pub vehicle_class: VehicleClass,
    pub timestamp: Timestamp,
    /// EXIT only: time of the emitted ENTRY
    pub entry_time: Option<Timestamp>,
    /// EXIT only: exit − entry, `None` when no ENTRY was emitted
    pub dwell: Option<f64>,
}

/// What the event engine needs to know about a track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackView {
    pub id: TrackId,
    pub status: TrackStatus,
    pub norm_y: f64,
    pub class: VehicleClass,
}

impl From<&Track> for TrackView {
    fn from(t: &Track) -> Self {
        Self {
            id: t.id,
            status: t.status,
            norm_y: t.last_norm_y,
            class: t.class,
        }
    }
}

// ---------------------------------------------------------------------------
// Dedup cache
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub camera: CameraId,
    pub plate: String,
    pub kind: EventKind,
}

/// Time-indexed set of recently emitted (camera, plate, kind) keys.
#[derive(Debug)]
pub struct DedupCache {
    window: f64,
    capacity: Option<usize>,
    last_seen: HashMap<DedupKey, Timestamp>,
    /// Insertion order; may hold stale pairs for keys recorded again later
    order: VecDeque<(Timestamp, DedupKey)>,
}

impl DedupCache {
    pub fn new(window: f64, capacity: Option<usize>) -> Self {
        Self {
            window,
            capacity,
            last_seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// True if `key` was recorded less than `window` seconds before `now`.
    pub fn is_recent(&self, key: &DedupKey, now: Timestamp) -> bool {
        self.last_seen
            .get(key)
            .is_some_and(|&t| now - t < self.window)
    }

    pub fn record(&mut self, key: DedupKey, now: Timestamp) {
        self.last_seen.insert(key.clone(), now);
        self.order.push_back((now, key));
        if let Some(cap) = self.capacity {
            while self.last_seen.len() > cap {
                if !self.pop_oldest() {
                    break;
                }
            }
        }
    }

    /// Drop entries older than the window. Returns how many keys went.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        let before = self.last_seen.len();
        while self
            .order
            .front()
            .is_some_and(|(t, _)| now - *t >= self.window)
        {
            self.pop_oldest();
        }
        before - self.last_seen.len()
    }

    fn pop_oldest(&mut self) -> bool {
        let Some((t, key)) = self.order.pop_front() else {
            return false;
        };
        if self.last_seen.get(&key) == Some(&t) {
            self.last_seen.remove(&key);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub entries: u64,
    pub exits: u64,
    pub duplicates_suppressed: u64,
    /// Evaluations where a transition waited for a fused plate
    pub withheld_for_plate: u64,
}

/// Crossing states for every track of one camera.
#[derive(Debug)]
pub struct EventEngine {
    pub camera_id: CameraId,
    pub config: EventConfig,
    states: HashMap<TrackId, CrossingState>,
    dedup: DedupCache,
    stats: EventStats,
}

impl EventEngine {
    pub fn new(camera_id: CameraId, config: EventConfig) -> Self {
        let dedup = DedupCache::new(config.dedup_window, config.dedup_capacity);
        Self {
            camera_id,
            config,
            states: HashMap::new(),
            dedup,
            stats: EventStats::default(),
        }
    }

    /// Advance the crossing state of a live track. Returns emitted events.
    pub fn evaluate(
        &mut self,
        view: &TrackView,
        plate: Option<&FusedPlate>,
        now: Timestamp,
    ) -> Vec<Event> {
        let mut state = self.states.remove(&view.id).unwrap_or_default();
        let mut out = Vec::new();
        self.advance(&mut state, view, plate, now, &mut out);
        state.last_y = Some(view.norm_y);
        self.states.insert(view.id, state);
        out
    }

    /// Final attempt for a deleted track, then its state is released.
    pub fn track_deleted(
        &mut self,
        view: &TrackView,
        plate: Option<&FusedPlate>,
        now: Timestamp,
    ) -> Vec<Event> {
        let Some(mut state) = self.states.remove(&view.id) else {
            return Vec::new();
        };
        state.track_gone = true;
        let mut out = Vec::new();
        self.advance(&mut state, view, plate, now, &mut out);
        if state.phase == CrossingPhase::Exiting {
            debug!(track = %view.id, "track gone before exit could be logged");
        }
        out
    }

    fn advance(
        &mut self,
        st: &mut CrossingState,
        view: &TrackView,
        plate: Option<&FusedPlate>,
        now: Timestamp,
        out: &mut Vec<Event>,
    ) {
        let y = view.norm_y;
        let moving_down = st.last_y.is_some_and(|prev| y > prev);
        let confirmed = view.status == TrackStatus::Confirmed;
        let entry_y = self.config.entry_y_threshold;

        loop {
            match st.phase {
                CrossingPhase::Outside => {
                    if !(confirmed && y > self.config.frame_margin && y < entry_y) {
                        break;
                    }
                    st.phase = CrossingPhase::Approaching;
                    st.approach_started_at = Some(now);
                    debug!(track = %view.id, y, "approaching");
                }
                CrossingPhase::Approaching => {
                    let dwelled = st
                        .approach_started_at
                        .is_some_and(|t| now - t >= self.config.min_dwell_time);
                    if !(confirmed && y >= entry_y && moving_down && dwelled) {
                        break;
                    }
                    if self.config.require_plate_for_entry && plate.is_none() {
                        self.stats.withheld_for_plate += 1;
                        break;
                    }
                    st.phase = CrossingPhase::Inside;
                    st.entry_time = Some(now);
                    if !st.entry_emitted {
                        if let Some(ev) = self.emit(EventKind::Entry, view, plate, now, None) {
                            st.entry_emitted = true;
                            out.push(ev);
                        }
                    }
                }
                CrossingPhase::Inside => {
                    let crossed = confirmed && y >= self.config.exit_y_threshold && moving_down;
                    if !(crossed || st.track_gone) {
                        break;
                    }
                    st.phase = CrossingPhase::Exiting;
                    debug!(track = %view.id, gone = st.track_gone, "exiting");
                }
                CrossingPhase::Exiting => {
                    let Some(entry_time) = st.entry_time else {
                        break;
                    };
                    if now - entry_time < self.config.min_inside_time {
                        break;
                    }
                    if self.config.require_plate_for_exit && plate.is_none() {
                        self.stats.withheld_for_plate += 1;
                        break;
                    }
                    st.phase = CrossingPhase::Logged;
                    st.exit_time = Some(now);
                    if !st.exit_emitted {
                        let entry = st.entry_emitted.then_some(entry_time);
                        if let Some(ev) = self.emit(EventKind::Exit, view, plate, now, entry) {
                            st.exit_emitted = true;
                            out.push(ev);
                        }
                    }
                }
                CrossingPhase::Logged => break,
            }
        }
    }

    /// Build an event unless its plate was emitted recently for the same kind.
    fn emit(
        &mut self,
        kind: EventKind,
        view: &TrackView,
        plate: Option<&FusedPlate>,
        now: Timestamp,
        entry_time: Option<Timestamp>,
    ) -> Option<Event> {
        if let Some(p) = plate {
            let key = DedupKey {
                camera: self.camera_id,
                plate: p.text.clone(),
                kind,
            };
            if self.dedup.is_recent(&key, now) {
                self.stats.duplicates_suppressed += 1;
                info!(camera = %self.camera_id, track = %view.id, plate = %p.text, %kind, "duplicate suppressed");
                return None;
            }
            self.dedup.record(key, now);
        }

        match kind {
            EventKind::Entry => self.stats.entries += 1,
            EventKind::Exit => self.stats.exits += 1,
        }
        let event = Event {
            camera_id: self.camera_id,
            track_id: view.id,
            kind,
            plate_text: plate.map(|p| p.text.clone()),
            plate_confidence: plate.map(|p| p.mean_confidence),
            vehicle_class: view.class,
            timestamp: now,
            entry_time,
            dwell: entry_time.map(|t| now - t),
        };
        info!(
            camera = %self.camera_id,
            track = %view.id,
            plate = event.plate_text.as_deref().unwrap_or("N/A"),
            "{kind}"
        );
        Some(event)
    }

    /// Expire old dedup entries. Returns how many went.
    pub fn sweep(&mut self, now: Timestamp) -> usize {
        self.dedup.sweep(now)
    }

    pub fn state(&self, id: TrackId) -> Option<&CrossingState> {
        self.states.get(&id)
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Tracks with crossing state.
    pub fn active_tracks(&self) -> usize {
        self.states.len()
    }

    pub fn cached_plates(&self) -> usize {
        self.dedup.len()
    }

    /// Drop all crossing state without emitting anything. The dedup cache
    /// is kept.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn view(id: u64, y: f64) -> TrackView {
        TrackView {
            id: TrackId(id),
            status: TrackStatus::Confirmed,
            norm_y: y,
            class: VehicleClass::Car,
        }
    }

    fn plate(text: &str) -> FusedPlate {
        FusedPlate {
            text: text.to_string(),
            support: 3,
            mean_confidence: 0.9,
            locked: true,
        }
    }

    /// Drive a track from y=0.3 down past the frame bottom at 10 fps,
    /// 0.02 per frame: entry line at frame 15, exit line at frame 30.
    fn drive(engine: &mut EventEngine, id: u64, p: Option<&FusedPlate>, t0: f64) -> Vec<Event> {
        let mut events = Vec::new();
        for i in 0..=40u32 {
            let y = f64::from(30 + 2 * i) / 100.0;
            let now = t0 + f64::from(i) / 10.0;
            events.extend(engine.evaluate(&view(id, y), p, now));
        }
        events
    }

    #[test]
    fn full_passage_emits_entry_then_exit() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("ABC123");
        let events = drive(&mut engine, 1, Some(&p), 0.0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Entry);
        assert_eq!(events[1].kind, EventKind::Exit);
        assert_abs_diff_eq!(events[0].timestamp, 1.5, epsilon = 1e-9);
        assert_abs_diff_eq!(events[1].timestamp, 3.5, epsilon = 1e-9);
        let dwell = events[1].dwell.expect("entry was emitted");
        assert_abs_diff_eq!(dwell, events[1].timestamp - events[0].timestamp, epsilon = 1e-12);
        assert!(dwell >= 2.0);
        assert_eq!(engine.state(TrackId(1)).map(|s| s.phase), Some(CrossingPhase::Logged));
    }

    #[test]
    fn re_evaluation_is_idempotent() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("ABC123");
        drive(&mut engine, 1, Some(&p), 0.0);
        for _ in 0..3 {
            assert!(engine.evaluate(&view(1, 1.1), Some(&p), 4.0).is_empty());
        }
        assert_eq!(engine.stats().entries, 1);
        assert_eq!(engine.stats().exits, 1);
    }

    #[test]
    fn tentative_track_never_approaches() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let mut v = view(1, 0.4);
        v.status = TrackStatus::Tentative;
        engine.evaluate(&v, None, 0.0);
        assert_eq!(engine.state(TrackId(1)).map(|s| s.phase), Some(CrossingPhase::Outside));
    }

    #[test]
    fn entry_waits_for_min_dwell() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        engine.evaluate(&view(1, 0.5), None, 0.0);
        // Past the line after 0.5 s: too early
        assert!(engine.evaluate(&view(1, 0.62), None, 0.5).is_empty());
        // Still moving down past the line once the dwell is met
        let events = engine.evaluate(&view(1, 0.64), None, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Entry);
        assert_eq!(events[0].plate_text, None);
    }

    #[test]
    fn entry_withheld_without_plate_when_required() {
        let config = EventConfig {
            require_plate_for_entry: true,
            ..Default::default()
        };
        let mut engine = EventEngine::new(CameraId(1), config);
        engine.evaluate(&view(1, 0.5), None, 0.0);
        assert!(engine.evaluate(&view(1, 0.62), None, 1.5).is_empty());
        assert_eq!(engine.stats().withheld_for_plate, 1);
        let p = plate("ABC123");
        let events = engine.evaluate(&view(1, 0.63), Some(&p), 1.6);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plate_text.as_deref(), Some("ABC123"));
    }

    #[test]
    fn retreating_track_stays_approaching() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        for (i, y) in [0.3, 0.4, 0.5, 0.4, 0.3, 0.2].iter().enumerate() {
            assert!(engine.evaluate(&view(1, *y), None, i as f64).is_empty());
        }
        assert_eq!(engine.state(TrackId(1)).map(|s| s.phase), Some(CrossingPhase::Approaching));
        assert!(engine.track_deleted(&view(1, 0.2), None, 10.0).is_empty());
        assert!(engine.state(TrackId(1)).is_none());
    }

    #[test]
    fn deletion_while_inside_logs_exit_with_plate() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("ABC123");
        engine.evaluate(&view(1, 0.5), Some(&p), 0.0);
        assert_eq!(engine.evaluate(&view(1, 0.7), Some(&p), 1.0).len(), 1);
        let mut gone = view(1, 0.7);
        gone.status = TrackStatus::Deleted;
        let events = engine.track_deleted(&gone, Some(&p), 4.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Exit);
        assert_abs_diff_eq!(events[0].dwell.unwrap_or_default(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn duplicate_plate_suppressed_per_kind() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("XYZ999");
        let first = drive(&mut engine, 1, Some(&p), 0.0);
        let second = drive(&mut engine, 2, Some(&p), 5.0);
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(engine.stats().duplicates_suppressed, 2);
        // The suppressed track still finished its passage
        let st = engine.state(TrackId(2)).cloned().expect("state kept");
        assert_eq!(st.phase, CrossingPhase::Logged);
        assert!(!st.entry_emitted && !st.exit_emitted);
    }

    #[test]
    fn same_plate_after_dedup_window_logs_again() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("XYZ999");
        let first = drive(&mut engine, 1, Some(&p), 0.0);
        // Second passage starts well after the 60 s window
        assert_eq!(engine.sweep(70.0), 2);
        let second = drive(&mut engine, 2, Some(&p), 70.0);
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].kind, EventKind::Entry);
        assert_eq!(second[1].kind, EventKind::Exit);
        assert_eq!(second[1].entry_time, Some(second[0].timestamp));
        assert_eq!(engine.stats().duplicates_suppressed, 0);
        assert_eq!(engine.stats().entries, 2);
        assert_eq!(engine.stats().exits, 2);
    }

    #[test]
    fn reaching_entry_line_exactly_enters() {
        let config = EventConfig::default();
        let entry_y = config.entry_y_threshold;
        let mut engine = EventEngine::new(CameraId(1), config);
        engine.evaluate(&view(1, entry_y - 0.1), None, 0.0);
        let events = engine.evaluate(&view(1, entry_y), None, 1.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Entry);
        assert_eq!(engine.state(TrackId(1)).map(|s| s.phase), Some(CrossingPhase::Inside));
    }

    #[test]
    fn exit_without_emitted_entry_has_unknown_dwell() {
        let mut engine = EventEngine::new(CameraId(1), EventConfig::default());
        let p = plate("XYZ999");
        // First track enters only
        engine.evaluate(&view(1, 0.5), Some(&p), 0.0);
        assert_eq!(engine.evaluate(&view(1, 0.7), Some(&p), 1.0).len(), 1);
        // Second track with the same plate: ENTRY suppressed, EXIT emitted
        let events = drive(&mut engine, 2, Some(&p), 2.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Exit);
        assert_eq!(events[0].dwell, None);
        assert_eq!(events[0].entry_time, None);
    }

    #[test]
    fn dedup_cache_sweeps_and_caps() {
        let key = |p: &str| DedupKey {
            camera: CameraId(0),
            plate: p.to_string(),
            kind: EventKind::Entry,
        };
        let mut cache = DedupCache::new(10.0, Some(2));
        cache.record(key("A"), 0.0);
        cache.record(key("B"), 1.0);
        cache.record(key("C"), 2.0);
        assert_eq!(cache.len(), 2, "oldest evicted at capacity");
        assert!(!cache.is_recent(&key("A"), 2.0));
        assert!(cache.is_recent(&key("B"), 10.9));
        assert!(!cache.is_recent(&key("B"), 11.0));
        assert_eq!(cache.sweep(11.5), 1);
        assert_eq!(cache.sweep(12.0), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn re_recorded_key_survives_stale_sweep() {
        let key = DedupKey {
            camera: CameraId(0),
            plate: "A".to_string(),
            kind: EventKind::Exit,
        };
        let mut cache = DedupCache::new(10.0, None);
        cache.record(key.clone(), 0.0);
        cache.record(key.clone(), 8.0);
        assert_eq!(cache.sweep(12.0), 0);
        assert!(cache.is_recent(&key, 12.0));
    }
}
