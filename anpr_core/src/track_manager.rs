//! Track lifecycle policy: birth, confirmation, loss, recovery, deletion.
//!
//! # Lifecycle
//! - **Birth**: each unmatched valid detection spawns a tentative track.
//! - **Confirmation**: a tentative track is confirmed after `min_hits`
//!   consecutive hits (birth counts as the first).
//! - **Loss**: a confirmed track that misses a frame becomes lost; a lost
//!   track hit again is confirmed with its identity intact.
//! - **Deletion**: a tentative track is deleted on its first miss, a lost
//!   track once its consecutive misses exceed `max_lost_frames`.

use crate::{
    config::TrackingConfig,
    kf::BoxKalmanFilter,
    track::{LifecycleKind, Track, TrackStatus},
    types::{Detection, Timestamp, TrackId},
};
use tracing::debug;

/// Owns the identity counter and applies the lifecycle rules.
pub struct TrackManager {
    pub min_hits: u32,
    pub max_lost_frames: u32,
    history_len: usize,
    next_id: u64,
}

impl TrackManager {
    pub fn new(config: &TrackingConfig) -> Self {
        Self {
            min_hits: config.min_hits.max(1),
            max_lost_frames: config.max_lost_frames,
            history_len: config.history_len,
            next_id: 1,
        }
    }

    /// Identifiers are handed out once and never rewound.
    fn next_track_id(&mut self) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Id the next birth will receive.
    pub fn peek_next_id(&self) -> TrackId {
        TrackId(self.next_id)
    }

    /// Create a new tentative track from an unmatched detection.
    pub fn birth_track(
        &mut self,
        kf: &BoxKalmanFilter,
        det: &Detection,
        now: Timestamp,
        frame_height: f64,
    ) -> Track {
        let id = self.next_track_id();
        let (state, cov) = kf.initiate(&det.bbox);
        let mut track = Track::new(
            id,
            state,
            cov,
            det.class,
            det.confidence,
            now,
            frame_height,
            self.history_len,
        );
        // min_hits = 1 confirms on birth
        if track.hits >= self.min_hits {
            track.status = TrackStatus::Confirmed;
        }
        debug!(track = %id, class = %det.class, "track born");
        track
    }

    /// Apply a hit. Returns the transition it caused, if any.
    pub fn register_hit(&self, track: &mut Track) -> Option<LifecycleKind> {
        track.misses = 0;
        track.hits = track.hits.saturating_add(1);
        track.total_hits = track.total_hits.saturating_add(1);
        match track.status {
            TrackStatus::Tentative if track.hits >= self.min_hits => {
                track.status = TrackStatus::Confirmed;
                Some(LifecycleKind::Confirmed)
            }
            TrackStatus::Lost => {
                track.status = TrackStatus::Confirmed;
                Some(LifecycleKind::Recovered)
            }
            _ => None,
        }
    }

    /// Apply a miss. Returns the transition it caused, if any.
    pub fn register_miss(&self, track: &mut Track) -> Option<LifecycleKind> {
        track.misses = track.misses.saturating_add(1);
        track.hits = 0;
        match track.status {
            TrackStatus::Tentative => {
                track.status = TrackStatus::Deleted;
                Some(LifecycleKind::Deleted)
            }
            TrackStatus::Confirmed if track.misses > self.max_lost_frames => {
                track.status = TrackStatus::Deleted;
                Some(LifecycleKind::Deleted)
            }
            TrackStatus::Confirmed => {
                track.status = TrackStatus::Lost;
                Some(LifecycleKind::Lost)
            }
            TrackStatus::Lost if track.misses > self.max_lost_frames => {
                track.status = TrackStatus::Deleted;
                Some(LifecycleKind::Deleted)
            }
            TrackStatus::Lost | TrackStatus::Deleted => None,
        }
    }

    /// Remove deleted tracks from the live set and hand them back.
    pub fn prune_deleted(tracks: &mut Vec<Track>) -> Vec<Track> {
        let (deleted, live): (Vec<Track>, Vec<Track>) =
            tracks.drain(..).partition(|t| t.status == TrackStatus::Deleted);
        *tracks = live;
        deleted
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{geometry::BBox, types::VehicleClass};

    fn manager(min_hits: u32, max_lost_frames: u32) -> TrackManager {
        TrackManager::new(&TrackingConfig {
            min_hits,
            max_lost_frames,
            ..Default::default()
        })
    }

    fn det() -> Detection {
        Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.9, VehicleClass::Car)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let mut mgr = manager(3, 30);
        let kf = BoxKalmanFilter::default();
        let a = mgr.birth_track(&kf, &det(), 0.0, 100.0);
        let b = mgr.birth_track(&kf, &det(), 0.0, 100.0);
        assert_eq!(a.id, TrackId(1));
        assert_eq!(b.id, TrackId(2));
        assert_eq!(mgr.peek_next_id(), TrackId(3));
    }

    #[test]
    fn tentative_confirms_after_min_hits() {
        let mut mgr = manager(3, 30);
        let mut track = mgr.birth_track(&BoxKalmanFilter::default(), &det(), 0.0, 100.0);
        assert_eq!(track.hits, 1);
        assert_eq!(mgr.register_hit(&mut track), None);
        assert_eq!(track.status, TrackStatus::Tentative, "not confirmed at hit 2");
        assert_eq!(mgr.register_hit(&mut track), Some(LifecycleKind::Confirmed));
        assert_eq!(track.status, TrackStatus::Confirmed);
    }

    #[test]
    fn tentative_dies_on_first_miss() {
        let mut mgr = manager(3, 30);
        let mut track = mgr.birth_track(&BoxKalmanFilter::default(), &det(), 0.0, 100.0);
        assert_eq!(mgr.register_miss(&mut track), Some(LifecycleKind::Deleted));
        assert_eq!(track.status, TrackStatus::Deleted);
    }

    #[test]
    fn lost_track_recovers_then_expires() {
        let mut mgr = manager(1, 2);
        let mut track = mgr.birth_track(&BoxKalmanFilter::default(), &det(), 0.0, 100.0);
        assert_eq!(track.status, TrackStatus::Confirmed);

        assert_eq!(mgr.register_miss(&mut track), Some(LifecycleKind::Lost));
        assert_eq!(mgr.register_hit(&mut track), Some(LifecycleKind::Recovered));
        assert_eq!(track.status, TrackStatus::Confirmed);
        assert_eq!(track.misses, 0);

        assert_eq!(mgr.register_miss(&mut track), Some(LifecycleKind::Lost)); // 1
        assert_eq!(mgr.register_miss(&mut track), None); // 2, still within ceiling
        assert_eq!(mgr.register_miss(&mut track), Some(LifecycleKind::Deleted)); // 3 > 2
    }

    #[test]
    fn prune_returns_deleted_tracks() {
        let mut mgr = manager(3, 30);
        let kf = BoxKalmanFilter::default();
        let mut tracks = vec![
            mgr.birth_track(&kf, &det(), 0.0, 100.0),
            mgr.birth_track(&kf, &det(), 0.0, 100.0),
        ];
        tracks[0].status = TrackStatus::Deleted;
        let removed = TrackManager::prune_deleted(&mut tracks);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, TrackId(1));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, TrackId(2));
    }
}
