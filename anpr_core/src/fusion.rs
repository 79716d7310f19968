//! Plate Fusion Engine: per-track OCR sample history and consensus.
//!
//! Samples are clustered by edit distance (single linkage), the cluster with
//! the highest summed confidence wins, and its best sample is the fused text.
//! Once a cluster gathers `fusion_min_samples` members the plate locks and
//! stays fixed for the rest of the track's life.

use crate::{
    association::UnionFind,
    config::FusionConfig,
    types::{PlateCandidate, Timestamp, TrackId},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Consensus plate for one track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedPlate {
    pub text: String,
    /// Members of the winning cluster
    pub support: usize,
    pub mean_confidence: f64,
    pub locked: bool,
}

/// One normalised sample kept in a track's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlateSample {
    pub text: String,
    pub confidence: f64,
    pub timestamp: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Confidence at or below the floor, or not finite
    LowConfidence,
    /// Nothing usable left after normalisation
    Malformed,
}

/// What happened to an ingested candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Rejected(RejectReason),
    /// Stored in the history
    Recorded,
    /// Stored, and this sample locked the plate
    Locked,
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Uppercase and keep ASCII letters and digits only.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Edit distance (insert, delete, substitute) over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub = prev[j] + usize::from(ca != cb);
            cur[j + 1] = sub.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// Consensus over a sample history (oldest first). Pure.
///
/// Returns `None` for an empty history.
pub fn fuse(samples: &[PlateSample], radius: usize, lock_threshold: usize) -> Option<FusedPlate> {
    if samples.is_empty() {
        return None;
    }

    let mut uf = UnionFind::new(samples.len());
    for i in 0..samples.len() {
        for j in (i + 1)..samples.len() {
            if levenshtein(&samples[i].text, &samples[j].text) <= radius {
                uf.union(i, j);
            }
        }
    }

    // Clusters in order of their first member
    let mut root_to_cluster: HashMap<usize, usize> = HashMap::new();
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    for i in 0..samples.len() {
        let root = uf.find(i);
        let idx = *root_to_cluster.entry(root).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[idx].push(i);
    }

    let score = |members: &[usize]| -> f64 { members.iter().map(|&i| samples[i].confidence).sum() };

    // Highest score, then larger cluster; strict comparison keeps the
    // earliest cluster on a full tie.
    let mut best = &clusters[0];
    for cluster in &clusters[1..] {
        let (s, bs) = (score(cluster), score(best));
        if s > bs || (s == bs && cluster.len() > best.len()) {
            best = cluster;
        }
    }

    let mut rep = best[0];
    for &i in &best[1..] {
        if samples[i].confidence > samples[rep].confidence {
            rep = i;
        }
    }

    let support = best.len();
    Some(FusedPlate {
        text: samples[rep].text.clone(),
        support,
        mean_confidence: score(best) / support as f64,
        locked: support >= lock_threshold,
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
struct TrackPlates {
    samples: VecDeque<PlateSample>,
    fused: Option<FusedPlate>,
}

/// Per-track sample histories and fused plates.
#[derive(Debug)]
pub struct PlateFusionEngine {
    pub config: FusionConfig,
    tracks: HashMap<TrackId, TrackPlates>,
}

impl PlateFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
        }
    }

    /// Record one OCR sample for its track and refresh the consensus.
    pub fn ingest(&mut self, candidate: &PlateCandidate) -> IngestOutcome {
        if !candidate.confidence.is_finite() || candidate.confidence <= self.config.min_plate_confidence {
            return IngestOutcome::Rejected(RejectReason::LowConfidence);
        }
        let text = normalize_plate(&candidate.text);
        if text.len() < self.config.min_plate_len {
            debug!(track = %candidate.track_id, raw = %candidate.text, "discarding malformed plate text");
            return IngestOutcome::Rejected(RejectReason::Malformed);
        }

        let entry = self.tracks.entry(candidate.track_id).or_default();
        if entry.samples.len() >= self.config.max_samples {
            entry.samples.pop_front();
        }
        entry.samples.push_back(PlateSample {
            text,
            confidence: candidate.confidence,
            timestamp: candidate.timestamp,
        });

        if entry.fused.as_ref().is_some_and(|f| f.locked) {
            return IngestOutcome::Recorded;
        }

        let samples: Vec<PlateSample> = entry.samples.iter().cloned().collect();
        entry.fused = fuse(&samples, self.config.cluster_radius, self.config.fusion_min_samples);
        match &entry.fused {
            Some(f) if f.locked => {
                info!(track = %candidate.track_id, plate = %f.text, support = f.support, "plate locked");
                IngestOutcome::Locked
            }
            _ => IngestOutcome::Recorded,
        }
    }

    /// Current consensus for a track, if any sample was recorded.
    pub fn current(&self, track_id: TrackId) -> Option<&FusedPlate> {
        self.tracks.get(&track_id).and_then(|t| t.fused.as_ref())
    }

    /// Recorded samples for a track, oldest first.
    pub fn history(&self, track_id: TrackId) -> Vec<PlateSample> {
        self.tracks
            .get(&track_id)
            .map(|t| t.samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Forget everything about a track.
    pub fn release(&mut self, track_id: TrackId) {
        self.tracks.remove(&track_id);
    }

    /// Tracks with at least one recorded sample.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
