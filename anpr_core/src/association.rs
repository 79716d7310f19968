//! Data association between predicted track boxes and frame detections.
//!
//! # Algorithm pipeline
//! 1. Every (track, detection) pair with IOU ≥ threshold becomes an edge of
//!    a sparse bipartite graph. Degenerate predicted boxes have IOU 0 and
//!    therefore never produce edges.
//! 2. [`AssociationMethod::Greedy`]: edges are taken by descending IOU, ties
//!    broken by higher detection confidence, then lower detection index,
//!    then lower track index. Fully deterministic.
//! 3. [`AssociationMethod::Optimal`]: the graph is partitioned into
//!    **connected components** (union-find) and each component is solved
//!    with the **Hungarian algorithm** on cost `1 − IOU`.

use crate::geometry::{iou, BBox};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Cost of a (track, detection) cell that has no edge. Large enough that
/// the solver always prefers the dummy column.
const FORBIDDEN_COST: f64 = 1.0e6;

/// Cost nudge separating equal-IOU edges; far below any real IOU gap.
const TIE_EPSILON: f64 = 1.0e-9;

/// Which matcher the lifecycle manager runs each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationMethod {
    #[default]
    Greedy,
    Optimal,
}

// ---------------------------------------------------------------------------
// Bipartite graph
// ---------------------------------------------------------------------------

/// A gate-passing (track, detection) pair.
#[derive(Clone, Debug)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub det_idx: usize,
    pub iou: f64,
}

/// Sparse bipartite graph: edges between track indices and detection indices.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub edges: Vec<AssignEdge>,
    pub n_tracks: usize,
    pub n_dets: usize,
}

impl BipartiteGraph {
    pub fn new(n_tracks: usize, n_dets: usize) -> Self {
        Self {
            edges: Vec::new(),
            n_tracks,
            n_dets,
        }
    }

    /// Build the graph from predicted boxes and detection boxes, keeping
    /// pairs whose IOU reaches `threshold`.
    pub fn from_boxes(tracks: &[BBox], dets: &[BBox], threshold: f64) -> Self {
        let mut graph = Self::new(tracks.len(), dets.len());
        for (ti, tb) in tracks.iter().enumerate() {
            for (di, db) in dets.iter().enumerate() {
                let v = iou(tb, db);
                if v > 0.0 && v >= threshold {
                    graph.add_edge(ti, di, v);
                }
            }
        }
        graph
    }

    pub fn add_edge(&mut self, track_idx: usize, det_idx: usize, iou: f64) {
        self.edges.push(AssignEdge {
            track_idx,
            det_idx,
            iou,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Union-Find (path compression + union by rank)
// ---------------------------------------------------------------------------

pub(crate) struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub(crate) fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]]; // path halving
            x = self.parent[x];
        }
        x
    }

    pub(crate) fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            Ordering::Less => self.parent[rx] = ry,
            Ordering::Greater => self.parent[ry] = rx,
            Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

/// A single connected component in the bipartite graph.
#[derive(Clone, Debug)]
pub struct Component {
    pub track_indices: Vec<usize>,
    pub det_indices: Vec<usize>,
    pub edges: Vec<AssignEdge>,
}

/// Partition the bipartite graph into connected components.
///
/// Tracks and detections share one node space:
/// - Track i     → node i
/// - Detection j → node n_tracks + j
///
/// Components are returned ordered by their smallest track index.
pub fn partition_components(graph: &BipartiteGraph) -> Vec<Component> {
    let n_total = graph.n_tracks + graph.n_dets;
    let mut uf = UnionFind::new(n_total);

    for e in &graph.edges {
        uf.union(e.track_idx, graph.n_tracks + e.det_idx);
    }

    let mut comp_map: HashMap<usize, Component> = HashMap::new();
    for e in &graph.edges {
        let root = uf.find(e.track_idx);
        let comp = comp_map.entry(root).or_insert_with(|| Component {
            track_indices: Vec::new(),
            det_indices: Vec::new(),
            edges: Vec::new(),
        });
        comp.edges.push(e.clone());
    }

    for comp in comp_map.values_mut() {
        comp.track_indices = comp.edges.iter().map(|e| e.track_idx).collect();
        comp.track_indices.sort_unstable();
        comp.track_indices.dedup();
        comp.det_indices = comp.edges.iter().map(|e| e.det_idx).collect();
        comp.det_indices.sort_unstable();
        comp.det_indices.dedup();
    }

    let mut comps: Vec<Component> = comp_map.into_values().collect();
    comps.sort_by_key(|c| c.track_indices.first().copied().unwrap_or(usize::MAX));
    comps
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Assignment result: matched (track_idx, det_idx) pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    /// Track indices that were NOT matched (missed this frame), ascending
    pub unmatched_tracks: Vec<usize>,
    /// Detection indices not matched (birth candidates), ascending
    pub unmatched_dets: Vec<usize>,
}

impl Assignment {
    /// Fill the unmatched lists from the accepted pairs.
    fn complete(mut pairs: Vec<(usize, usize)>, n_tracks: usize, n_dets: usize) -> Self {
        let mut track_used = vec![false; n_tracks];
        let mut det_used = vec![false; n_dets];
        for &(t, d) in &pairs {
            track_used[t] = true;
            det_used[d] = true;
        }
        pairs.sort_unstable();
        Self {
            pairs,
            unmatched_tracks: (0..n_tracks).filter(|&t| !track_used[t]).collect(),
            unmatched_dets: (0..n_dets).filter(|&d| !det_used[d]).collect(),
        }
    }
}

/// Associate predicted track boxes with detections.
///
/// `det_confidences[j]` is the detector score of detection `j`, used only to
/// break IOU ties: higher confidence first, then lower detection index.
pub fn associate(
    track_boxes: &[BBox],
    det_boxes: &[BBox],
    det_confidences: &[f64],
    iou_threshold: f64,
    method: AssociationMethod,
) -> Assignment {
    let graph = BipartiteGraph::from_boxes(track_boxes, det_boxes, iou_threshold);
    let pairs = match method {
        AssociationMethod::Greedy => greedy_pairs(&graph, det_confidences),
        AssociationMethod::Optimal => {
            let dummy_cost = 1.0 - iou_threshold;
            partition_components(&graph)
                .iter()
                .flat_map(|comp| hungarian_solve(comp, det_confidences, dummy_cost))
                .collect()
        }
    };
    Assignment::complete(pairs, track_boxes.len(), det_boxes.len())
}

/// Greedy matching by descending IOU with deterministic tie-breaks.
pub fn greedy_pairs(graph: &BipartiteGraph, det_confidences: &[f64]) -> Vec<(usize, usize)> {
    let conf = |d: usize| det_confidences.get(d).copied().unwrap_or(0.0);
    let mut edges: Vec<&AssignEdge> = graph.edges.iter().collect();
    edges.sort_by(|a, b| {
        b.iou
            .total_cmp(&a.iou)
            .then_with(|| conf(b.det_idx).total_cmp(&conf(a.det_idx)))
            .then_with(|| a.det_idx.cmp(&b.det_idx))
            .then_with(|| a.track_idx.cmp(&b.track_idx))
    });

    let mut track_used = vec![false; graph.n_tracks];
    let mut det_used = vec![false; graph.n_dets];
    let mut pairs = Vec::new();
    for e in edges {
        if !track_used[e.track_idx] && !det_used[e.det_idx] {
            track_used[e.track_idx] = true;
            det_used[e.det_idx] = true;
            pairs.push((e.track_idx, e.det_idx));
        }
    }
    pairs
}

/// Solve one component optimally. Returns matched (track, detection) pairs
/// in global indices.
///
/// The square cost matrix has size `nt + nd`: real costs top-left, a dummy
/// "missed" column block for tracks, a dummy "new" row block for
/// detections and zeros bottom-right, so every node can stay unmatched.
/// Each real cost carries a tiny penalty growing with the detection's rank
/// by (confidence desc, index asc), so equal-IOU ties resolve like greedy.
pub fn hungarian_solve(
    component: &Component,
    det_confidences: &[f64],
    dummy_cost: f64,
) -> Vec<(usize, usize)> {
    let nt = component.track_indices.len();
    let nd = component.det_indices.len();
    if nt == 0 || nd == 0 {
        return Vec::new();
    }

    let n = nt + nd;
    let mut cost = vec![0.0; n * n];
    for r in 0..n {
        for c in 0..n {
            cost[r * n + c] = match (r < nt, c < nd) {
                (true, true) => FORBIDDEN_COST,
                (true, false) | (false, true) => dummy_cost,
                (false, false) => 0.0,
            };
        }
    }

    let track_local: HashMap<usize, usize> = component
        .track_indices
        .iter()
        .enumerate()
        .map(|(i, &t)| (t, i))
        .collect();
    let det_local: HashMap<usize, usize> = component
        .det_indices
        .iter()
        .enumerate()
        .map(|(j, &d)| (d, j))
        .collect();

    let conf = |d: usize| det_confidences.get(d).copied().unwrap_or(0.0);
    let mut ranked: Vec<usize> = component.det_indices.clone();
    ranked.sort_by(|&a, &b| conf(b).total_cmp(&conf(a)).then_with(|| a.cmp(&b)));
    let tie_rank: HashMap<usize, usize> = ranked.iter().enumerate().map(|(r, &d)| (d, r)).collect();

    let mut has_edge = vec![false; nt * nd];
    for e in &component.edges {
        if let (Some(&ri), Some(&ci)) = (track_local.get(&e.track_idx), det_local.get(&e.det_idx)) {
            let rank = tie_rank.get(&e.det_idx).copied().unwrap_or(nd);
            cost[ri * n + ci] = 1.0 - e.iou + TIE_EPSILON * rank as f64;
            has_edge[ri * nd + ci] = true;
        }
    }

    run_hungarian(&cost, n)
        .iter()
        .enumerate()
        .filter(|&(ri, &ci)| ri < nt && ci < nd && has_edge[ri * nd + ci])
        .map(|(ri, &ci)| (component.track_indices[ri], component.det_indices[ci]))
        .collect()
}

/// Core Hungarian algorithm on a square n×n cost matrix (row-major).
/// Returns row_assignment[row] = assigned_column.
fn run_hungarian(cost: &[f64], n: usize) -> Vec<usize> {
    // Potentials for rows (u) and columns (v)
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    // p[j] = row assigned to column j (1-indexed, 0 = none)
    let mut p = vec![0usize; n + 1];
    // way[j] = previous column in augmenting path
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if !used[j] {
                    let val = cost[(i0 - 1) * n + (j - 1)] - u[i0] - v[j];
                    if val < minv[j] {
                        minv[j] = val;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_assign = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_assign[p[j] - 1] = j - 1;
        }
    }
    row_assign
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
