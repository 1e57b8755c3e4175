//! # Sparse Topology
//!
//! Canonical compressed-sparse-row adjacency store.
//!
//! A topology is built once from an [`EdgeList`] or a [`DenseAdjacency`],
//! validated, and marked ready. It is never patched structurally: every
//! mutation produces a brand-new `SparseTopology` that replaces the old one
//! wholesale. Only the per-node potential may be swapped in place.
//!
//! ## Layout
//!
//! - `row_offsets[N+1]`: monotone, `row_offsets[0] = 0`, `row_offsets[N] = nnz`
//! - `col_indices[nnz]`: sorted ascending within each row, no duplicates
//! - `edge_weights[nnz]`: finite and non-negative
//! - `node_potential[N]`: finite
//!
//! Every undirected edge `(i, j)` is stored twice, once in each row, with the
//! same weight.

use crate::RelsimError;
use crate::primitives::MAX_NODE_COUNT;
use crate::types::try_zeroed;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// CONSTRUCTION INPUTS
// =============================================================================

/// Edge-list construction input.
///
/// `sources[k]`, `targets[k]` and `weights[k]` describe one undirected edge.
/// Both directions are recorded; when the same pair appears more than once
/// the last occurrence wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeList {
    pub node_count: usize,
    pub sources: Vec<u32>,
    pub targets: Vec<u32>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub potential: Option<Vec<f64>>,
}

impl EdgeList {
    /// Create an edge list with no edges and zero potential.
    #[must_use]
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            sources: Vec::new(),
            targets: Vec::new(),
            weights: Vec::new(),
            potential: None,
        }
    }

    /// Attach a per-node potential.
    #[must_use]
    pub fn with_potential(mut self, potential: Vec<f64>) -> Self {
        self.potential = Some(potential);
        self
    }

    /// Append one undirected edge.
    pub fn push(&mut self, source: u32, target: u32, weight: f64) {
        self.sources.push(source);
        self.targets.push(target);
        self.weights.push(weight);
    }

    /// Number of edges listed (before deduplication).
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if no edge is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Open chain `0 - 1 - ... - (n-1)`.
    #[must_use]
    pub fn path(node_count: usize, weight: f64) -> Self {
        let mut list = Self::new(node_count);
        for i in 1..node_count {
            list.push((i - 1) as u32, i as u32, weight);
        }
        list
    }

    /// Closed ring. Rings shorter than three nodes degrade to a path.
    #[must_use]
    pub fn ring(node_count: usize, weight: f64) -> Self {
        let mut list = Self::path(node_count, weight);
        if node_count >= 3 {
            list.push((node_count - 1) as u32, 0, weight);
        }
        list
    }

    /// Rectangular 4-neighbour lattice, nodes numbered row-major.
    #[must_use]
    pub fn grid(width: usize, height: usize, weight: f64) -> Self {
        let mut list = Self::new(width.saturating_mul(height));
        for y in 0..height {
            for x in 0..width {
                let id = (y * width + x) as u32;
                if x + 1 < width {
                    list.push(id, id + 1, weight);
                }
                if y + 1 < height {
                    list.push(id, id + width as u32, weight);
                }
            }
        }
        list
    }
}

/// Dense construction input.
///
/// `edges` and `weights` are `N x N` row-major. Entry `(i, j)` with
/// `edges[i*N + j]` set records the undirected edge `{i, j}`; because the
/// matrix is read row-major, a later `(j, i)` entry overrides `(i, j)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseAdjacency {
    pub node_count: usize,
    pub edges: Vec<bool>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub potential: Option<Vec<f64>>,
}

// =============================================================================
// SPARSE TOPOLOGY
// =============================================================================

/// The CSR adjacency store.
///
/// `SparseTopology::default()` is an unbuilt placeholder: it is not ready and
/// every data operation on it fails with `IllegalState`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseTopology {
    row_offsets: Vec<usize>,
    col_indices: Vec<u32>,
    edge_weights: Vec<f64>,
    node_potential: Vec<f64>,
    ready: bool,
}

/// One undirected edge in canonical `(lo, hi)` form, tagged with its input
/// position so duplicates resolve to the last write.
#[derive(Debug, Clone, Copy)]
struct PairEntry {
    lo: u32,
    hi: u32,
    seq: usize,
    weight: f64,
}

impl SparseTopology {
    /// Build from an edge list.
    pub fn from_edge_list(list: &EdgeList) -> Result<Self, RelsimError> {
        let n = list.node_count;
        validate_node_count(n)?;

        let m = list.sources.len();
        if list.targets.len() != m || list.weights.len() != m {
            return Err(RelsimError::invalid(format!(
                "edge list arrays disagree: {} sources, {} targets, {} weights",
                m,
                list.targets.len(),
                list.weights.len()
            )));
        }
        let potential = resolve_potential(list.potential.as_deref(), n)?;

        let mut entries = Vec::with_capacity(m);
        for (k, ((&s, &t), &w)) in list
            .sources
            .iter()
            .zip(&list.targets)
            .zip(&list.weights)
            .enumerate()
        {
            check_index(s, n)?;
            check_index(t, n)?;
            check_weight(w)?;
            if s == t {
                continue;
            }
            entries.push(PairEntry {
                lo: s.min(t),
                hi: s.max(t),
                seq: k,
                weight: w,
            });
        }

        Self::from_entries(n, entries, potential)
    }

    /// Build from dense `N x N` matrices.
    pub fn from_dense(dense: &DenseAdjacency) -> Result<Self, RelsimError> {
        let n = dense.node_count;
        validate_node_count(n)?;

        let cells = n
            .checked_mul(n)
            .ok_or_else(|| RelsimError::invalid(format!("dense matrix {n}x{n} overflows")))?;
        if dense.edges.len() != cells || dense.weights.len() != cells {
            return Err(RelsimError::invalid(format!(
                "dense matrices must have {} cells, got {} edges and {} weights",
                cells,
                dense.edges.len(),
                dense.weights.len()
            )));
        }
        let potential = resolve_potential(dense.potential.as_deref(), n)?;

        let mut entries = Vec::new();
        for i in 0..n {
            for j in 0..n {
                let cell = i * n + j;
                if !dense.edges[cell] || i == j {
                    continue;
                }
                let w = dense.weights[cell];
                check_weight(w)?;
                entries.push(PairEntry {
                    lo: i.min(j) as u32,
                    hi: i.max(j) as u32,
                    seq: cell,
                    weight: w,
                });
            }
        }

        Self::from_entries(n, entries, potential)
    }

    /// Rebuild from raw CSR arrays (compaction output, checkpoints).
    ///
    /// The arrays must already satisfy every layout invariant, including
    /// sorted rows and weight symmetry.
    pub fn from_csr(
        row_offsets: Vec<usize>,
        col_indices: Vec<u32>,
        edge_weights: Vec<f64>,
        node_potential: Vec<f64>,
    ) -> Result<Self, RelsimError> {
        let Some(n) = row_offsets.len().checked_sub(1) else {
            return Err(RelsimError::invalid("row_offsets must have N+1 entries"));
        };
        validate_node_count(n)?;

        if row_offsets[0] != 0 {
            return Err(RelsimError::invalid("row_offsets[0] must be 0"));
        }
        if row_offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(RelsimError::invalid("row_offsets must be non-decreasing"));
        }
        let nnz = row_offsets[n];
        if col_indices.len() != nnz || edge_weights.len() != nnz {
            return Err(RelsimError::invalid(format!(
                "row_offsets[N] = {} but {} column indices and {} weights",
                nnz,
                col_indices.len(),
                edge_weights.len()
            )));
        }
        if node_potential.len() != n {
            return Err(RelsimError::invalid(format!(
                "potential has {} entries, expected {}",
                node_potential.len(),
                n
            )));
        }
        check_potential(&node_potential)?;
        edge_weights.par_iter().try_for_each(|&w| check_weight(w))?;

        let candidate = Self {
            row_offsets,
            col_indices,
            edge_weights,
            node_potential,
            ready: true,
        };

        (0..n).into_par_iter().try_for_each(|i| {
            let (cols, weights) = candidate.row(i);
            if cols.windows(2).any(|w| w[1] <= w[0]) {
                return Err(RelsimError::invalid(format!(
                    "row {i} is not strictly sorted"
                )));
            }
            for (&j, &w) in cols.iter().zip(weights) {
                check_index(j, n)?;
                if j as usize == i {
                    return Err(RelsimError::invalid(format!("self-loop at node {i}")));
                }
                let (back_cols, back_weights) = candidate.row(j as usize);
                match back_cols.binary_search(&(i as u32)) {
                    Ok(pos) if back_weights[pos] == w => {}
                    _ => {
                        return Err(RelsimError::invalid(format!(
                            "edge ({i},{j}) has no symmetric partner"
                        )));
                    }
                }
            }
            Ok(())
        })?;

        Ok(candidate)
    }

    /// Assemble canonical, already-validated pairs into CSR.
    ///
    /// `pairs` must be sorted by `(lo, hi)` with `lo < hi` and no duplicates;
    /// the scatter then emits every row in ascending column order.
    pub(crate) fn from_canonical_pairs(
        node_count: usize,
        pairs: &[(u32, u32, f64)],
        node_potential: Vec<f64>,
    ) -> Result<Self, RelsimError> {
        let mut degree: Vec<usize> = try_zeroed("degree", node_count)?;
        for &(lo, hi, _) in pairs {
            degree[lo as usize] += 1;
            degree[hi as usize] += 1;
        }

        let row_offsets = exclusive_prefix_sum(&degree)?;
        let nnz = row_offsets[node_count];

        let mut cursor = row_offsets[..node_count].to_vec();
        let mut col_indices: Vec<u32> = try_zeroed("col_indices", nnz)?;
        let mut edge_weights: Vec<f64> = try_zeroed("edge_weights", nnz)?;

        for &(lo, hi, w) in pairs {
            for (row, target) in [(lo, hi), (hi, lo)] {
                let slot = cursor[row as usize];
                col_indices[slot] = target;
                edge_weights[slot] = w;
                cursor[row as usize] = slot + 1;
            }
        }

        Ok(Self {
            row_offsets,
            col_indices,
            edge_weights,
            node_potential,
            ready: true,
        })
    }

    /// Build from validated `(a, b, w)` triples given in write order: pairs
    /// are canonicalised, self-loops dropped, and the last write wins.
    pub(crate) fn from_ordered_pairs(
        node_count: usize,
        pairs: &[(u32, u32, f64)],
        node_potential: Vec<f64>,
    ) -> Result<Self, RelsimError> {
        let entries = pairs
            .iter()
            .enumerate()
            .filter(|(_, (a, b, _))| a != b)
            .map(|(seq, &(a, b, weight))| PairEntry {
                lo: a.min(b),
                hi: a.max(b),
                seq,
                weight,
            })
            .collect();
        Self::from_entries(node_count, entries, node_potential)
    }

    /// Wrap arrays produced by a structure-preserving pass (compaction) that
    /// already upholds every CSR invariant.
    pub(crate) fn from_raw_parts(
        row_offsets: Vec<usize>,
        col_indices: Vec<u32>,
        edge_weights: Vec<f64>,
        node_potential: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(row_offsets.last().copied(), Some(col_indices.len()));
        debug_assert_eq!(col_indices.len(), edge_weights.len());
        debug_assert_eq!(row_offsets.len(), node_potential.len() + 1);
        Self {
            row_offsets,
            col_indices,
            edge_weights,
            node_potential,
            ready: true,
        }
    }

    fn from_entries(
        node_count: usize,
        mut entries: Vec<PairEntry>,
        node_potential: Vec<f64>,
    ) -> Result<Self, RelsimError> {
        // Latest write first within a pair, so dedup keeps it.
        entries.par_sort_unstable_by_key(|e| (e.lo, e.hi, std::cmp::Reverse(e.seq)));
        entries.dedup_by_key(|e| (e.lo, e.hi));

        let pairs: Vec<(u32, u32, f64)> = entries.iter().map(|e| (e.lo, e.hi, e.weight)).collect();
        let topology = Self::from_canonical_pairs(node_count, &pairs, node_potential)?;

        tracing::debug!(
            node_count,
            nnz = topology.nnz(),
            "topology constructed"
        );
        Ok(topology)
    }

    // =========================================================================
    // READINESS
    // =========================================================================

    /// Whether the topology has been built and may be used.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Fail with `IllegalState` unless the topology is ready.
    pub fn ensure_ready(&self) -> Result<(), RelsimError> {
        if self.ready {
            Ok(())
        } else {
            Err(RelsimError::illegal_state(
                "topology used before construction completed",
            ))
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Number of nodes `N`.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.row_offsets.len().saturating_sub(1)
    }

    /// Number of directed entries (each undirected edge counts twice).
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.col_indices.len()
    }

    /// Number of undirected edges.
    #[must_use]
    pub fn undirected_edge_count(&self) -> usize {
        self.col_indices.len() / 2
    }

    #[must_use]
    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    #[must_use]
    pub fn col_indices(&self) -> &[u32] {
        &self.col_indices
    }

    #[must_use]
    pub fn edge_weights(&self) -> &[f64] {
        &self.edge_weights
    }

    #[must_use]
    pub fn node_potential(&self) -> &[f64] {
        &self.node_potential
    }

    /// Columns and weights of one row. `node` must be in range.
    #[inline]
    pub(crate) fn row(&self, node: usize) -> (&[u32], &[f64]) {
        let start = self.row_offsets[node];
        let end = self.row_offsets[node + 1];
        (&self.col_indices[start..end], &self.edge_weights[start..end])
    }

    /// Neighbours of `node` with their weights, in ascending node order.
    pub fn neighbors(
        &self,
        node: usize,
    ) -> Result<impl Iterator<Item = (u32, f64)> + '_, RelsimError> {
        self.check_node(node)?;
        let (cols, weights) = self.row(node);
        Ok(cols.iter().copied().zip(weights.iter().copied()))
    }

    /// Number of neighbours of `node`.
    pub fn degree(&self, node: usize) -> Result<usize, RelsimError> {
        self.check_node(node)?;
        Ok(self.row_offsets[node + 1] - self.row_offsets[node])
    }

    /// Weight of the edge `(from, to)`, found by binary search in `from`'s row.
    pub fn edge_weight(&self, from: usize, to: usize) -> Result<Option<f64>, RelsimError> {
        self.check_node(from)?;
        self.check_node(to)?;
        let (cols, weights) = self.row(from);
        Ok(cols.binary_search(&(to as u32)).ok().map(|pos| weights[pos]))
    }

    /// Every undirected edge once, as `(lo, hi, weight)` with `lo < hi`,
    /// in ascending `(lo, hi)` order.
    pub fn canonical_edges(&self) -> impl Iterator<Item = (u32, u32, f64)> + '_ {
        (0..self.node_count()).flat_map(move |i| {
            let (cols, weights) = self.row(i);
            cols.iter()
                .zip(weights)
                .filter(move |&(&j, _)| j as usize > i)
                .map(move |(&j, &w)| (i as u32, j, w))
        })
    }

    /// Smallest edge weight present, if any edge exists.
    #[must_use]
    pub fn min_edge_weight(&self) -> Option<f64> {
        self.edge_weights
            .par_iter()
            .copied()
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Export as an edge list (one entry per undirected edge).
    #[must_use]
    pub fn to_edge_list(&self) -> EdgeList {
        let mut list = EdgeList::new(self.node_count());
        for (lo, hi, w) in self.canonical_edges() {
            list.push(lo, hi, w);
        }
        list.with_potential(self.node_potential.clone())
    }

    /// Replace the potential in place. Structure is untouched; O(N).
    pub fn update_potential(&mut self, potential: &[f64]) -> Result<(), RelsimError> {
        self.ensure_ready()?;
        if potential.len() != self.node_count() {
            return Err(RelsimError::invalid(format!(
                "potential has {} entries, expected {}",
                potential.len(),
                self.node_count()
            )));
        }
        check_potential(potential)?;
        self.node_potential.copy_from_slice(potential);
        Ok(())
    }

    fn check_node(&self, node: usize) -> Result<(), RelsimError> {
        self.ensure_ready()?;
        if node >= self.node_count() {
            return Err(RelsimError::invalid(format!(
                "node {} out of range for {} nodes",
                node,
                self.node_count()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

pub(crate) fn validate_node_count(n: usize) -> Result<(), RelsimError> {
    if n == 0 {
        return Err(RelsimError::invalid("topology needs at least one node"));
    }
    if n > MAX_NODE_COUNT {
        return Err(RelsimError::invalid(format!(
            "{n} nodes exceeds the maximum of {MAX_NODE_COUNT}"
        )));
    }
    Ok(())
}

#[inline]
pub(crate) fn check_index(index: u32, n: usize) -> Result<(), RelsimError> {
    if (index as usize) < n {
        Ok(())
    } else {
        Err(RelsimError::invalid(format!(
            "node index {index} out of range for {n} nodes"
        )))
    }
}

#[inline]
pub(crate) fn check_weight(w: f64) -> Result<(), RelsimError> {
    if w.is_finite() && w >= 0.0 {
        Ok(())
    } else {
        Err(RelsimError::invalid(format!(
            "edge weight {w} must be finite and non-negative"
        )))
    }
}

fn check_potential(potential: &[f64]) -> Result<(), RelsimError> {
    match potential.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(RelsimError::invalid(format!(
            "potential[{i}] is not finite"
        ))),
        None => Ok(()),
    }
}

fn resolve_potential(potential: Option<&[f64]>, n: usize) -> Result<Vec<f64>, RelsimError> {
    match potential {
        None => try_zeroed("node_potential", n),
        Some(p) if p.len() != n => Err(RelsimError::invalid(format!(
            "potential has {} entries, expected {}",
            p.len(),
            n
        ))),
        Some(p) => {
            check_potential(p)?;
            Ok(p.to_vec())
        }
    }
}

/// `[0, c0, c0+c1, ...]`, length `counts.len() + 1`.
pub(crate) fn exclusive_prefix_sum(counts: &[usize]) -> Result<Vec<usize>, RelsimError> {
    let mut offsets: Vec<usize> = try_zeroed("row_offsets", counts.len() + 1)?;
    let mut running = 0usize;
    for (i, &c) in counts.iter().enumerate() {
        running += c;
        offsets[i + 1] = running;
    }
    Ok(offsets)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chain3() -> SparseTopology {
        let mut list = EdgeList::new(3);
        list.push(0, 1, 0.5);
        list.push(1, 2, 0.5);
        SparseTopology::from_edge_list(&list).expect("build")
    }

    #[test]
    fn chain_layout() {
        let topo = chain3();
        assert!(topo.is_ready());
        assert_eq!(topo.node_count(), 3);
        assert_eq!(topo.nnz(), 4);
        assert_eq!(topo.row_offsets(), &[0, 1, 3, 4]);
        assert_eq!(topo.col_indices(), &[1, 0, 2, 1]);
        assert_eq!(topo.node_potential(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn rows_sorted_regardless_of_input_order() {
        let mut list = EdgeList::new(4);
        list.push(3, 0, 1.0);
        list.push(2, 0, 1.0);
        list.push(0, 1, 1.0);
        list.push(3, 1, 1.0);
        let topo = SparseTopology::from_edge_list(&list).expect("build");

        for i in 0..4 {
            let cols: Vec<u32> = topo.neighbors(i).expect("row").map(|(j, _)| j).collect();
            let mut sorted = cols.clone();
            sorted.sort_unstable();
            assert_eq!(cols, sorted);
        }
        assert_eq!(topo.degree(0).expect("deg"), 3);
    }

    #[test]
    fn duplicate_edges_last_write_wins() {
        let mut list = EdgeList::new(2);
        list.push(0, 1, 1.0);
        list.push(1, 0, 2.5);
        let topo = SparseTopology::from_edge_list(&list).expect("build");

        assert_eq!(topo.nnz(), 2);
        assert_eq!(topo.edge_weight(0, 1).expect("w"), Some(2.5));
        assert_eq!(topo.edge_weight(1, 0).expect("w"), Some(2.5));
    }

    #[test]
    fn self_loops_are_skipped() {
        let mut list = EdgeList::new(2);
        list.push(1, 1, 3.0);
        list.push(0, 1, 1.0);
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        assert_eq!(topo.nnz(), 2);
        assert_eq!(topo.edge_weight(1, 1).expect("w"), None);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let list = EdgeList {
            node_count: 3,
            sources: vec![0, 1],
            targets: vec![1],
            weights: vec![1.0, 1.0],
            potential: None,
        };
        assert!(matches!(
            SparseTopology::from_edge_list(&list),
            Err(RelsimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut out_of_range = EdgeList::new(2);
        out_of_range.push(0, 2, 1.0);
        assert!(SparseTopology::from_edge_list(&out_of_range).is_err());

        let mut negative = EdgeList::new(2);
        negative.push(0, 1, -1.0);
        assert!(SparseTopology::from_edge_list(&negative).is_err());

        let mut nan = EdgeList::new(2);
        nan.push(0, 1, f64::NAN);
        assert!(SparseTopology::from_edge_list(&nan).is_err());

        let bad_potential = EdgeList::new(2).with_potential(vec![0.0]);
        assert!(SparseTopology::from_edge_list(&bad_potential).is_err());

        let inf_potential = EdgeList::new(2).with_potential(vec![0.0, f64::INFINITY]);
        assert!(SparseTopology::from_edge_list(&inf_potential).is_err());

        assert!(SparseTopology::from_edge_list(&EdgeList::new(0)).is_err());
    }

    #[test]
    fn dense_matches_edge_list() {
        let n = 3;
        let mut edges = vec![false; n * n];
        let mut weights = vec![0.0; n * n];
        edges[1] = true; // (0,1)
        weights[1] = 0.5;
        edges[n + 2] = true; // (1,2)
        weights[n + 2] = 0.5;
        let dense = DenseAdjacency {
            node_count: n,
            edges,
            weights,
            potential: None,
        };

        let from_dense = SparseTopology::from_dense(&dense).expect("dense");
        assert_eq!(from_dense, chain3());
    }

    #[test]
    fn dense_later_entry_overrides() {
        let n = 2;
        let dense = DenseAdjacency {
            node_count: n,
            edges: vec![false, true, true, false],
            weights: vec![0.0, 1.0, 4.0, 0.0],
            potential: Some(vec![1.0, 2.0]),
        };
        let topo = SparseTopology::from_dense(&dense).expect("dense");
        assert_eq!(topo.edge_weight(0, 1).expect("w"), Some(4.0));
        assert_eq!(topo.node_potential(), &[1.0, 2.0]);
    }

    #[test]
    fn dense_shape_mismatch_rejected() {
        let dense = DenseAdjacency {
            node_count: 2,
            edges: vec![false; 3],
            weights: vec![0.0; 4],
            potential: None,
        };
        assert!(matches!(
            SparseTopology::from_dense(&dense),
            Err(RelsimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn from_csr_roundtrip() {
        let topo = chain3();
        let rebuilt = SparseTopology::from_csr(
            topo.row_offsets().to_vec(),
            topo.col_indices().to_vec(),
            topo.edge_weights().to_vec(),
            topo.node_potential().to_vec(),
        )
        .expect("csr");
        assert_eq!(rebuilt, topo);
    }

    #[test]
    fn from_csr_rejects_asymmetric() {
        // 0 -> 1 without 1 -> 0
        let result = SparseTopology::from_csr(vec![0, 1, 1], vec![1], vec![1.0], vec![0.0, 0.0]);
        assert!(matches!(result, Err(RelsimError::InvalidArgument(_))));

        // mismatched weights
        let result = SparseTopology::from_csr(
            vec![0, 1, 2],
            vec![1, 0],
            vec![1.0, 2.0],
            vec![0.0, 0.0],
        );
        assert!(result.is_err());
    }

    #[test]
    fn from_csr_rejects_bad_offsets() {
        assert!(SparseTopology::from_csr(vec![], vec![], vec![], vec![]).is_err());
        assert!(SparseTopology::from_csr(vec![1, 1], vec![], vec![], vec![0.0]).is_err());
        assert!(
            SparseTopology::from_csr(vec![0, 2, 1], vec![1, 0], vec![1.0, 1.0], vec![0.0; 2])
                .is_err()
        );
    }

    #[test]
    fn update_potential_leaves_structure() {
        let mut topo = chain3();
        let before = topo.col_indices().to_vec();
        topo.update_potential(&[1.0, 2.0, 3.0]).expect("update");
        assert_eq!(topo.node_potential(), &[1.0, 2.0, 3.0]);
        assert_eq!(topo.col_indices(), before.as_slice());

        assert!(topo.update_potential(&[1.0]).is_err());
        assert!(topo.update_potential(&[1.0, f64::NAN, 0.0]).is_err());
    }

    #[test]
    fn placeholder_is_not_ready() {
        let mut topo = SparseTopology::default();
        assert!(!topo.is_ready());
        assert!(matches!(
            topo.ensure_ready(),
            Err(RelsimError::IllegalState(_))
        ));
        assert!(matches!(
            topo.update_potential(&[]),
            Err(RelsimError::IllegalState(_))
        ));
        assert!(matches!(topo.degree(0), Err(RelsimError::IllegalState(_))));
    }

    #[test]
    fn canonical_edges_and_edge_list_export() {
        let topo = chain3();
        let edges: Vec<_> = topo.canonical_edges().collect();
        assert_eq!(edges, vec![(0, 1, 0.5), (1, 2, 0.5)]);

        let rebuilt = SparseTopology::from_edge_list(&topo.to_edge_list()).expect("rebuild");
        assert_eq!(rebuilt, topo);
        assert_eq!(topo.min_edge_weight(), Some(0.5));
    }

    #[test]
    fn generators_produce_expected_sizes() {
        let ring = SparseTopology::from_edge_list(&EdgeList::ring(5, 1.0)).expect("ring");
        assert_eq!(ring.nnz(), 10);
        assert!((0..5).all(|i| ring.degree(i).expect("deg") == 2));

        let grid = SparseTopology::from_edge_list(&EdgeList::grid(3, 2, 1.0)).expect("grid");
        // 3x2 grid: 2*2 horizontal + 3 vertical
        assert_eq!(grid.undirected_edge_count(), 7);

        let path = SparseTopology::from_edge_list(&EdgeList::path(1, 1.0)).expect("path");
        assert_eq!(path.nnz(), 0);
        assert_eq!(path.min_edge_weight(), None);
    }

    #[test]
    fn edge_list_json_roundtrip_defaults_potential() {
        let json = r#"{"node_count":2,"sources":[0],"targets":[1],"weights":[1.0]}"#;
        let list: EdgeList = serde_json::from_str(json).expect("parse");
        assert_eq!(list.potential, None);
        assert_eq!(list.len(), 1);
    }
}
