//! # Topology Mutation
//!
//! Two protocols replace a topology with a new one; neither ever patches CSR
//! arrays in place.
//!
//! - **Soft rewiring** ([`compact`]): removal only. Edges lighter than a
//!   threshold are dropped in three passes: per-row survivor counts, an
//!   exclusive prefix sum, and a scatter into disjoint per-row output slices.
//! - **Hard rewiring** ([`EdgeScorer`] + [`apply_proposal`]): a scorer
//!   proposes removals and additions, possibly with a new node count, and a
//!   canonical topology is rebuilt from scratch.
//!
//! Both are pure functions of their inputs. Swapping the result into an
//! engine, and resizing the buffers that depend on it, is
//! [`crate::CayleyEngine`]'s job.

use crate::RelsimError;
use crate::topology::{
    SparseTopology, check_index, check_weight, exclusive_prefix_sum, validate_node_count,
};
use crate::types::try_zeroed;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// SOFT REWIRING
// =============================================================================

/// Drop every edge with weight `< threshold`.
///
/// Returns `Ok(None)` when nothing would be removed; the caller keeps its
/// topology and touches no buffer. Row order is preserved in the output.
pub fn compact(
    topology: &SparseTopology,
    threshold: f64,
) -> Result<Option<SparseTopology>, RelsimError> {
    topology.ensure_ready()?;
    if threshold.is_nan() || threshold.is_infinite() {
        return Err(RelsimError::invalid(format!(
            "rewiring threshold {threshold} is not finite"
        )));
    }

    let n = topology.node_count();
    let counts: Vec<usize> = (0..n)
        .into_par_iter()
        .map(|i| topology.row(i).1.iter().filter(|&&w| w >= threshold).count())
        .collect();

    let offsets = exclusive_prefix_sum(&counts)?;
    let kept = offsets[n];
    if kept == topology.nnz() {
        return Ok(None);
    }

    let mut cols: Vec<u32> = try_zeroed("compacted col_indices", kept)?;
    let mut weights: Vec<f64> = try_zeroed("compacted edge_weights", kept)?;

    // Carve the outputs into one disjoint slice pair per row.
    let mut slices = Vec::with_capacity(n);
    let mut rest_cols = cols.as_mut_slice();
    let mut rest_weights = weights.as_mut_slice();
    for &count in &counts {
        let (row_cols, tail_cols) = std::mem::take(&mut rest_cols).split_at_mut(count);
        let (row_weights, tail_weights) = std::mem::take(&mut rest_weights).split_at_mut(count);
        slices.push((row_cols, row_weights));
        rest_cols = tail_cols;
        rest_weights = tail_weights;
    }

    slices
        .into_par_iter()
        .enumerate()
        .for_each(|(i, (out_cols, out_weights))| {
            let (src_cols, src_weights) = topology.row(i);
            let survivors = src_cols
                .iter()
                .zip(src_weights)
                .filter(|&(_, &w)| w >= threshold);
            for (k, (&j, &w)) in survivors.enumerate() {
                out_cols[k] = j;
                out_weights[k] = w;
            }
        });

    tracing::debug!(
        threshold,
        removed = topology.nnz() - kept,
        remaining = kept,
        "soft rewiring compacted topology"
    );

    Ok(Some(SparseTopology::from_raw_parts(
        offsets,
        cols,
        weights,
        topology.node_potential().to_vec(),
    )))
}

// =============================================================================
// HARD REWIRING
// =============================================================================

/// Structural changes requested by an [`EdgeScorer`].
///
/// Removals are applied to the current topology first, then additions in
/// order; a pair listed more than once takes its last weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationProposal {
    /// Undirected pairs to delete. Pairs that are not edges are ignored.
    pub removals: Vec<(u32, u32)>,
    /// Undirected `(a, b, weight)` edges to insert or overwrite.
    pub additions: Vec<(u32, u32, f64)>,
    /// New node count. `None` keeps the current one.
    #[serde(default)]
    pub node_count: Option<usize>,
}

impl MutationProposal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&mut self, a: u32, b: u32) {
        self.removals.push((a, b));
    }

    pub fn add(&mut self, a: u32, b: u32, weight: f64) {
        self.additions.push((a, b, weight));
    }

    #[must_use]
    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = Some(node_count);
        self
    }

    /// Whether applying this proposal cannot change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty() && self.node_count.is_none()
    }
}

/// Scoring collaborator for hard rewiring.
///
/// Implementations read the topology and the per-node mass buffer and
/// return the changes they want. They must not depend on thread scheduling:
/// the same inputs must yield the same proposal.
pub trait EdgeScorer: Send + Sync + fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Score the topology. `node_mass` has one entry per node.
    fn propose(
        &self,
        topology: &SparseTopology,
        node_mass: &[f64],
    ) -> Result<MutationProposal, RelsimError>;
}

/// Parameters of [`MassProximityScorer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MassScorerConfig {
    /// Edges lighter than this are proposed for removal.
    pub prune_below: f64,
    /// Minimum `coupling * m_i * m_k` for a new link.
    pub link_threshold: f64,
    pub coupling: f64,
    /// Cap on new links owned by one node per cycle.
    pub max_links_per_node: usize,
}

impl Default for MassScorerConfig {
    fn default() -> Self {
        Self {
            prune_below: 0.0,
            link_threshold: 1.0,
            coupling: 1.0,
            max_links_per_node: 4,
        }
    }
}

impl MassScorerConfig {
    pub fn validate(&self) -> Result<(), RelsimError> {
        for (name, value) in [
            ("prune_below", self.prune_below),
            ("link_threshold", self.link_threshold),
            ("coupling", self.coupling),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RelsimError::invalid(format!(
                    "scorer {name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Default scorer: prunes weak edges and closes two-hop triangles between
/// heavy nodes.
///
/// A candidate pair `(i, k)` is two hops apart and not adjacent. Its score is
/// `coupling * m_i * m_k`; pairs scoring at least `link_threshold` are linked
/// with the score as weight. Each pair is owned by its lower node, which
/// keeps at most `max_links_per_node` candidates, best score first and ties
/// broken by the lower partner index.
#[derive(Debug, Clone, Default)]
pub struct MassProximityScorer {
    config: MassScorerConfig,
}

impl MassProximityScorer {
    pub fn new(config: MassScorerConfig) -> Result<Self, RelsimError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &MassScorerConfig {
        &self.config
    }

    fn links_owned_by(
        &self,
        topology: &SparseTopology,
        mass: &[f64],
        i: usize,
    ) -> Vec<(u32, u32, f64)> {
        let (own, _) = topology.row(i);
        let mut partners: Vec<u32> = own
            .iter()
            .flat_map(|&j| topology.row(j as usize).0.iter().copied())
            .filter(|&k| k as usize > i && own.binary_search(&k).is_err())
            .collect();
        partners.sort_unstable();
        partners.dedup();

        let mut scored: Vec<(u32, f64)> = partners
            .into_iter()
            .map(|k| (k, self.config.coupling * mass[i] * mass[k as usize]))
            .filter(|&(_, score)| score.is_finite() && score >= self.config.link_threshold)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.config.max_links_per_node);

        scored
            .into_iter()
            .map(|(k, score)| (i as u32, k, score))
            .collect()
    }
}

impl EdgeScorer for MassProximityScorer {
    fn name(&self) -> &str {
        "mass_proximity"
    }

    fn propose(
        &self,
        topology: &SparseTopology,
        node_mass: &[f64],
    ) -> Result<MutationProposal, RelsimError> {
        topology.ensure_ready()?;
        let n = topology.node_count();
        if node_mass.len() != n {
            return Err(RelsimError::invalid(format!(
                "node_mass has {} entries, expected {}",
                node_mass.len(),
                n
            )));
        }
        if let Some(i) = node_mass.iter().position(|m| !m.is_finite()) {
            return Err(RelsimError::invalid(format!("node_mass[{i}] is not finite")));
        }

        let prune_below = self.config.prune_below;
        let removals: Vec<(u32, u32)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let (cols, weights) = topology.row(i);
                cols.iter()
                    .zip(weights)
                    .filter(move |&(&j, &w)| j as usize > i && w < prune_below)
                    .map(move |(&j, _)| (i as u32, j))
            })
            .collect();

        let additions: Vec<(u32, u32, f64)> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| self.links_owned_by(topology, node_mass, i))
            .collect();

        Ok(MutationProposal {
            removals,
            additions,
            node_count: None,
        })
    }
}

/// Build the topology that results from applying `proposal` to `topology`.
///
/// Every index and weight is validated before anything is built. Edges that
/// touch nodes beyond a reduced node count are dropped; nodes added by a
/// larger count start isolated with zero potential.
pub fn apply_proposal(
    topology: &SparseTopology,
    proposal: &MutationProposal,
) -> Result<SparseTopology, RelsimError> {
    topology.ensure_ready()?;
    let old_n = topology.node_count();
    let new_n = proposal.node_count.unwrap_or(old_n);
    validate_node_count(new_n)?;

    for &(a, b) in &proposal.removals {
        check_index(a, old_n)?;
        check_index(b, old_n)?;
    }
    for &(a, b, w) in &proposal.additions {
        check_index(a, new_n)?;
        check_index(b, new_n)?;
        check_weight(w)?;
    }

    let mut removed: Vec<(u32, u32)> = proposal
        .removals
        .iter()
        .map(|&(a, b)| (a.min(b), a.max(b)))
        .collect();
    removed.sort_unstable();
    removed.dedup();

    let mut pairs: Vec<(u32, u32, f64)> = topology
        .canonical_edges()
        .filter(|&(lo, hi, _)| (hi as usize) < new_n && removed.binary_search(&(lo, hi)).is_err())
        .collect();
    pairs.extend_from_slice(&proposal.additions);

    let mut potential = topology.node_potential().to_vec();
    potential.resize(new_n, 0.0);

    let rebuilt = SparseTopology::from_ordered_pairs(new_n, &pairs, potential)?;
    tracing::debug!(
        removals = proposal.removals.len(),
        additions = proposal.additions.len(),
        old_nodes = old_n,
        new_nodes = new_n,
        nnz = rebuilt.nnz(),
        "mutation proposal applied"
    );
    Ok(rebuilt)
}

// =============================================================================
// TESTS
// =============================================================================
