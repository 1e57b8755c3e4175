//! # Topology Metrics
//!
//! Summary statistics of a [`SparseTopology`], reported by the CLI `status`
//! and `run` commands.

use crate::RelsimError;
use crate::topology::SparseTopology;
use serde::{Deserialize, Serialize};

/// Degree and weight statistics of one topology.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopologyMetrics {
    pub node_count: usize,
    /// Directed CSR entries.
    pub nnz: usize,
    pub edge_count: usize,
    /// Nodes with no neighbour.
    pub isolated_nodes: usize,
    pub min_degree: usize,
    pub max_degree: usize,
    pub mean_degree: f64,
    /// Weight statistics; all 0 when there is no edge.
    pub min_weight: f64,
    pub max_weight: f64,
    pub mean_weight: f64,
}

impl TopologyMetrics {
    /// Compute metrics from a ready topology.
    pub fn from_topology(topology: &SparseTopology) -> Result<Self, RelsimError> {
        topology.ensure_ready()?;
        let n = topology.node_count();
        let nnz = topology.nnz();

        let degrees = topology.row_offsets().windows(2).map(|w| w[1] - w[0]);
        let (mut min_degree, mut max_degree, mut isolated) = (usize::MAX, 0, 0);
        for d in degrees {
            min_degree = min_degree.min(d);
            max_degree = max_degree.max(d);
            if d == 0 {
                isolated += 1;
            }
        }

        let weights = topology.edge_weights();
        let (min_weight, max_weight, mean_weight) = if weights.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let min = weights.iter().copied().fold(f64::INFINITY, f64::min);
            let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (min, max, weights.iter().sum::<f64>() / nnz as f64)
        };

        Ok(Self {
            node_count: n,
            nnz,
            edge_count: topology.undirected_edge_count(),
            isolated_nodes: isolated,
            min_degree,
            max_degree,
            mean_degree: nnz as f64 / n as f64,
            min_weight,
            max_weight,
            mean_weight,
        })
    }
}
