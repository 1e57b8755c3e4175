//! # Property-Based Tests
//!
//! CSR invariants, mutation laws and evolution invariants over random graphs.

use proptest::collection::vec;
use proptest::prelude::*;
use relsim_core::{
    CayleyEngine, EdgeList, EngineConfig, HealthMonitor, MutationProposal, SparseTopology,
    apply_proposal, compact,
};
use std::collections::BTreeMap;

/// Random edge list over up to 24 nodes, self-loops and duplicates included.
fn edge_list() -> impl Strategy<Value = EdgeList> {
    (1usize..24).prop_flat_map(|n| {
        vec((0..n as u32, 0..n as u32, 0.0f64..2.0), 0..64).prop_map(move |edges| {
            let mut list = EdgeList::new(n);
            for (s, t, w) in edges {
                list.push(s, t, w);
            }
            list
        })
    })
}

/// Check every CSR layout invariant.
fn assert_csr_invariants(topo: &SparseTopology) -> Result<(), TestCaseError> {
    let n = topo.node_count();
    let offsets = topo.row_offsets();
    prop_assert_eq!(offsets.len(), n + 1);
    prop_assert_eq!(offsets[0], 0);
    prop_assert_eq!(offsets[n], topo.nnz());
    prop_assert_eq!(topo.edge_weights().len(), topo.nnz());

    for i in 0..n {
        prop_assert!(offsets[i] <= offsets[i + 1]);
        let row: Vec<(u32, f64)> = topo.neighbors(i).expect("row").collect();
        for pair in row.windows(2) {
            prop_assert!(pair[0].0 < pair[1].0, "row {} not strictly sorted", i);
        }
        for (j, w) in row {
            prop_assert!(j as usize != i);
            prop_assert_eq!(topo.edge_weight(j as usize, i).expect("lookup"), Some(w));
        }
    }
    Ok(())
}

proptest! {
    /// Built topologies satisfy every CSR invariant.
    #[test]
    fn construction_upholds_csr_invariants(list in edge_list()) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        assert_csr_invariants(&topo)?;
    }

    /// The last occurrence of each undirected pair determines its weight.
    #[test]
    fn last_write_wins(list in edge_list()) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");

        let mut expected = BTreeMap::new();
        for ((&s, &t), &w) in list.sources.iter().zip(&list.targets).zip(&list.weights) {
            if s != t {
                expected.insert((s.min(t), s.max(t)), w);
            }
        }
        let actual: BTreeMap<(u32, u32), f64> =
            topo.canonical_edges().map(|(lo, hi, w)| ((lo, hi), w)).collect();
        prop_assert_eq!(actual, expected);
    }

    /// Export then rebuild reproduces the topology exactly.
    #[test]
    fn export_rebuild_identity(list in edge_list()) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        let rebuilt = SparseTopology::from_edge_list(&topo.to_edge_list()).expect("rebuild");
        prop_assert_eq!(rebuilt, topo);
    }

    /// Compaction keeps exactly the edges at or above the threshold, and a
    /// second pass with the same threshold is a no-op.
    #[test]
    fn compaction_filters_and_is_idempotent(list in edge_list(), threshold in 0.0f64..2.0) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        let compacted = compact(&topo, threshold).expect("compact").unwrap_or_else(|| topo.clone());

        assert_csr_invariants(&compacted)?;
        let kept: Vec<_> = topo.canonical_edges().filter(|e| e.2 >= threshold).collect();
        let got: Vec<_> = compacted.canonical_edges().collect();
        prop_assert_eq!(got, kept);
        prop_assert!(compact(&compacted, threshold).expect("compact").is_none());
    }

    /// Removing every edge through a proposal leaves an empty graph of the
    /// same size.
    #[test]
    fn removing_all_edges_empties(list in edge_list()) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        let mut proposal = MutationProposal::new();
        for (lo, hi, _) in topo.canonical_edges() {
            proposal.remove(hi, lo);
        }
        let emptied = apply_proposal(&topo, &proposal).expect("apply");
        prop_assert_eq!(emptied.nnz(), 0);
        prop_assert_eq!(emptied.node_count(), topo.node_count());
    }

    /// The first NaN index does not depend on buffer contents elsewhere.
    #[test]
    fn first_nan_index_is_exact(len in 1usize..20_000, seed in any::<u64>()) {
        let index = (seed as usize) % len;
        let mut buffer: Vec<f64> = (0..len).map(|k| k as f64).collect();
        buffer[index] = f64::NAN;
        let result = HealthMonitor::default().check_buffer(&buffer);
        prop_assert_eq!(result.nan_count, 1);
        prop_assert_eq!(result.first_nan_index, Some(index));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Evolution preserves the norm on arbitrary small graphs.
    #[test]
    fn evolution_preserves_norm(list in edge_list(), gauge in 1usize..3) {
        let topo = SparseTopology::from_edge_list(&list).expect("build");
        let mut engine = CayleyEngine::new(EngineConfig::default()).expect("engine");
        engine.initialize_with_topology(topo, gauge).expect("init");
        for _ in 0..5 {
            engine.evolve_step(0.05).expect("step");
        }
        prop_assert!((engine.compute_norm().expect("norm") - 1.0).abs() < 1e-11);
    }
}
