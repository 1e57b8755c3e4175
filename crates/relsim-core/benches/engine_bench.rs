//! # Engine Benchmarks
//!
//! Performance benchmarks for relsim-core construction, stepping and
//! rewiring.
//!
//! Run with: `cargo bench -p relsim-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use relsim_core::{CayleyEngine, EdgeList, EngineConfig, HealthMonitor, SparseTopology, compact};
use std::hint::black_box;

/// Square lattice with weights cycling through `0.1 ..= 1.0`.
fn lattice(side: usize) -> EdgeList {
    let mut list = EdgeList::grid(side, side, 1.0);
    for (k, w) in list.weights.iter_mut().enumerate() {
        *w = 0.1 * ((k % 10) + 1) as f64;
    }
    list
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");

    for side in [32, 128, 256].iter() {
        let list = lattice(*side);
        group.bench_with_input(BenchmarkId::from_parameter(side), &list, |b, list| {
            b.iter(|| black_box(SparseTopology::from_edge_list(list).expect("build")));
        });
    }

    group.finish();
}

fn bench_evolve_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("evolve_step");

    for side in [32, 128].iter() {
        let topo = SparseTopology::from_edge_list(&lattice(*side)).expect("build");
        let mut engine = CayleyEngine::new(EngineConfig::default()).expect("engine");
        engine.initialize_with_topology(topo, 2).expect("init");

        group.bench_function(BenchmarkId::from_parameter(side), |b| {
            b.iter(|| black_box(engine.evolve_step(0.01).expect("step")));
        });
    }

    group.finish();
}

fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");

    for side in [128, 256].iter() {
        let topo = SparseTopology::from_edge_list(&lattice(*side)).expect("build");
        group.bench_with_input(BenchmarkId::from_parameter(side), &topo, |b, topo| {
            b.iter(|| black_box(compact(topo, 0.55).expect("compact")));
        });
    }

    group.finish();
}

fn bench_health_scan(c: &mut Criterion) {
    let monitor = HealthMonitor::default();
    let buffer: Vec<f64> = (0..1_000_000).map(|k| k as f64).collect();

    c.bench_function("health_check_1m", |b| {
        b.iter(|| black_box(monitor.check_buffer(&buffer)));
    });
    c.bench_function("health_quick_check_1m_stride_64", |b| {
        b.iter(|| black_box(monitor.quick_check(&buffer, 64)));
    });
}

criterion_group!(
    benches,
    bench_construction,
    bench_evolve_step,
    bench_compact,
    bench_health_scan
);
criterion_main!(benches);
