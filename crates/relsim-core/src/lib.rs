//! # relsim-core
//!
//! Sparse relational-graph evolution engine.
//!
//! A weighted undirected graph is held in compressed-sparse-row form
//! ([`SparseTopology`]). A complex state vector with `gauge_dim` components
//! per node evolves under the graph Hamiltonian `H = diag(V) - W` through the
//! norm-preserving Cayley map, solved each step with complex BiCGStab. The
//! topology itself may be rewired between steps, either by thresholding weak
//! edges (soft) or by scored additions and removals (hard).
//!
//! ## Architectural Constraints
//!
//! - No dense matrices: `H` is only ever applied through the CSR arrays
//! - Topologies are replaced wholesale, never patched in place
//! - Deterministic: parallel reductions are chunked and summed in index
//!   order, so results do not depend on the thread count
//! - Numerical divergence is an observation, not an error
//! - No async, no network, no I/O: file handling is in the app layer

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod engine;
pub mod formats;
pub mod health;
pub mod metrics;
pub mod mutation;
pub mod operator;
pub mod pipeline;
pub mod primitives;
pub mod solver;
pub mod topology;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{Amplitude, RebuildOutcome, RelsimError};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{EngineConfig, RewiringMode};
pub use engine::{CayleyEngine, Checkpoint, EnginePhase, StepReport};
pub use health::{HealthCheckResult, HealthMonitor, HealthThresholds, NegativePolicy};
pub use mutation::{
    EdgeScorer, MassProximityScorer, MassScorerConfig, MutationProposal, apply_proposal, compact,
};
pub use operator::{CayleyFactor, HamiltonianOperator, state_norm};
pub use pipeline::{
    DivergenceGuard, ModuleCategory, ModuleRegistry, PhysicsModule, PhysicsPipeline,
    PipelineStage, RunSummary, SoftRewiring, TickContext, TickSummary,
};
pub use solver::{BiCgStabSolver, SolveStats, SolverSettings};
pub use topology::{DenseAdjacency, EdgeList, SparseTopology};

// =============================================================================
// RE-EXPORTS: Formats and Metrics
// =============================================================================

pub use formats::{CheckpointHeader, checkpoint_from_bytes, checkpoint_to_bytes};

#[cfg(feature = "crypto-hash")]
pub use formats::checkpoint_checksum;

pub use metrics::TopologyMetrics;
