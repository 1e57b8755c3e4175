//! # Cayley Evolution Engine
//!
//! Owns a topology, a complex state of `N * gauge_dim` amplitudes and the
//! solver workspace, and advances the state with the Cayley map
//!
//! ```text
//! x_{t+1} = (I + iαH)^{-1} (I - iαH) x_t,   α = dt / 2
//! ```
//!
//! which is unitary for Hermitian `H`, so the norm is preserved up to solver
//! tolerance.
//!
//! ## Lifecycle
//!
//! `Uninitialized → Ready → Disposed`. Simulation data exists only while
//! `Ready`; every data operation outside it fails with `IllegalState`.
//! `Disposed` is terminal.
//!
//! ## Rebuilds
//!
//! A rebuild constructs the replacement topology, solver workspace and
//! resized buffers completely before swapping any of them in. On `Err` the
//! engine is exactly as it was.

use crate::config::{EngineConfig, RewiringMode};
use crate::health::{HealthCheckResult, HealthMonitor};
use crate::mutation::{self, EdgeScorer, MassProximityScorer, MutationProposal};
use crate::operator::state_norm;
use crate::solver::BiCgStabSolver;
use crate::topology::SparseTopology;
use crate::types::try_zeroed;
use crate::{Amplitude, RebuildOutcome, RelsimError};
use serde::{Deserialize, Serialize};

// =============================================================================
// PUBLIC DATA
// =============================================================================

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePhase {
    Uninitialized,
    Ready,
    Disposed,
}

/// Diagnostics of one `evolve_step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Tick counter after the step.
    pub tick: u64,
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
    /// Health of the state after the step.
    pub health: HealthCheckResult,
    /// Outcome of the hard-rewiring cycle, if one was due.
    pub rebuilt: RebuildOutcome,
}

/// Plain-array snapshot of a ready engine.
///
/// Restoring validates the CSR arrays exactly like
/// [`SparseTopology::from_csr`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub tick: u64,
    pub generation: u64,
    pub steps_since_rebuild: u64,
    pub gauge_dim: usize,
    pub row_offsets: Vec<usize>,
    pub col_indices: Vec<u32>,
    pub edge_weights: Vec<f64>,
    pub node_potential: Vec<f64>,
    pub node_mass: Vec<f64>,
    pub state: Vec<Amplitude>,
}

// =============================================================================
// INTERNAL STATE
// =============================================================================

/// Everything that exists only while the engine is ready.
#[derive(Debug)]
struct Simulation {
    topology: SparseTopology,
    gauge_dim: usize,
    state: Vec<Amplitude>,
    node_mass: Vec<f64>,
    solver: BiCgStabSolver,
    tick: u64,
    /// Incremented on every installed rebuild.
    generation: u64,
    steps_since_rebuild: u64,
    last_health: HealthCheckResult,
}

#[derive(Debug)]
enum Phase {
    Uninitialized,
    Ready(Box<Simulation>),
    Disposed,
}

/// The evolution engine.
#[derive(Debug)]
pub struct CayleyEngine {
    config: EngineConfig,
    monitor: HealthMonitor,
    scorer: Box<dyn EdgeScorer>,
    phase: Phase,
}

impl CayleyEngine {
    /// Create an uninitialised engine.
    pub fn new(config: EngineConfig) -> Result<Self, RelsimError> {
        config.validate()?;
        let scorer = MassProximityScorer::new(config.scorer.clone())?;
        Ok(Self {
            monitor: HealthMonitor::new(config.health.clone()),
            scorer: Box::new(scorer),
            config,
            phase: Phase::Uninitialized,
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        match self.phase {
            Phase::Uninitialized => EnginePhase::Uninitialized,
            Phase::Ready(_) => EnginePhase::Ready,
            Phase::Disposed => EnginePhase::Disposed,
        }
    }

    /// Install a custom hard-rewiring scorer.
    pub fn set_scorer(&mut self, scorer: Box<dyn EdgeScorer>) {
        tracing::debug!(scorer = scorer.name(), "edge scorer installed");
        self.scorer = scorer;
    }

    #[must_use]
    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Bind a topology and allocate every buffer. The state starts as the
    /// uniform unit vector `1/sqrt(N * gauge_dim)`.
    ///
    /// Re-initialising a ready engine replaces everything, tick included.
    pub fn initialize_with_topology(
        &mut self,
        topology: SparseTopology,
        gauge_dim: usize,
    ) -> Result<(), RelsimError> {
        if matches!(self.phase, Phase::Disposed) {
            return Err(RelsimError::illegal_state("engine has been disposed"));
        }
        topology.ensure_ready()?;
        if gauge_dim == 0 {
            return Err(RelsimError::invalid("gauge_dim must be at least 1"));
        }

        let dim = state_dimension(topology.node_count(), gauge_dim)?;
        let mut state: Vec<Amplitude> = try_zeroed("state", dim)?;
        let amplitude = Amplitude::new(1.0 / (dim as f64).sqrt(), 0.0);
        state.fill(amplitude);
        let node_mass = try_zeroed("node_mass", topology.node_count())?;

        let mut solver = BiCgStabSolver::new(self.config.solver_settings());
        solver.initialize(&topology, gauge_dim)?;

        tracing::info!(
            nodes = topology.node_count(),
            edges = topology.undirected_edge_count(),
            gauge_dim,
            "engine initialised"
        );

        let last_health = self.monitor.check_state(&state);
        self.phase = Phase::Ready(Box::new(Simulation {
            topology,
            gauge_dim,
            state,
            node_mass,
            solver,
            tick: 0,
            generation: 0,
            steps_since_rebuild: 0,
            last_health,
        }));
        Ok(())
    }

    /// Release every buffer. Terminal; calling it again is a no-op.
    pub fn dispose(&mut self) {
        if !matches!(self.phase, Phase::Disposed) {
            tracing::debug!("engine disposed");
        }
        self.phase = Phase::Disposed;
    }

    // =========================================================================
    // EVOLUTION
    // =========================================================================

    /// Advance the state by one Cayley step of size `dt`.
    ///
    /// Solver non-convergence and an unhealthy state are reported in the
    /// returned [`StepReport`], not as errors.
    pub fn evolve_step(&mut self, dt: f64) -> Result<StepReport, RelsimError> {
        let Self {
            config,
            monitor,
            scorer,
            phase,
        } = self;
        let sim = ready_mut(phase)?;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(RelsimError::invalid(format!(
                "dt must be finite and positive, got {dt}"
            )));
        }

        // A failing hard cycle rolls the whole step back.
        let cycle_due = config.hard_cycle_due(sim.steps_since_rebuild + 1);
        let pre_step = cycle_due.then(|| sim.state.clone());

        let stats = sim.solver.solve(&sim.topology, &mut sim.state, dt / 2.0)?;
        sim.tick += 1;
        sim.steps_since_rebuild += 1;
        let health = monitor.check_state(&sim.state);

        let rebuilt = match pre_step {
            None => RebuildOutcome::Unchanged,
            Some(pre_step) => match hard_cycle(sim, scorer.as_ref(), config) {
                Ok(outcome) => outcome,
                Err(e) => {
                    sim.state = pre_step;
                    sim.tick -= 1;
                    sim.steps_since_rebuild -= 1;
                    return Err(e);
                }
            },
        };

        sim.last_health = health;
        if !health.healthy {
            tracing::warn!(
                tick = sim.tick,
                nan = health.nan_count,
                inf = health.inf_count,
                first_nan = ?health.first_nan_index,
                "state failed health check"
            );
        }

        tracing::debug!(
            tick = sim.tick,
            iterations = stats.iterations,
            residual = stats.residual,
            "step complete"
        );

        Ok(StepReport {
            tick: sim.tick,
            iterations: stats.iterations,
            residual: stats.residual,
            converged: stats.converged,
            health,
            rebuilt,
        })
    }

    /// Soft rewiring: drop every edge lighter than `threshold`.
    pub fn evolve_topology(&mut self, threshold: f64) -> Result<RebuildOutcome, RelsimError> {
        let Self { config, phase, .. } = self;
        let sim = ready_mut(phase)?;
        match mutation::compact(&sim.topology, threshold)? {
            None => Ok(RebuildOutcome::Unchanged),
            Some(topology) => install(sim, topology, config),
        }
    }

    /// Run a hard-rewiring cycle now (hard mode), or rebuild the current
    /// topology from its canonical edges (soft mode).
    pub fn force_topology_rebuild(&mut self) -> Result<RebuildOutcome, RelsimError> {
        let Self {
            config,
            scorer,
            phase,
            ..
        } = self;
        let sim = ready_mut(phase)?;
        match config.rewiring {
            RewiringMode::Hard => hard_cycle(sim, scorer.as_ref(), config),
            RewiringMode::Soft => {
                let topology = SparseTopology::from_edge_list(&sim.topology.to_edge_list())?;
                install(sim, topology, config)
            }
        }
    }

    /// Apply an externally produced proposal.
    pub fn apply_proposal(
        &mut self,
        proposal: &MutationProposal,
    ) -> Result<RebuildOutcome, RelsimError> {
        let Self { config, phase, .. } = self;
        let sim = ready_mut(phase)?;
        apply_to(sim, proposal, config)
    }

    // =========================================================================
    // STATE I/O
    // =========================================================================

    /// L2 norm of the state.
    pub fn compute_norm(&self) -> Result<f64, RelsimError> {
        Ok(state_norm(&self.ready()?.state))
    }

    /// Overwrite the state from split real and imaginary parts.
    pub fn upload_state(&mut self, re: &[f64], im: &[f64]) -> Result<(), RelsimError> {
        let sim = ready_mut(&mut self.phase)?;
        check_len("re", re.len(), sim.state.len())?;
        check_len("im", im.len(), sim.state.len())?;
        for ((z, &r), &i) in sim.state.iter_mut().zip(re).zip(im) {
            *z = Amplitude::new(r, i);
        }
        Ok(())
    }

    /// Copy the state out into split real and imaginary parts.
    pub fn download_state(&self, re: &mut [f64], im: &mut [f64]) -> Result<(), RelsimError> {
        let sim = self.ready()?;
        check_len("re", re.len(), sim.state.len())?;
        check_len("im", im.len(), sim.state.len())?;
        for ((z, r), i) in sim.state.iter().zip(re.iter_mut()).zip(im.iter_mut()) {
            *r = z.re;
            *i = z.im;
        }
        Ok(())
    }

    pub fn state(&self) -> Result<&[Amplitude], RelsimError> {
        Ok(&self.ready()?.state)
    }

    pub fn set_state(&mut self, state: &[Amplitude]) -> Result<(), RelsimError> {
        let sim = ready_mut(&mut self.phase)?;
        check_len("state", state.len(), sim.state.len())?;
        sim.state.copy_from_slice(state);
        Ok(())
    }

    pub fn topology(&self) -> Result<&SparseTopology, RelsimError> {
        Ok(&self.ready()?.topology)
    }

    /// Replace the per-node potential. Structure, and so the solver
    /// workspace, is unaffected.
    pub fn update_potential(&mut self, potential: &[f64]) -> Result<(), RelsimError> {
        ready_mut(&mut self.phase)?
            .topology
            .update_potential(potential)
    }

    /// Set the auxiliary per-node mass read by the hard-rewiring scorer.
    pub fn set_node_mass(&mut self, mass: &[f64]) -> Result<(), RelsimError> {
        let sim = ready_mut(&mut self.phase)?;
        check_len("node_mass", mass.len(), sim.node_mass.len())?;
        if let Some(i) = mass.iter().position(|m| !m.is_finite()) {
            return Err(RelsimError::invalid(format!("node_mass[{i}] is not finite")));
        }
        sim.node_mass.copy_from_slice(mass);
        Ok(())
    }

    pub fn node_mass(&self) -> Result<&[f64], RelsimError> {
        Ok(&self.ready()?.node_mass)
    }

    // =========================================================================
    // COUNTERS AND DIAGNOSTICS
    // =========================================================================

    /// Completed steps; 0 unless ready.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.ready().map_or(0, |sim| sim.tick)
    }

    /// Installed rebuilds since initialisation; 0 unless ready.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.ready().map_or(0, |sim| sim.generation)
    }

    /// Gauge components per node; 0 unless ready.
    #[must_use]
    pub fn gauge_dim(&self) -> usize {
        self.ready().map_or(0, |sim| sim.gauge_dim)
    }

    #[must_use]
    pub fn last_iterations(&self) -> usize {
        self.ready().map_or(0, |sim| sim.solver.last_iterations())
    }

    #[must_use]
    pub fn last_residual(&self) -> f64 {
        self.ready().map_or(0.0, |sim| sim.solver.last_residual())
    }

    /// Health of the state after the last step (or initialisation).
    #[must_use]
    pub fn last_health(&self) -> Option<HealthCheckResult> {
        self.ready().ok().map(|sim| sim.last_health)
    }

    // =========================================================================
    // CHECKPOINTS
    // =========================================================================

    /// Snapshot the ready engine.
    pub fn checkpoint(&self) -> Result<Checkpoint, RelsimError> {
        let sim = self.ready()?;
        Ok(Checkpoint {
            tick: sim.tick,
            generation: sim.generation,
            steps_since_rebuild: sim.steps_since_rebuild,
            gauge_dim: sim.gauge_dim,
            row_offsets: sim.topology.row_offsets().to_vec(),
            col_indices: sim.topology.col_indices().to_vec(),
            edge_weights: sim.topology.edge_weights().to_vec(),
            node_potential: sim.topology.node_potential().to_vec(),
            node_mass: sim.node_mass.clone(),
            state: sim.state.clone(),
        })
    }

    /// Replace everything with a snapshot. Valid from `Uninitialized` or
    /// `Ready`.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<(), RelsimError> {
        if matches!(self.phase, Phase::Disposed) {
            return Err(RelsimError::illegal_state("engine has been disposed"));
        }
        let Checkpoint {
            tick,
            generation,
            steps_since_rebuild,
            gauge_dim,
            row_offsets,
            col_indices,
            edge_weights,
            node_potential,
            node_mass,
            state,
        } = checkpoint;

        if gauge_dim == 0 {
            return Err(RelsimError::invalid("checkpoint gauge_dim is 0"));
        }
        let topology =
            SparseTopology::from_csr(row_offsets, col_indices, edge_weights, node_potential)?;
        check_len(
            "checkpoint state",
            state.len(),
            state_dimension(topology.node_count(), gauge_dim)?,
        )?;
        check_len("checkpoint node_mass", node_mass.len(), topology.node_count())?;
        if let Some(i) = node_mass.iter().position(|m| !m.is_finite()) {
            return Err(RelsimError::invalid(format!(
                "checkpoint node_mass[{i}] is not finite"
            )));
        }

        let mut solver = BiCgStabSolver::new(self.config.solver_settings());
        solver.initialize(&topology, gauge_dim)?;
        let last_health = self.monitor.check_state(&state);

        tracing::info!(tick, generation, nodes = topology.node_count(), "engine restored");
        self.phase = Phase::Ready(Box::new(Simulation {
            topology,
            gauge_dim,
            state,
            node_mass,
            solver,
            tick,
            generation,
            steps_since_rebuild,
            last_health,
        }));
        Ok(())
    }

    fn ready(&self) -> Result<&Simulation, RelsimError> {
        match &self.phase {
            Phase::Ready(sim) => Ok(&**sim),
            Phase::Uninitialized => Err(RelsimError::illegal_state("engine not initialised")),
            Phase::Disposed => Err(RelsimError::illegal_state("engine has been disposed")),
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ready_mut(phase: &mut Phase) -> Result<&mut Simulation, RelsimError> {
    match phase {
        Phase::Ready(sim) => Ok(&mut **sim),
        Phase::Uninitialized => Err(RelsimError::illegal_state("engine not initialised")),
        Phase::Disposed => Err(RelsimError::illegal_state("engine has been disposed")),
    }
}

fn state_dimension(node_count: usize, gauge_dim: usize) -> Result<usize, RelsimError> {
    node_count.checked_mul(gauge_dim).ok_or_else(|| {
        RelsimError::invalid(format!(
            "{node_count} nodes x {gauge_dim} gauge components overflows"
        ))
    })
}

fn check_len(what: &str, actual: usize, expected: usize) -> Result<(), RelsimError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RelsimError::invalid(format!(
            "{what} has {actual} entries, expected {expected}"
        )))
    }
}

/// Score, apply and install one hard-rewiring proposal.
fn hard_cycle(
    sim: &mut Simulation,
    scorer: &dyn EdgeScorer,
    config: &EngineConfig,
) -> Result<RebuildOutcome, RelsimError> {
    let proposal = scorer.propose(&sim.topology, &sim.node_mass)?;
    tracing::debug!(
        scorer = scorer.name(),
        removals = proposal.removals.len(),
        additions = proposal.additions.len(),
        "hard rewiring cycle"
    );
    let outcome = apply_to(sim, &proposal, config)?;
    sim.steps_since_rebuild = 0;
    Ok(outcome)
}

fn apply_to(
    sim: &mut Simulation,
    proposal: &MutationProposal,
    config: &EngineConfig,
) -> Result<RebuildOutcome, RelsimError> {
    if proposal.is_empty() {
        return Ok(RebuildOutcome::Unchanged);
    }
    let topology = mutation::apply_proposal(&sim.topology, proposal)?;
    if topology == sim.topology {
        return Ok(RebuildOutcome::Unchanged);
    }
    install(sim, topology, config)
}

/// Swap in a new topology generation. Every replacement buffer is built
/// before the first field is assigned.
fn install(
    sim: &mut Simulation,
    topology: SparseTopology,
    config: &EngineConfig,
) -> Result<RebuildOutcome, RelsimError> {
    let g = sim.gauge_dim;
    let old_n = sim.topology.node_count();
    let new_n = topology.node_count();

    let mut solver = BiCgStabSolver::new(config.solver_settings());
    solver.initialize(&topology, g)?;

    let resized = if new_n == old_n {
        None
    } else {
        let mut state: Vec<Amplitude> = try_zeroed("state", state_dimension(new_n, g)?)?;
        let kept = old_n.min(new_n) * g;
        state[..kept].copy_from_slice(&sim.state[..kept]);

        let before = state_norm(&sim.state);
        let after = state_norm(&state);
        if after > 0.0 && after != before {
            let scale = before / after;
            state.iter_mut().for_each(|z| *z *= scale);
        }

        let mut mass: Vec<f64> = try_zeroed("node_mass", new_n)?;
        let kept_nodes = old_n.min(new_n);
        mass[..kept_nodes].copy_from_slice(&sim.node_mass[..kept_nodes]);
        Some((state, mass))
    };

    let outcome = RebuildOutcome::Rebuilt {
        node_count: new_n,
        nnz: topology.nnz(),
    };
    sim.topology = topology;
    sim.solver = solver;
    if let Some((state, mass)) = resized {
        sim.state = state;
        sim.node_mass = mass;
    }
    sim.generation += 1;

    tracing::info!(
        generation = sim.generation,
        nodes = new_n,
        edges = sim.topology.undirected_edge_count(),
        "topology rebuilt"
    );
    Ok(outcome)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::EdgeList;

    fn engine() -> CayleyEngine {
        CayleyEngine::new(EngineConfig::default()).expect("engine")
    }

    fn chain() -> SparseTopology {
        let mut list = EdgeList::new(3);
        list.push(0, 1, 0.5);
        list.push(1, 2, 0.5);
        SparseTopology::from_edge_list(&list).expect("build")
    }

    fn ready_engine(topology: SparseTopology, gauge_dim: usize) -> CayleyEngine {
        let mut e = engine();
        e.initialize_with_topology(topology, gauge_dim).expect("init");
        e
    }

    #[test]
    fn uninitialised_engine_rejects_operations() {
        let mut e = engine();
        assert_eq!(e.phase(), EnginePhase::Uninitialized);
        assert!(matches!(e.evolve_step(0.1), Err(RelsimError::IllegalState(_))));
        assert!(matches!(e.compute_norm(), Err(RelsimError::IllegalState(_))));
        assert!(matches!(e.evolve_topology(0.5), Err(RelsimError::IllegalState(_))));
        assert!(e.checkpoint().is_err());
        assert_eq!(e.tick(), 0);
        assert_eq!(e.last_health(), None);
    }

    #[test]
    fn disposed_is_terminal() {
        let mut e = ready_engine(chain(), 1);
        e.dispose();
        e.dispose();
        assert_eq!(e.phase(), EnginePhase::Disposed);
        assert!(matches!(
            e.initialize_with_topology(chain(), 1),
            Err(RelsimError::IllegalState(_))
        ));
        assert!(matches!(e.state(), Err(RelsimError::IllegalState(_))));
    }

    #[test]
    fn initial_state_is_uniform_unit_vector() {
        let e = ready_engine(chain(), 2);
        let state = e.state().expect("state");
        assert_eq!(state.len(), 6);
        let expected = 1.0 / 6f64.sqrt();
        assert!(state.iter().all(|z| (z.re - expected).abs() < 1e-15 && z.im == 0.0));
        assert!((e.compute_norm().expect("norm") - 1.0).abs() < 1e-12);
        assert_eq!(e.gauge_dim(), 2);
    }

    #[test]
    fn initialize_rejects_bad_input() {
        let mut e = engine();
        assert!(matches!(
            e.initialize_with_topology(SparseTopology::default(), 1),
            Err(RelsimError::IllegalState(_))
        ));
        assert!(matches!(
            e.initialize_with_topology(chain(), 0),
            Err(RelsimError::InvalidArgument(_))
        ));
        assert_eq!(e.phase(), EnginePhase::Uninitialized);
    }

    #[test]
    fn evolve_step_validates_dt() {
        let mut e = ready_engine(chain(), 1);
        for dt in [0.0, -0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(e.evolve_step(dt), Err(RelsimError::InvalidArgument(_))));
        }
        assert_eq!(e.tick(), 0);
    }

    #[test]
    fn evolution_preserves_norm() {
        let topo = SparseTopology::from_edge_list(
            &EdgeList::grid(5, 4, 1.0).with_potential((0..20).map(|k| (k % 3) as f64).collect()),
        )
        .expect("grid");
        let mut e = ready_engine(topo, 2);
        for _ in 0..50 {
            let report = e.evolve_step(0.05).expect("step");
            assert!(report.converged);
            assert!(report.health.healthy);
        }
        assert_eq!(e.tick(), 50);
        assert!((e.compute_norm().expect("norm") - 1.0).abs() < 1e-11);
    }

    #[test]
    fn single_node_rotates_phase() {
        let topo = SparseTopology::from_edge_list(&EdgeList::new(1).with_potential(vec![2.0]))
            .expect("build");
        let mut e = ready_engine(topo, 1);
        let report = e.evolve_step(0.2).expect("step");
        assert!(report.iterations <= 1);

        let i_alpha_v = Amplitude::new(0.0, 0.1 * 2.0);
        let one = Amplitude::new(1.0, 0.0);
        let expected = (one - i_alpha_v) / (one + i_alpha_v);
        let got = e.state().expect("state")[0];
        assert!((got - expected).norm() < 1e-12);
    }

    #[test]
    fn upload_download_round_trip() {
        let mut e = ready_engine(chain(), 1);
        let re = [0.6, 0.0, 0.0];
        let im = [0.0, 0.8, 0.0];
        e.upload_state(&re, &im).expect("upload");

        let mut out_re = [0.0; 3];
        let mut out_im = [0.0; 3];
        e.download_state(&mut out_re, &mut out_im).expect("download");
        assert_eq!(out_re, re);
        assert_eq!(out_im, im);
        assert!((e.compute_norm().expect("norm") - 1.0).abs() < 1e-15);

        assert!(matches!(
            e.upload_state(&[1.0], &[0.0]),
            Err(RelsimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn soft_rewiring_scenario() {
        let mut e = ready_engine(chain(), 1);

        assert_eq!(e.evolve_topology(0.4).expect("soft"), RebuildOutcome::Unchanged);
        assert_eq!(e.generation(), 0);

        let outcome = e.evolve_topology(0.6).expect("soft");
        assert_eq!(
            outcome,
            RebuildOutcome::Rebuilt {
                node_count: 3,
                nnz: 0
            }
        );
        assert_eq!(e.generation(), 1);
        assert_eq!(e.topology().expect("topology").nnz(), 0);

        // The new workspace is in use.
        e.evolve_step(0.1).expect("step after rebuild");
        assert!(matches!(
            e.evolve_topology(f64::NAN),
            Err(RelsimError::InvalidArgument(_))
        ));
    }

    #[test]
    fn soft_mode_force_rebuild_reconstructs() {
        let mut e = ready_engine(chain(), 1);
        let before = e.topology().expect("topology").clone();
        let outcome = e.force_topology_rebuild().expect("rebuild");
        assert!(outcome.is_rebuilt());
        assert_eq!(e.generation(), 1);
        assert_eq!(e.topology().expect("topology"), &before);
    }

    #[test]
    fn hard_mode_rewires_on_interval() {
        let config = EngineConfig {
            rewiring: RewiringMode::Hard,
            rebuild_interval: 2,
            scorer: mutation::MassScorerConfig {
                link_threshold: 1.0,
                ..mutation::MassScorerConfig::default()
            },
            ..EngineConfig::default()
        };
        let mut e = CayleyEngine::new(config).expect("engine");
        e.initialize_with_topology(chain(), 1).expect("init");
        e.set_node_mass(&[2.0, 0.0, 2.0]).expect("mass");

        let first = e.evolve_step(0.1).expect("step");
        assert_eq!(first.rebuilt, RebuildOutcome::Unchanged);

        let second = e.evolve_step(0.1).expect("step");
        assert_eq!(
            second.rebuilt,
            RebuildOutcome::Rebuilt {
                node_count: 3,
                nnz: 6
            }
        );
        assert_eq!(e.topology().expect("topology").edge_weight(0, 2).expect("lookup"), Some(4.0));

        // Already a triangle: the next cycle has nothing to add.
        e.evolve_step(0.1).expect("step");
        let fourth = e.evolve_step(0.1).expect("step");
        assert_eq!(fourth.rebuilt, RebuildOutcome::Unchanged);
        assert_eq!(e.generation(), 1);
    }

    /// Scorer whose proposal always names a node that does not exist.
    #[derive(Debug)]
    struct OutOfRangeScorer;

    impl EdgeScorer for OutOfRangeScorer {
        fn name(&self) -> &str {
            "out_of_range"
        }

        fn propose(
            &self,
            _topology: &SparseTopology,
            _node_mass: &[f64],
        ) -> Result<MutationProposal, RelsimError> {
            let mut proposal = MutationProposal::new();
            proposal.add(0, 99, 1.0);
            Ok(proposal)
        }
    }

    #[test]
    fn failed_hard_cycle_rolls_back_step() {
        let mut e = CayleyEngine::new(EngineConfig {
            rewiring: RewiringMode::Hard,
            rebuild_interval: 1,
            ..EngineConfig::default()
        })
        .expect("engine");
        e.initialize_with_topology(chain(), 1).expect("init");
        e.set_scorer(Box::new(OutOfRangeScorer));
        let before = e.checkpoint().expect("checkpoint");

        assert!(matches!(
            e.evolve_step(0.1),
            Err(RelsimError::InvalidArgument(_))
        ));
        assert_eq!(e.checkpoint().expect("checkpoint"), before);
        assert_eq!(e.tick(), 0);

        assert!(e.force_topology_rebuild().is_err());
        assert_eq!(e.checkpoint().expect("checkpoint"), before);
    }

    #[test]
    fn steps_since_rebuild_resets_only_after_success() {
        let mut e = CayleyEngine::new(EngineConfig {
            rewiring: RewiringMode::Hard,
            rebuild_interval: 3,
            ..EngineConfig::default()
        })
        .expect("engine");
        e.initialize_with_topology(chain(), 1).expect("init");
        e.evolve_step(0.1).expect("step");
        e.evolve_step(0.1).expect("step");
        e.set_scorer(Box::new(OutOfRangeScorer));

        assert!(e.evolve_step(0.1).is_err());
        let snapshot = e.checkpoint().expect("checkpoint");
        assert_eq!(snapshot.tick, 2);
        assert_eq!(snapshot.steps_since_rebuild, 2);
    }

    #[test]
    fn growing_proposal_resizes_buffers() {
        let mut e = ready_engine(chain(), 2);
        e.set_node_mass(&[1.0, 2.0, 3.0]).expect("mass");
        let before: Vec<Amplitude> = e.state().expect("state").to_vec();

        let mut proposal = MutationProposal::new().with_node_count(5);
        proposal.add(2, 4, 1.0);
        let outcome = e.apply_proposal(&proposal).expect("apply");
        assert_eq!(
            outcome,
            RebuildOutcome::Rebuilt {
                node_count: 5,
                nnz: 6
            }
        );

        let state = e.state().expect("state");
        assert_eq!(state.len(), 10);
        assert_eq!(&state[..6], before.as_slice());
        assert!(state[6..].iter().all(|z| *z == Amplitude::default()));
        assert_eq!(e.node_mass().expect("mass"), &[1.0, 2.0, 3.0, 0.0, 0.0]);
        assert!((e.compute_norm().expect("norm") - 1.0).abs() < 1e-12);
        e.evolve_step(0.1).expect("step after resize");
    }

    #[test]
    fn shrinking_proposal_renormalises() {
        let mut e = ready_engine(chain(), 1);
        let outcome = e
            .apply_proposal(&MutationProposal::new().with_node_count(2))
            .expect("shrink");
        assert!(outcome.is_rebuilt());
        assert_eq!(e.state().expect("state").len(), 2);
        assert!((e.compute_norm().expect("norm") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejected_mutation_leaves_engine_unchanged() {
        let mut e = ready_engine(chain(), 1);
        e.evolve_step(0.1).expect("step");
        let snapshot = e.checkpoint().expect("checkpoint");

        let mut bad = MutationProposal::new();
        bad.add(0, 7, 1.0);
        assert!(e.apply_proposal(&bad).is_err());
        assert!(e.set_node_mass(&[1.0]).is_err());
        assert!(e.update_potential(&[f64::NAN, 0.0, 0.0]).is_err());

        assert_eq!(e.checkpoint().expect("checkpoint"), snapshot);
    }

    #[test]
    fn checkpoint_restore_round_trip() {
        let mut e = ready_engine(chain(), 2);
        e.set_node_mass(&[0.5, 1.5, 2.5]).expect("mass");
        e.evolve_step(0.1).expect("step");
        e.evolve_step(0.1).expect("step");
        let snapshot = e.checkpoint().expect("checkpoint");

        let mut restored = engine();
        restored.restore(snapshot.clone()).expect("restore");
        assert_eq!(restored.phase(), EnginePhase::Ready);
        assert_eq!(restored.tick(), 2);
        assert_eq!(restored.checkpoint().expect("checkpoint"), snapshot);

        // Both continue identically.
        let a = e.evolve_step(0.1).expect("step");
        let b = restored.evolve_step(0.1).expect("step");
        assert_eq!(a, b);
        assert_eq!(e.state().expect("state"), restored.state().expect("state"));
    }

    #[test]
    fn restore_rejects_inconsistent_snapshot() {
        let e = ready_engine(chain(), 1);
        let mut snapshot = e.checkpoint().expect("checkpoint");
        snapshot.state.pop();

        let mut target = engine();
        assert!(matches!(
            target.restore(snapshot),
            Err(RelsimError::InvalidArgument(_))
        ));
        assert_eq!(target.phase(), EnginePhase::Uninitialized);
    }

    #[test]
    fn restore_rejects_non_finite_mass() {
        let mut e = ready_engine(chain(), 1);
        e.set_node_mass(&[1.0, 2.0, 3.0]).expect("mass");
        let mut snapshot = e.checkpoint().expect("checkpoint");
        snapshot.node_mass[1] = f64::NAN;

        let mut target = engine();
        assert!(matches!(
            target.restore(snapshot),
            Err(RelsimError::InvalidArgument(_))
        ));
        assert_eq!(target.phase(), EnginePhase::Uninitialized);
    }

    #[test]
    fn update_potential_keeps_structure() {
        let mut e = ready_engine(chain(), 1);
        e.update_potential(&[1.0, 2.0, 3.0]).expect("potential");
        assert_eq!(e.topology().expect("topology").node_potential(), &[1.0, 2.0, 3.0]);
        assert_eq!(e.generation(), 0);
        e.evolve_step(0.1).expect("step");
    }
}
