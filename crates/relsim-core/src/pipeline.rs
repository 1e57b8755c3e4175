//! # Physics Pipeline
//!
//! Drives an engine one tick at a time and runs pluggable modules around
//! each step:
//!
//! 1. `PreStep` modules (forcing, potential updates)
//! 2. `CayleyEngine::evolve_step`
//! 3. `PostStep` modules (diagnostics)
//! 4. `Topology` modules (rewiring)
//!
//! A module occupies one `(category, stage)` slot. Registering a module into
//! an occupied slot replaces the previous occupant in place, so the registry
//! never holds two modules for the same job.

use crate::engine::{CayleyEngine, StepReport};
use crate::{RebuildOutcome, RelsimError};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// MODULE CONTRACT
// =============================================================================

/// What a module does. Together with the stage it identifies a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    Forcing,
    Diagnostics,
    Rewiring,
}

/// When a module runs within a tick. Variants are listed in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    PreStep,
    PostStep,
    Topology,
}

impl PipelineStage {
    pub const ALL: [Self; 3] = [Self::PreStep, Self::PostStep, Self::Topology];
}

/// Per-tick view handed to each module.
pub struct TickContext<'a> {
    engine: &'a mut CayleyEngine,
    dt: f64,
    report: Option<StepReport>,
    rebuilds: usize,
    halt: Option<String>,
}

impl<'a> TickContext<'a> {
    fn new(engine: &'a mut CayleyEngine, dt: f64) -> Self {
        Self {
            engine,
            dt,
            report: None,
            rebuilds: 0,
            halt: None,
        }
    }

    #[must_use]
    pub fn engine(&self) -> &CayleyEngine {
        &*self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CayleyEngine {
        &mut *self.engine
    }

    #[must_use]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The step's report; `None` during `PreStep`.
    #[must_use]
    pub fn report(&self) -> Option<&StepReport> {
        self.report.as_ref()
    }

    /// Count a topology rebuild performed by a module.
    pub fn record_rebuild(&mut self, outcome: RebuildOutcome) {
        if outcome.is_rebuilt() {
            self.rebuilds += 1;
        }
    }

    /// Ask the pipeline to stop after this tick. The first reason wins.
    pub fn request_halt(&mut self, reason: impl Into<String>) {
        if self.halt.is_none() {
            self.halt = Some(reason.into());
        }
    }
}

/// A pluggable unit of per-tick work.
pub trait PhysicsModule: Send + fmt::Debug {
    fn name(&self) -> &str;
    fn category(&self) -> ModuleCategory;
    fn stage(&self) -> PipelineStage;
    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Result<(), RelsimError>;
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Modules keyed by `(category, stage)`.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn PhysicsModule>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `module`, returning the module it displaced from the same slot.
    pub fn register(&mut self, module: Box<dyn PhysicsModule>) -> Option<Box<dyn PhysicsModule>> {
        let slot = (module.category(), module.stage());
        let occupied = self
            .modules
            .iter()
            .position(|m| (m.category(), m.stage()) == slot);
        if let Some(pos) = occupied {
            tracing::debug!(
                old = self.modules[pos].name(),
                new = module.name(),
                "pipeline module replaced"
            );
            Some(std::mem::replace(&mut self.modules[pos], module))
        } else {
            self.modules.push(module);
            None
        }
    }

    /// Remove the module in a slot.
    pub fn remove(
        &mut self,
        category: ModuleCategory,
        stage: PipelineStage,
    ) -> Option<Box<dyn PhysicsModule>> {
        let pos = self
            .modules
            .iter()
            .position(|m| m.category() == category && m.stage() == stage)?;
        Some(self.modules.remove(pos))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        PipelineStage::ALL
            .iter()
            .flat_map(|&stage| {
                self.modules
                    .iter()
                    .filter(move |m| m.stage() == stage)
                    .map(|m| m.name())
            })
            .collect()
    }

    fn run_stage(
        &mut self,
        stage: PipelineStage,
        ctx: &mut TickContext<'_>,
    ) -> Result<(), RelsimError> {
        for module in self.modules.iter_mut().filter(|m| m.stage() == stage) {
            module.execute(ctx)?;
        }
        Ok(())
    }
}

// =============================================================================
// BUILT-IN MODULES
// =============================================================================

/// Soft rewiring every `interval` ticks.
#[derive(Debug, Clone)]
pub struct SoftRewiring {
    threshold: f64,
    interval: u64,
    elapsed: u64,
}

impl SoftRewiring {
    /// An interval of 0 is treated as 1.
    pub fn new(threshold: f64, interval: u64) -> Result<Self, RelsimError> {
        if !threshold.is_finite() {
            return Err(RelsimError::invalid(format!(
                "rewiring threshold {threshold} is not finite"
            )));
        }
        Ok(Self {
            threshold,
            interval: interval.max(1),
            elapsed: 0,
        })
    }
}

impl PhysicsModule for SoftRewiring {
    fn name(&self) -> &str {
        "soft_rewiring"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Rewiring
    }

    fn stage(&self) -> PipelineStage {
        PipelineStage::Topology
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Result<(), RelsimError> {
        self.elapsed += 1;
        if self.elapsed < self.interval {
            return Ok(());
        }
        self.elapsed = 0;
        let outcome = ctx.engine_mut().evolve_topology(self.threshold)?;
        ctx.record_rebuild(outcome);
        Ok(())
    }
}

/// Requests a halt after `max_consecutive` unhealthy steps in a row.
#[derive(Debug, Clone)]
pub struct DivergenceGuard {
    max_consecutive: usize,
    consecutive: usize,
}

impl DivergenceGuard {
    /// A limit of 0 is treated as 1.
    #[must_use]
    pub fn new(max_consecutive: usize) -> Self {
        Self {
            max_consecutive: max_consecutive.max(1),
            consecutive: 0,
        }
    }
}

impl PhysicsModule for DivergenceGuard {
    fn name(&self) -> &str {
        "divergence_guard"
    }

    fn category(&self) -> ModuleCategory {
        ModuleCategory::Diagnostics
    }

    fn stage(&self) -> PipelineStage {
        PipelineStage::PostStep
    }

    fn execute(&mut self, ctx: &mut TickContext<'_>) -> Result<(), RelsimError> {
        let healthy = ctx.report().is_none_or(|r| r.health.healthy);
        if healthy {
            self.consecutive = 0;
            return Ok(());
        }
        self.consecutive += 1;
        if self.consecutive >= self.max_consecutive {
            let reason = format!("state unhealthy for {} consecutive ticks", self.consecutive);
            ctx.request_halt(reason);
        }
        Ok(())
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Outcome of one pipeline tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    pub report: StepReport,
    /// Rebuilds installed during the tick, hard cycles included.
    pub rebuilds: usize,
    pub halt: Option<String>,
}

/// Aggregate of a `run`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ticks completed.
    pub ticks: u64,
    pub total_iterations: usize,
    pub max_residual: f64,
    pub unconverged_ticks: u64,
    pub unhealthy_ticks: u64,
    pub rebuilds: usize,
    /// Norm after the last tick.
    pub final_norm: f64,
    /// Set when a module stopped the run early.
    pub halted: Option<String>,
}

/// An engine plus the modules that run around it.
#[derive(Debug)]
pub struct PhysicsPipeline {
    engine: CayleyEngine,
    registry: ModuleRegistry,
}

impl PhysicsPipeline {
    #[must_use]
    pub fn new(engine: CayleyEngine, registry: ModuleRegistry) -> Self {
        Self { engine, registry }
    }

    #[must_use]
    pub fn engine(&self) -> &CayleyEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CayleyEngine {
        &mut self.engine
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn into_engine(self) -> CayleyEngine {
        self.engine
    }

    /// Run one tick: pre-step modules, the step, post-step modules, then
    /// topology modules.
    pub fn tick(&mut self, dt: f64) -> Result<TickSummary, RelsimError> {
        let Self { engine, registry } = self;
        let mut ctx = TickContext::new(engine, dt);

        registry.run_stage(PipelineStage::PreStep, &mut ctx)?;
        let report = ctx.engine.evolve_step(dt)?;
        ctx.record_rebuild(report.rebuilt);
        ctx.report = Some(report);
        registry.run_stage(PipelineStage::PostStep, &mut ctx)?;
        registry.run_stage(PipelineStage::Topology, &mut ctx)?;

        Ok(TickSummary {
            report,
            rebuilds: ctx.rebuilds,
            halt: ctx.halt,
        })
    }

    /// Run up to `steps` ticks, stopping early when a module requests a halt.
    pub fn run(&mut self, steps: u64, dt: f64) -> Result<RunSummary, RelsimError> {
        let mut summary = RunSummary::default();
        for _ in 0..steps {
            let tick = self.tick(dt)?;
            summary.ticks += 1;
            summary.total_iterations += tick.report.iterations;
            summary.max_residual = summary.max_residual.max(tick.report.residual);
            summary.rebuilds += tick.rebuilds;
            if !tick.report.converged {
                summary.unconverged_ticks += 1;
            }
            if !tick.report.health.healthy {
                summary.unhealthy_ticks += 1;
            }
            if let Some(reason) = tick.halt {
                tracing::warn!(tick = tick.report.tick, %reason, "pipeline halted");
                summary.halted = Some(reason);
                break;
            }
        }
        summary.final_norm = self.engine.compute_norm()?;
        tracing::info!(
            ticks = summary.ticks,
            iterations = summary.total_iterations,
            rebuilds = summary.rebuilds,
            "run complete"
        );
        Ok(summary)
    }
}

// =============================================================================
// TESTS
// =============================================================================
