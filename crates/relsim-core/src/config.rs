//! # Engine Configuration
//!
//! Runtime configuration for the evolution engine. Every field has a default,
//! and `#[serde(default)]` lets a config file name only what it overrides.

use crate::RelsimError;
use crate::health::HealthThresholds;
use crate::mutation::MassScorerConfig;
use crate::primitives::{DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::solver::SolverSettings;
use serde::{Deserialize, Serialize};

/// Topology mutation protocol driven by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewiringMode {
    /// Removal only, on explicit `evolve_topology` calls.
    #[default]
    Soft,
    /// Scored additions and removals; `evolve_step` runs a cycle every
    /// `rebuild_interval` ticks.
    Hard,
}

/// Runtime configuration for [`crate::CayleyEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// BiCGStab iteration cap.
    pub max_iterations: usize,
    /// Relative residual at which BiCGStab stops.
    pub tolerance: f64,
    /// Ticks between hard-rewiring cycles. 0 disables automatic cycles.
    pub rebuild_interval: u64,
    /// Soft-rewiring cutoff: edges lighter than this are removed. `relsim
    /// run` uses it unless a threshold is passed explicitly; 0 disables it.
    pub weight_threshold: f64,
    /// Which mutation protocol the engine runs.
    pub rewiring: RewiringMode,
    /// Health monitor thresholds applied after every step.
    pub health: HealthThresholds,
    /// Parameters of the default hard-rewiring scorer.
    pub scorer: MassScorerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            rebuild_interval: 0,
            weight_threshold: 0.0,
            rewiring: RewiringMode::Soft,
            health: HealthThresholds::default(),
            scorer: MassScorerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check every field; the first violation is reported.
    pub fn validate(&self) -> Result<(), RelsimError> {
        if self.max_iterations == 0 {
            return Err(RelsimError::invalid("max_iterations must be at least 1"));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(RelsimError::invalid(format!(
                "tolerance must be finite and positive, got {}",
                self.tolerance
            )));
        }
        if !(self.weight_threshold.is_finite() && self.weight_threshold >= 0.0) {
            return Err(RelsimError::invalid(format!(
                "weight_threshold must be finite and non-negative, got {}",
                self.weight_threshold
            )));
        }
        self.health.validate()?;
        self.scorer.validate()
    }

    /// Solver parameters derived from this configuration.
    #[must_use]
    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        }
    }

    /// Whether `evolve_step` should run a hard-rewiring cycle after `steps`
    /// ticks without one.
    #[must_use]
    pub fn hard_cycle_due(&self, steps: u64) -> bool {
        self.rewiring == RewiringMode::Hard
            && self.rebuild_interval > 0
            && steps >= self.rebuild_interval
    }
}
