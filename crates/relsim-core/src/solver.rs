//! # Sparse Linear Solver
//!
//! Complex BiCGStab for the Cayley system `(I + iαH) x = b`, with
//! `b = (I - iαH) ψ`. Every product goes through [`HamiltonianOperator`];
//! no dense intermediate is ever formed.
//!
//! ## Workspace Lifecycle
//!
//! `initialize` allocates the iteration vectors for one topology shape.
//! A topology rebuild invalidates them: solving against a topology whose
//! shape differs from the one the workspace was allocated for is an
//! `IllegalState`, and the owner must re-initialise.
//!
//! ## Stopping
//!
//! The solve stops on relative residual `‖r‖/‖b‖ < tolerance`, on reaching
//! `max_iterations`, or on a breakdown of the recurrences. Hitting the cap is
//! not an error; it is reported through [`SolveStats`].

use crate::operator::{CayleyFactor, HamiltonianOperator, dot, norm_sqr};
use crate::primitives::{BREAKDOWN_EPSILON, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE};
use crate::topology::SparseTopology;
use crate::types::try_zeroed;
use crate::{Amplitude, RelsimError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Stopping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Diagnostics of the most recent solve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SolveStats {
    /// Iterations performed; 0 when the initial guess already satisfied the
    /// tolerance.
    pub iterations: usize,
    /// Final relative residual `‖r‖/‖b‖`.
    pub residual: f64,
    /// Whether `residual < tolerance`.
    pub converged: bool,
}

/// Shape a workspace was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WorkspaceShape {
    node_count: usize,
    nnz: usize,
    gauge_dim: usize,
}

/// BiCGStab iteration vectors, all of length `N * gauge_dim`.
#[derive(Debug)]
struct SolverWorkspace {
    shape: WorkspaceShape,
    b: Vec<Amplitude>,
    r: Vec<Amplitude>,
    r_hat: Vec<Amplitude>,
    p: Vec<Amplitude>,
    v: Vec<Amplitude>,
    s: Vec<Amplitude>,
    t: Vec<Amplitude>,
}

impl SolverWorkspace {
    fn allocate(shape: WorkspaceShape) -> Result<Self, RelsimError> {
        let dim = shape
            .node_count
            .checked_mul(shape.gauge_dim)
            .ok_or(RelsimError::ResourceExhaustion {
                buffer: "solver workspace",
                requested: usize::MAX,
            })?;
        Ok(Self {
            shape,
            b: try_zeroed("bicgstab b", dim)?,
            r: try_zeroed("bicgstab r", dim)?,
            r_hat: try_zeroed("bicgstab r_hat", dim)?,
            p: try_zeroed("bicgstab p", dim)?,
            v: try_zeroed("bicgstab v", dim)?,
            s: try_zeroed("bicgstab s", dim)?,
            t: try_zeroed("bicgstab t", dim)?,
        })
    }

    fn dimension(&self) -> usize {
        self.b.len()
    }
}

/// Complex BiCGStab solver bound to one topology shape at a time.
#[derive(Debug, Default)]
pub struct BiCgStabSolver {
    settings: SolverSettings,
    workspace: Option<SolverWorkspace>,
    last: SolveStats,
}

impl BiCgStabSolver {
    #[must_use]
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            workspace: None,
            last: SolveStats::default(),
        }
    }

    #[must_use]
    pub fn settings(&self) -> SolverSettings {
        self.settings
    }

    /// Allocate the workspace for `topology` with `gauge_dim` components per
    /// node. Any previous workspace is dropped first.
    pub fn initialize(
        &mut self,
        topology: &SparseTopology,
        gauge_dim: usize,
    ) -> Result<(), RelsimError> {
        topology.ensure_ready()?;
        if gauge_dim == 0 {
            return Err(RelsimError::invalid("gauge_dim must be at least 1"));
        }
        self.workspace = None;
        self.workspace = Some(SolverWorkspace::allocate(WorkspaceShape {
            node_count: topology.node_count(),
            nnz: topology.nnz(),
            gauge_dim,
        })?);
        self.last = SolveStats::default();
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.workspace.is_some()
    }

    /// Workspace vector length, if initialised.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        self.workspace.as_ref().map(SolverWorkspace::dimension)
    }

    /// Drop the workspace. A later solve fails until re-initialised.
    pub fn release(&mut self) {
        self.workspace = None;
    }

    #[must_use]
    pub fn last_iterations(&self) -> usize {
        self.last.iterations
    }

    #[must_use]
    pub fn last_residual(&self) -> f64 {
        self.last.residual
    }

    #[must_use]
    pub fn last_stats(&self) -> SolveStats {
        self.last
    }

    /// Replace `state` with `(I + iαH)^{-1} (I - iαH) state`.
    ///
    /// The incoming state is also the initial guess.
    pub fn solve(
        &mut self,
        topology: &SparseTopology,
        state: &mut [Amplitude],
        alpha: f64,
    ) -> Result<SolveStats, RelsimError> {
        let settings = self.settings;
        let ws = self
            .workspace
            .as_mut()
            .ok_or_else(|| RelsimError::illegal_state("solver used before initialize"))?;

        let shape = WorkspaceShape {
            node_count: topology.node_count(),
            nnz: topology.nnz(),
            gauge_dim: ws.shape.gauge_dim,
        };
        if shape != ws.shape {
            return Err(RelsimError::illegal_state(format!(
                "solver workspace was allocated for {} nodes and {} entries, topology has {} and {}; re-initialize",
                ws.shape.node_count, ws.shape.nnz, shape.node_count, shape.nnz
            )));
        }
        if state.len() != ws.dimension() {
            return Err(RelsimError::invalid(format!(
                "state has {} amplitudes, solver expects {}",
                state.len(),
                ws.dimension()
            )));
        }
        if !alpha.is_finite() {
            return Err(RelsimError::invalid(format!("alpha {alpha} is not finite")));
        }

        let op = HamiltonianOperator::new(topology, ws.shape.gauge_dim)?;
        let stats = bicgstab(&op, ws, state, alpha, settings);
        self.last = stats;

        if !stats.converged {
            tracing::warn!(
                iterations = stats.iterations,
                residual = stats.residual,
                tolerance = settings.tolerance,
                "bicgstab stopped before reaching tolerance"
            );
        }
        Ok(stats)
    }
}

/// The iteration proper. `x` holds the initial guess on entry and the
/// solution on exit.
fn bicgstab(
    op: &HamiltonianOperator<'_>,
    ws: &mut SolverWorkspace,
    x: &mut [Amplitude],
    alpha: f64,
    settings: SolverSettings,
) -> SolveStats {
    let SolverWorkspace {
        b,
        r,
        r_hat,
        p,
        v,
        s,
        t,
        ..
    } = ws;
    let implicit = CayleyFactor::Implicit;

    // b = (I - iαH) x
    op.apply_cayley_unchecked(alpha, implicit.adjoint(), x, b);
    let b_norm = norm_sqr(b).sqrt();
    if b_norm == 0.0 {
        x.par_iter_mut().for_each(|xk| *xk = Amplitude::default());
        return SolveStats {
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }

    // r = b - A x
    op.apply_cayley_unchecked(alpha, implicit, x, v);
    r.par_iter_mut()
        .zip(b.par_iter())
        .zip(v.par_iter())
        .for_each(|((rk, &bk), &vk)| *rk = bk - vk);

    let mut residual = norm_sqr(r).sqrt() / b_norm;
    if residual < settings.tolerance {
        return SolveStats {
            iterations: 0,
            residual,
            converged: true,
        };
    }

    r_hat.copy_from_slice(r);
    p.par_iter_mut().for_each(|pk| *pk = Amplitude::default());
    v.par_iter_mut().for_each(|vk| *vk = Amplitude::default());

    let one = Amplitude::new(1.0, 0.0);
    let mut rho_prev = one;
    let mut step = one;
    let mut omega = one;
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;

        let rho = dot(r_hat, r);
        if rho.norm() < BREAKDOWN_EPSILON {
            break;
        }

        // p = r + beta (p - omega v)
        let beta = (rho / rho_prev) * (step / omega);
        p.par_iter_mut()
            .zip(r.par_iter())
            .zip(v.par_iter())
            .for_each(|((pk, &rk), &vk)| *pk = rk + beta * (*pk - omega * vk));

        op.apply_cayley_unchecked(alpha, implicit, p, v);
        let denom = dot(r_hat, v);
        if denom.norm() < BREAKDOWN_EPSILON {
            break;
        }
        step = rho / denom;

        // s = r - step v
        s.par_iter_mut()
            .zip(r.par_iter())
            .zip(v.par_iter())
            .for_each(|((sk, &rk), &vk)| *sk = rk - step * vk);

        let s_residual = norm_sqr(s).sqrt() / b_norm;
        if s_residual < settings.tolerance {
            x.par_iter_mut()
                .zip(p.par_iter())
                .for_each(|(xk, &pk)| *xk += step * pk);
            residual = s_residual;
            break;
        }

        op.apply_cayley_unchecked(alpha, implicit, s, t);
        let tt = norm_sqr(t);
        if tt < BREAKDOWN_EPSILON {
            x.par_iter_mut()
                .zip(p.par_iter())
                .for_each(|(xk, &pk)| *xk += step * pk);
            residual = s_residual;
            break;
        }
        omega = dot(t, s) / tt;

        x.par_iter_mut()
            .zip(p.par_iter())
            .zip(s.par_iter())
            .for_each(|((xk, &pk), &sk)| *xk += step * pk + omega * sk);

        // r = s - omega t
        r.par_iter_mut()
            .zip(s.par_iter())
            .zip(t.par_iter())
            .for_each(|((rk, &sk), &tk)| *rk = sk - omega * tk);

        residual = norm_sqr(r).sqrt() / b_norm;
        if residual < settings.tolerance || omega.norm() < BREAKDOWN_EPSILON {
            break;
        }
        rho_prev = rho;
    }

    SolveStats {
        iterations,
        residual,
        converged: residual < settings.tolerance,
    }
}

// =============================================================================
// TESTS
// =============================================================================
