//! # Hamiltonian Operator
//!
//! The implicit operator `H = diag(V) - W` over a [`SparseTopology`], acting
//! identically on every gauge component, and the two Cayley factors
//! `(I + iαH)` and `(I - iαH)` built on it.
//!
//! `H` is never materialised. Each product walks the CSR arrays once,
//! one rayon task per row; a row's sum is accumulated in CSR column order and
//! depends on no other row, so results are independent of scheduling.
//!
//! The vector reductions here (`dot`, `norm_sqr`) reduce fixed-size chunks
//! in parallel and add the chunk partials sequentially in index order.

use crate::primitives::REDUCTION_CHUNK;
use crate::topology::SparseTopology;
use crate::{Amplitude, RelsimError};
use rayon::prelude::*;

/// Rows per rayon task lower bound; keeps tiny rows from thrashing the pool.
const MIN_ROWS_PER_TASK: usize = 256;

/// Which Cayley factor to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CayleyFactor {
    /// `I + iαH`, the matrix the solver inverts.
    Implicit,
    /// `I - iαH`, the adjoint of [`CayleyFactor::Implicit`]; builds the
    /// right-hand side.
    Explicit,
}

impl CayleyFactor {
    /// The factor's adjoint.
    #[must_use]
    pub const fn adjoint(self) -> Self {
        match self {
            Self::Implicit => Self::Explicit,
            Self::Explicit => Self::Implicit,
        }
    }

    /// Coefficient multiplying `H`: `+iα` or `-iα`.
    fn coefficient(self, alpha: f64) -> Amplitude {
        match self {
            Self::Implicit => Amplitude::new(0.0, alpha),
            Self::Explicit => Amplitude::new(0.0, -alpha),
        }
    }
}

/// Borrowed view of a topology as a linear operator on `N * gauge_dim`
/// amplitudes.
#[derive(Debug, Clone, Copy)]
pub struct HamiltonianOperator<'a> {
    topology: &'a SparseTopology,
    gauge_dim: usize,
}

impl<'a> HamiltonianOperator<'a> {
    /// Wrap a ready topology.
    pub fn new(topology: &'a SparseTopology, gauge_dim: usize) -> Result<Self, RelsimError> {
        topology.ensure_ready()?;
        if gauge_dim == 0 {
            return Err(RelsimError::invalid("gauge_dim must be at least 1"));
        }
        Ok(Self {
            topology,
            gauge_dim,
        })
    }

    /// Length of the vectors this operator acts on.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.topology.node_count() * self.gauge_dim
    }

    /// `y = H x`.
    pub fn apply_hamiltonian(&self, x: &[Amplitude], y: &mut [Amplitude]) -> Result<(), RelsimError> {
        self.check_lengths(x, y)?;
        self.apply_rows(x, y, |_, hx| hx);
        Ok(())
    }

    /// `y = (I ± iαH) x`.
    pub fn apply_cayley(
        &self,
        alpha: f64,
        factor: CayleyFactor,
        x: &[Amplitude],
        y: &mut [Amplitude],
    ) -> Result<(), RelsimError> {
        self.check_lengths(x, y)?;
        self.apply_cayley_unchecked(alpha, factor, x, y);
        Ok(())
    }

    /// `y = (I ± iαH) x` without length checks; the solver validates once
    /// per solve.
    pub(crate) fn apply_cayley_unchecked(
        &self,
        alpha: f64,
        factor: CayleyFactor,
        x: &[Amplitude],
        y: &mut [Amplitude],
    ) {
        let coeff = factor.coefficient(alpha);
        self.apply_rows(x, y, |xi, hx| xi + coeff * hx);
    }

    fn apply_rows<F>(&self, x: &[Amplitude], y: &mut [Amplitude], combine: F)
    where
        F: Fn(Amplitude, Amplitude) -> Amplitude + Sync,
    {
        let g = self.gauge_dim;
        let potential = self.topology.node_potential();

        y.par_chunks_mut(g)
            .enumerate()
            .with_min_len(MIN_ROWS_PER_TASK)
            .for_each(|(i, yi)| {
                let (cols, weights) = self.topology.row(i);
                let base = i * g;
                for (c, out) in yi.iter_mut().enumerate() {
                    let xi = x[base + c];
                    let mut hx = xi * potential[i];
                    for (&j, &w) in cols.iter().zip(weights) {
                        hx -= x[j as usize * g + c] * w;
                    }
                    *out = combine(xi, hx);
                }
            });
    }

    fn check_lengths(&self, x: &[Amplitude], y: &[Amplitude]) -> Result<(), RelsimError> {
        let dim = self.dimension();
        if x.len() != dim || y.len() != dim {
            return Err(RelsimError::invalid(format!(
                "operator dimension is {}, got input {} and output {}",
                dim,
                x.len(),
                y.len()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// VECTOR KERNELS
// =============================================================================

/// `Σ conj(a_k) b_k`, deterministic across thread counts.
pub(crate) fn dot(a: &[Amplitude], b: &[Amplitude]) -> Amplitude {
    let partials: Vec<Amplitude> = a
        .par_chunks(REDUCTION_CHUNK)
        .zip(b.par_chunks(REDUCTION_CHUNK))
        .map(|(ca, cb)| ca.iter().zip(cb).map(|(x, y)| x.conj() * y).sum())
        .collect();
    partials.into_iter().sum()
}

/// `Σ |a_k|^2`, deterministic across thread counts.
pub(crate) fn norm_sqr(a: &[Amplitude]) -> f64 {
    let partials: Vec<f64> = a
        .par_chunks(REDUCTION_CHUNK)
        .map(|chunk| chunk.iter().map(|x| x.norm_sqr()).sum())
        .collect();
    partials.into_iter().sum()
}

/// L2 norm of a state vector.
#[must_use]
pub fn state_norm(state: &[Amplitude]) -> f64 {
    norm_sqr(state).sqrt()
}

// =============================================================================
// TESTS
// =============================================================================
