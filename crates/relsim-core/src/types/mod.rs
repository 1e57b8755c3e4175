//! # Core Type Definitions
//!
//! Shared types for the relsim sparse evolution engine:
//! - Amplitude representation (`Amplitude`)
//! - Rebuild outcome reported by topology mutations (`RebuildOutcome`)
//! - Error types (`RelsimError`)
//!
//! ## Error Taxonomy
//!
//! Only caller mistakes and allocation failures are errors. Numerical
//! divergence and solver non-convergence are diagnostics: they travel back
//! as values (`HealthCheckResult`, `SolveStats`) and never as `Err`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// AMPLITUDES
// =============================================================================

/// One complex amplitude of the evolved state.
///
/// The state is a flat `Vec<Amplitude>` of length `node_count * gauge_dim`,
/// ordered node-major then gauge component.
pub type Amplitude = Complex64;

// =============================================================================
// REBUILD OUTCOME
// =============================================================================

/// Result of a topology mutation request.
///
/// Rebuilds are atomic from the caller's view: either the topology was
/// replaced wholesale, or nothing changed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebuildOutcome {
    /// The no-op fast path: structure is unchanged and no buffer was touched.
    Unchanged,
    /// The topology was replaced and every dependent buffer re-initialised.
    Rebuilt {
        /// Node count of the new topology.
        node_count: usize,
        /// Directed entries of the new topology.
        nnz: usize,
    },
}

impl RebuildOutcome {
    /// Whether a new topology generation was installed.
    #[must_use]
    pub const fn is_rebuilt(&self) -> bool {
        matches!(self, Self::Rebuilt { .. })
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the relsim engine.
///
/// - Fail fast at the violating call
/// - No partial mutation: on `Err` the engine keeps its last valid state
/// - The core never panics on bad input; every check surfaces here
#[derive(Debug, Error)]
pub enum RelsimError {
    /// An operation was invoked before the required initialisation, or on a
    /// disposed engine.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Malformed array shapes, lengths or values.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A working buffer could not be allocated. There is no smaller fallback.
    #[error("Resource exhaustion: cannot allocate {requested} elements for {buffer}")]
    ResourceExhaustion {
        /// Which buffer failed.
        buffer: &'static str,
        /// Number of elements requested.
        requested: usize,
    },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl RelsimError {
    pub(crate) fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Allocate a zero-filled vector, reporting allocation failure as
/// [`RelsimError::ResourceExhaustion`] instead of aborting.
pub(crate) fn try_zeroed<T: Clone + Default>(
    buffer: &'static str,
    len: usize,
) -> Result<Vec<T>, RelsimError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| RelsimError::ResourceExhaustion {
            buffer,
            requested: len,
        })?;
    v.resize(len, T::default());
    Ok(v)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_outcome_flags() {
        assert!(!RebuildOutcome::Unchanged.is_rebuilt());
        assert!(
            RebuildOutcome::Rebuilt {
                node_count: 3,
                nnz: 4
            }
            .is_rebuilt()
        );
    }

    #[test]
    fn try_zeroed_allocates_requested_len() {
        let v: Vec<f64> = try_zeroed("test", 16).expect("alloc");
        assert_eq!(v.len(), 16);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn try_zeroed_reports_exhaustion() {
        let result: Result<Vec<u64>, _> = try_zeroed("huge", usize::MAX);
        assert!(matches!(
            result,
            Err(RelsimError::ResourceExhaustion {
                buffer: "huge",
                ..
            })
        ));
    }

    #[test]
    fn error_messages_are_descriptive() {
        let e = RelsimError::illegal_state("engine not initialised");
        assert_eq!(e.to_string(), "Illegal state: engine not initialised");
        let e = RelsimError::invalid("length mismatch");
        assert_eq!(e.to_string(), "Invalid argument: length mismatch");
    }
}
