//! # Engine Primitives
//!
//! Compiled-in constants for the relsim core. Runtime-tunable values live in
//! [`crate::config`]; these are either format constants or the defaults the
//! configuration falls back to.

/// Default BiCGStab iteration cap.
///
/// The cap is the solver's only cancellation mechanism.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Default relative residual at which BiCGStab stops.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

/// Magnitude above which a finite value is still counted as "Inf" by the
/// health monitor.
pub const DEFAULT_INF_MAGNITUDE: f64 = 1e30;

/// Chunk length for parallel reductions.
///
/// Partials are produced per fixed chunk and summed in chunk order, so a dot
/// product never depends on how rayon splits the work.
pub const REDUCTION_CHUNK: usize = 4096;

/// Inner products below this magnitude are treated as a BiCGStab breakdown.
pub const BREAKDOWN_EPSILON: f64 = 1e-300;

/// Magic bytes for the checkpoint blob header.
///
/// - Header = Magic Bytes ("RSIM") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"RSIM";

/// Current checkpoint format version.
///
/// Increment this when making breaking changes to the checkpoint layout.
pub const FORMAT_VERSION: u8 = 1;

/// Largest node count accepted by topology construction.
///
/// Column indices are stored as `u32`.
pub const MAX_NODE_COUNT: usize = u32::MAX as usize;
