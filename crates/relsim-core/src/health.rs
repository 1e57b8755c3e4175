//! # Health Monitor
//!
//! Read-only scans of numeric buffers for NaN, out-of-range magnitudes and
//! (optionally) negative values.
//!
//! The monitor is diagnostic only: it never halts or repairs anything.
//! Divergence is a valid experimental outcome, so deciding what to do with an
//! unhealthy result is left to the caller.
//!
//! Scans run chunk-parallel. Chunk tallies merge with integer addition and a
//! min over indices, so counts and first-offender indices are identical for
//! any scan order.

use crate::Amplitude;
use crate::RelsimError;
use crate::primitives::{DEFAULT_INF_MAGNITUDE, REDUCTION_CHUNK};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How negative values in a real buffer are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativePolicy {
    /// Negatives are not counted.
    #[default]
    Ignore,
    /// Negatives are counted but do not affect `healthy`.
    Count,
    /// Any negative value makes the buffer unhealthy.
    Reject,
}

/// Thresholds a scan is judged against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Largest NaN count still considered healthy.
    pub nan_threshold: usize,
    /// Largest Inf count still considered healthy.
    pub inf_threshold: usize,
    /// Finite values with a magnitude above this count as Inf.
    pub inf_magnitude: f64,
    pub negative_policy: NegativePolicy,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            nan_threshold: 0,
            inf_threshold: 0,
            inf_magnitude: DEFAULT_INF_MAGNITUDE,
            negative_policy: NegativePolicy::Ignore,
        }
    }
}

impl HealthThresholds {
    pub fn validate(&self) -> Result<(), RelsimError> {
        if self.inf_magnitude.is_nan() || self.inf_magnitude <= 0.0 {
            return Err(RelsimError::invalid(format!(
                "inf_magnitude must be positive, got {}",
                self.inf_magnitude
            )));
        }
        Ok(())
    }
}

/// Outcome of one scan. Recomputed fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Number of elements inspected.
    pub scanned: usize,
    pub nan_count: usize,
    pub inf_count: usize,
    pub negative_count: usize,
    /// Lowest index holding a NaN.
    pub first_nan_index: Option<usize>,
    /// Lowest index holding an Inf.
    pub first_inf_index: Option<usize>,
    pub healthy: bool,
}

/// Per-chunk counts, merged associatively.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    nan: usize,
    inf: usize,
    negative: usize,
    first_nan: Option<usize>,
    first_inf: Option<usize>,
}

impl Tally {
    fn merge(self, other: Self) -> Self {
        Self {
            nan: self.nan + other.nan,
            inf: self.inf + other.inf,
            negative: self.negative + other.negative,
            first_nan: lowest(self.first_nan, other.first_nan),
            first_inf: lowest(self.first_inf, other.first_inf),
        }
    }
}

fn lowest(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Classification of a single element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finding {
    Nan,
    Inf,
    Negative,
    Clean,
}

/// Buffer scanner configured with [`HealthThresholds`].
#[derive(Debug, Clone, Default)]
pub struct HealthMonitor {
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Full scan of a real buffer.
    #[must_use]
    pub fn check_buffer(&self, buffer: &[f64]) -> HealthCheckResult {
        self.scan(buffer, |x| self.classify_real(x))
    }

    /// Full scan of a complex state. An amplitude is NaN or Inf when either
    /// component is; the negative policy does not apply.
    #[must_use]
    pub fn check_state(&self, state: &[Amplitude]) -> HealthCheckResult {
        self.scan(state, |z| self.classify_complex(z))
    }

    /// Cheap hot-path poll: inspects every `stride`-th element (stride 0 is
    /// treated as 1) and reports only whether all samples were clean.
    #[must_use]
    pub fn quick_check(&self, buffer: &[f64], stride: usize) -> bool {
        let stride = stride.max(1);
        buffer.par_iter().step_by(stride).all(|&x| match self.classify_real(x) {
            Finding::Nan | Finding::Inf => false,
            Finding::Negative => self.thresholds.negative_policy != NegativePolicy::Reject,
            Finding::Clean => true,
        })
    }

    fn scan<T, F>(&self, buffer: &[T], classify: F) -> HealthCheckResult
    where
        T: Copy + Sync,
        F: Fn(T) -> Finding + Sync,
    {
        let tally = buffer
            .par_chunks(REDUCTION_CHUNK)
            .enumerate()
            .map(|(chunk_index, chunk)| {
                let base = chunk_index * REDUCTION_CHUNK;
                let mut t = Tally::default();
                for (offset, &value) in chunk.iter().enumerate() {
                    match classify(value) {
                        Finding::Nan => {
                            t.nan += 1;
                            t.first_nan = t.first_nan.or(Some(base + offset));
                        }
                        Finding::Inf => {
                            t.inf += 1;
                            t.first_inf = t.first_inf.or(Some(base + offset));
                        }
                        Finding::Negative => t.negative += 1,
                        Finding::Clean => {}
                    }
                }
                t
            })
            .reduce(Tally::default, Tally::merge);

        let healthy = tally.nan <= self.thresholds.nan_threshold
            && tally.inf <= self.thresholds.inf_threshold
            && !(self.thresholds.negative_policy == NegativePolicy::Reject && tally.negative > 0);

        HealthCheckResult {
            scanned: buffer.len(),
            nan_count: tally.nan,
            inf_count: tally.inf,
            negative_count: tally.negative,
            first_nan_index: tally.first_nan,
            first_inf_index: tally.first_inf,
            healthy,
        }
    }

    fn classify_real(&self, x: f64) -> Finding {
        if x.is_nan() {
            Finding::Nan
        } else if x.is_infinite() || x.abs() > self.thresholds.inf_magnitude {
            Finding::Inf
        } else if x < 0.0 && self.thresholds.negative_policy != NegativePolicy::Ignore {
            Finding::Negative
        } else {
            Finding::Clean
        }
    }

    fn classify_complex(&self, z: Amplitude) -> Finding {
        if z.re.is_nan() || z.im.is_nan() {
            Finding::Nan
        } else if !z.is_finite() || z.re.abs().max(z.im.abs()) > self.thresholds.inf_magnitude {
            Finding::Inf
        } else {
            Finding::Clean
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_buffer_is_healthy() {
        let monitor = HealthMonitor::default();
        let result = monitor.check_buffer(&[0.0, 1.0, -2.0, 3.5]);
        assert!(result.healthy);
        assert_eq!(result.scanned, 4);
        assert_eq!(result.nan_count, 0);
        assert_eq!(result.first_nan_index, None);
        assert_eq!(result.negative_count, 0);
    }

    #[test]
    fn single_nan_reported_at_its_index() {
        let monitor = HealthMonitor::default();
        let index = REDUCTION_CHUNK * 2 + 5;
        let mut buffer = vec![1.0; REDUCTION_CHUNK * 4];
        buffer[index] = f64::NAN;

        for _ in 0..8 {
            let result = monitor.check_buffer(&buffer);
            assert_eq!(result.nan_count, 1);
            assert_eq!(result.first_nan_index, Some(index));
            assert!(!result.healthy);
        }
    }

    #[test]
    fn lowest_nan_index_wins() {
        let monitor = HealthMonitor::default();
        let mut buffer = vec![0.0; REDUCTION_CHUNK * 3];
        buffer[REDUCTION_CHUNK * 2 + 1] = f64::NAN;
        buffer[REDUCTION_CHUNK + 7] = f64::NAN;
        buffer[REDUCTION_CHUNK + 9] = f64::NAN;

        let result = monitor.check_buffer(&buffer);
        assert_eq!(result.nan_count, 3);
        assert_eq!(result.first_nan_index, Some(REDUCTION_CHUNK + 7));
    }

    #[test]
    fn out_of_range_magnitude_counts_as_inf() {
        let monitor = HealthMonitor::new(HealthThresholds {
            inf_magnitude: 10.0,
            ..HealthThresholds::default()
        });
        let result = monitor.check_buffer(&[1.0, 11.0, f64::NEG_INFINITY]);
        assert_eq!(result.inf_count, 2);
        assert_eq!(result.first_inf_index, Some(1));
        assert!(!result.healthy);
    }

    #[test]
    fn thresholds_tolerate_counts() {
        let monitor = HealthMonitor::new(HealthThresholds {
            nan_threshold: 1,
            ..HealthThresholds::default()
        });
        assert!(monitor.check_buffer(&[f64::NAN, 0.0]).healthy);
        assert!(!monitor.check_buffer(&[f64::NAN, f64::NAN]).healthy);
    }

    #[test]
    fn negative_policies() {
        let buffer = [1.0, -1.0, -2.0];

        let count = HealthMonitor::new(HealthThresholds {
            negative_policy: NegativePolicy::Count,
            ..HealthThresholds::default()
        })
        .check_buffer(&buffer);
        assert_eq!(count.negative_count, 2);
        assert!(count.healthy);

        let reject = HealthMonitor::new(HealthThresholds {
            negative_policy: NegativePolicy::Reject,
            ..HealthThresholds::default()
        });
        assert!(!reject.check_buffer(&buffer).healthy);
        assert!(!reject.quick_check(&buffer, 1));
    }

    #[test]
    fn complex_state_scan() {
        let monitor = HealthMonitor::default();
        let state = [
            Amplitude::new(0.5, 0.5),
            Amplitude::new(0.0, f64::NAN),
            Amplitude::new(f64::INFINITY, 0.0),
        ];
        let result = monitor.check_state(&state);
        assert_eq!(result.nan_count, 1);
        assert_eq!(result.first_nan_index, Some(1));
        assert_eq!(result.inf_count, 1);
        assert_eq!(result.first_inf_index, Some(2));
    }

    #[test]
    fn quick_check_samples_by_stride() {
        let monitor = HealthMonitor::default();
        let mut buffer = vec![0.0; 10];
        buffer[3] = f64::NAN;

        assert!(!monitor.quick_check(&buffer, 1));
        assert!(!monitor.quick_check(&buffer, 0));
        assert!(!monitor.quick_check(&buffer, 3));
        // stride 2 samples 0,2,4,6,8 and misses index 3
        assert!(monitor.quick_check(&buffer, 2));
    }

    #[test]
    fn thresholds_validation() {
        assert!(HealthThresholds::default().validate().is_ok());
        let bad = HealthThresholds {
            inf_magnitude: 0.0,
            ..HealthThresholds::default()
        };
        assert!(bad.validate().is_err());
    }
}
