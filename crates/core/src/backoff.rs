//! Exponential backoff shared by the HTTP transport and identifier scheduling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest exponent that is actually evaluated; beyond this `2^attempt`
/// dwarfs any realistic ceiling, so the result is the ceiling anyway.
const MAX_EXPONENT: u32 = 62;

/// Exponential backoff: `min(factor * 2^attempt, ceiling)` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Multiplier applied to `2^attempt`.
    pub factor: f64,
    /// Upper bound on any single delay, in seconds.
    pub ceiling: f64,
}

impl BackoffPolicy {
    pub fn new(factor: f64, ceiling: f64) -> Self {
        Self { factor, ceiling }
    }

    /// Delay in seconds for the given attempt.
    pub fn delay_secs(&self, attempt: u32) -> f64 {
        delay(attempt, self.factor, self.ceiling)
    }

    /// Delay for the given attempt as a `Duration`.
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.delay_secs(attempt))
    }

    /// Delay rounded up to whole seconds.
    ///
    /// Persisted timestamps have second precision, so scheduling uses whole
    /// seconds; rounding up keeps a recomputed due time strictly in the future.
    pub fn delay_whole_secs(&self, attempt: u32) -> i64 {
        self.delay_secs(attempt).ceil() as i64
    }
}

/// `min(factor * 2^attempt, ceiling)`, never negative or NaN.
///
/// Large attempts saturate at `ceiling` instead of overflowing.
pub fn delay(attempt: u32, factor: f64, ceiling: f64) -> f64 {
    let ceiling = if ceiling.is_finite() && ceiling > 0.0 {
        ceiling
    } else {
        0.0
    };
    if !(factor.is_finite() && factor > 0.0) {
        return 0.0;
    }

    let exp = 2_f64.powi(attempt.min(MAX_EXPONENT) as i32);
    let seconds = factor * exp;
    if seconds.is_finite() {
        seconds.min(ceiling)
    } else {
        ceiling
    }
}
