//! Job-level tunables and their defaults.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Defaults applied to every tunable a caller leaves unset.
///
/// Replaces ambient application configuration: build one from `OagrConfig`
/// (or `Default`) and pass it explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDefaults {
    /// Overall job lifetime; `None` means the job only ends when nothing is pending.
    pub timeout: Option<Duration>,
    /// Multiplier of the per-identifier exponential backoff.
    pub back_off_factor: f64,
    /// Ceiling on any single per-identifier backoff, in seconds.
    pub max_back_off: f64,
    /// Delivery attempts after which an identifier is abandoned.
    pub max_retries: Option<u32>,
    /// Maximum identifiers per lookup request.
    pub batch_size: usize,
}

impl Default for StateDefaults {
    fn default() -> Self {
        Self {
            timeout: None,
            back_off_factor: 1.0,
            max_back_off: 120.0,
            max_retries: None,
            batch_size: 100,
        }
    }
}

/// Per-job overrides; every `None` falls back to `StateDefaults`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateParams {
    pub timeout: Option<Duration>,
    pub back_off_factor: Option<f64>,
    pub max_back_off: Option<f64>,
    pub max_retries: Option<u32>,
    pub batch_size: Option<usize>,
    /// Job start; defaults to now.
    pub start: Option<DateTime<Utc>>,
}

impl StateParams {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_back_off(mut self, factor: f64, max_back_off: f64) -> Self {
        self.back_off_factor = Some(factor);
        self.max_back_off = Some(max_back_off);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }
}
