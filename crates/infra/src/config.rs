//! Configuration loading and representation.
//!
//! Everything is read once into an explicit `OagrConfig` and handed to the
//! components that need it; nothing consults the environment afterwards.

use std::time::Duration;

use oagr_core::StateDefaults;
use thiserror::Error;

pub const DEFAULT_LOOKUP_URL: &str = "http://howopenisit.org/lookup";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
    #[error("{0} must be set")]
    Missing(String),
}

/// HTTP transport tunables (per-request retries, not per-identifier ones).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub back_off_factor: f64,
    /// Seconds.
    pub max_back_off: f64,
    pub timeout: Duration,
    pub retry_on_timeout: bool,
    /// Response statuses that are retried instead of returned.
    pub retry_codes: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            back_off_factor: 1.0,
            max_back_off: 30.0,
            timeout: Duration::from_secs(30),
            retry_on_timeout: true,
            retry_codes: vec![429, 500, 502, 503, 504],
        }
    }
}

/// Job runner tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Pause before every store sweep.
    pub poll_interval: Duration,
    /// Pause between consecutive lookup batches within one cycle.
    pub lookup_throttle: Duration,
    /// Log cycle progress at info rather than debug.
    pub verbose: bool,
    /// Stop the loop on a failed sweep instead of cooling down and resuming.
    pub exit_on_exception: bool,
    pub exception_cooldown: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            lookup_throttle: Duration::from_secs(5),
            verbose: true,
            exit_on_exception: false,
            exception_cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OagrConfig {
    pub lookup_url: String,
    pub state: StateDefaults,
    pub http: HttpConfig,
    pub runner: RunnerConfig,
    pub database_url: Option<String>,
}

impl Default for OagrConfig {
    fn default() -> Self {
        Self {
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            state: StateDefaults::default(),
            http: HttpConfig::default(),
            runner: RunnerConfig::default(),
            database_url: None,
        }
    }
}

impl OagrConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset or blank keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(url) = get("OAG_LOOKUP_URL") {
            cfg.lookup_url = url;
        }
        cfg.database_url = get("DATABASE_URL");

        let state = &mut cfg.state;
        if let Some(v) = get("OAG_STATE_DEFAULT_TIMEOUT") {
            state.timeout = Some(parse_secs("OAG_STATE_DEFAULT_TIMEOUT", &v)?);
        }
        if let Some(v) = get("OAG_STATE_BACK_OFF_FACTOR") {
            state.back_off_factor = parse_positive("OAG_STATE_BACK_OFF_FACTOR", &v)?;
        }
        if let Some(v) = get("OAG_STATE_MAX_BACK_OFF") {
            state.max_back_off = parse_positive("OAG_STATE_MAX_BACK_OFF", &v)?;
        }
        if let Some(v) = get("OAG_STATE_MAX_RETRIES") {
            state.max_retries = Some(parse_at_least_one("OAG_STATE_MAX_RETRIES", &v)?);
        }
        if let Some(v) = get("OAG_STATE_BATCH_SIZE") {
            state.batch_size = parse_at_least_one::<usize>("OAG_STATE_BATCH_SIZE", &v)?;
        }

        let http = &mut cfg.http;
        if let Some(v) = get("HTTP_MAX_RETRIES") {
            http.max_retries = parse_value("HTTP_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("HTTP_BACK_OFF_FACTOR") {
            http.back_off_factor = parse_positive("HTTP_BACK_OFF_FACTOR", &v)?;
        }
        if let Some(v) = get("HTTP_MAX_BACK_OFF") {
            http.max_back_off = parse_positive("HTTP_MAX_BACK_OFF", &v)?;
        }
        if let Some(v) = get("HTTP_TIMEOUT") {
            http.timeout = parse_secs("HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = get("HTTP_RETRY_ON_TIMEOUT") {
            http.retry_on_timeout = parse_bool("HTTP_RETRY_ON_TIMEOUT", &v)?;
        }
        if let Some(v) = get("HTTP_RETRY_CODES") {
            http.retry_codes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_value::<u16>("HTTP_RETRY_CODES", s))
                .collect::<Result<_, _>>()?;
        }

        let runner = &mut cfg.runner;
        if let Some(v) = get("OAGR_POLL_INTERVAL") {
            runner.poll_interval = parse_secs("OAGR_POLL_INTERVAL", &v)?;
        }
        if let Some(v) = get("OAGR_LOOKUP_THROTTLE") {
            runner.lookup_throttle = parse_secs("OAGR_LOOKUP_THROTTLE", &v)?;
        }
        if let Some(v) = get("OAGR_VERBOSE") {
            runner.verbose = parse_bool("OAGR_VERBOSE", &v)?;
        }
        if let Some(v) = get("OAGR_EXIT_ON_EXCEPTION") {
            runner.exit_on_exception = parse_bool("OAGR_EXIT_ON_EXCEPTION", &v)?;
        }
        if let Some(v) = get("OAGR_EXCEPTION_SLEEP_TIME") {
            runner.exception_cooldown = parse_secs("OAGR_EXCEPTION_SLEEP_TIME", &v)?;
        }

        Ok(cfg)
    }

    /// The database URL, or an error naming the variable to set.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("DATABASE_URL".to_string()))
    }
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_positive(key: &str, value: &str) -> Result<f64, ConfigError> {
    let v: f64 = parse_value(key, value)?;
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(invalid(key, value, "must be a positive number"))
    }
}

fn parse_at_least_one<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    T::Err: std::fmt::Display,
{
    let v: T = parse_value(key, value)?;
    if v >= T::from(1u8) {
        Ok(v)
    } else {
        Err(invalid(key, value, "must be at least 1"))
    }
}

/// Non-negative seconds, fractional allowed.
fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let v: f64 = parse_value(key, value)?;
    Duration::try_from_secs_f64(v).map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true/false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<OagrConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OagrConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg, OagrConfig::default());
        assert_eq!(cfg.state.batch_size, 100);
        assert_eq!(cfg.state.max_back_off, 120.0);
        assert!(cfg.require_database_url().is_err());
    }

    #[test]
    fn reads_every_section() {
        let cfg = load(&[
            ("OAG_LOOKUP_URL", "http://localhost:9000/lookup"),
            ("OAG_STATE_DEFAULT_TIMEOUT", "3600"),
            ("OAG_STATE_MAX_RETRIES", "5"),
            ("OAG_STATE_BATCH_SIZE", "250"),
            ("HTTP_RETRY_CODES", "503, 504"),
            ("HTTP_RETRY_ON_TIMEOUT", "false"),
            ("OAGR_POLL_INTERVAL", "0.5"),
            ("OAGR_EXIT_ON_EXCEPTION", "yes"),
            ("DATABASE_URL", "postgres://localhost/oagr"),
        ])
        .unwrap();

        assert_eq!(cfg.lookup_url, "http://localhost:9000/lookup");
        assert_eq!(cfg.state.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(cfg.state.max_retries, Some(5));
        assert_eq!(cfg.state.batch_size, 250);
        assert_eq!(cfg.http.retry_codes, vec![503, 504]);
        assert!(!cfg.http.retry_on_timeout);
        assert_eq!(cfg.runner.poll_interval, Duration::from_millis(500));
        assert!(cfg.runner.exit_on_exception);
        assert_eq!(cfg.require_database_url().unwrap(), "postgres://localhost/oagr");
    }

    #[test]
    fn unparseable_values_are_fatal() {
        for (key, value) in [
            ("OAG_STATE_BATCH_SIZE", "0"),
            ("OAG_STATE_BATCH_SIZE", "lots"),
            ("OAG_STATE_BACK_OFF_FACTOR", "-1"),
            ("OAG_STATE_MAX_RETRIES", "0"),
            ("HTTP_RETRY_CODES", "503,abc"),
            ("HTTP_TIMEOUT", "-3"),
            ("OAGR_VERBOSE", "maybe"),
        ] {
            let err = load(&[(key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key),
                "{err}"
            );
        }
    }
}
