//! Environment-driven configuration
//!
//! All knobs are read from `SULKU_*` variables with sensible defaults, so
//! the relay runs with zero configuration. Durations are expressed in
//! milliseconds on the wire and converted once, here.

use std::time::Duration;

use crate::breaker::BreakerConfig;
use crate::error::RelayError;

/// Log output format, `SULKU_LOG_FORMAT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable, for development
    Pretty,
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffer slots, `SULKU_BUFFER_CAPACITY` (default 1)
    pub buffer_capacity: usize,
    /// How long a worker waits for a buffer slot, `SULKU_PUSH_TIMEOUT_MS`
    /// (default 1000)
    pub push_timeout: Duration,
    /// Pause between accept attempts while the breaker is open,
    /// `SULKU_ACCEPT_BACKOFF_MS` (default 500)
    pub accept_backoff: Duration,
    /// Trackable failures that trip the breaker,
    /// `SULKU_BREAKER_TRIP_THRESHOLD` (default 5)
    pub breaker_trip_threshold: u32,
    /// Breaker failure window, `SULKU_BREAKER_WINDOW_MS` (default 10000)
    pub breaker_window: Duration,
    /// Breaker cooldown before probing, `SULKU_BREAKER_COOLDOWN_MS`
    /// (default 30000)
    pub breaker_cooldown: Duration,
    /// Grace period for workers on shutdown, `SULKU_WORKER_DRAIN_MS`
    /// (default 15000)
    pub worker_drain: Duration,
    /// Pipeline name stamped into event metadata, `SULKU_PIPELINE`
    /// (default "default")
    pub pipeline: String,
    /// Default log filter, `SULKU_LOG_LEVEL` (default "info")
    pub log_level: String,
    /// Log output format, `SULKU_LOG_FORMAT` = json|pretty (default json)
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: 1,
            push_timeout: Duration::from_millis(1000),
            accept_backoff: Duration::from_millis(500),
            breaker_trip_threshold: 5,
            breaker_window: Duration::from_millis(10_000),
            breaker_cooldown: Duration::from_millis(30_000),
            worker_drain: Duration::from_millis(15_000),
            pipeline: "default".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl Config {
    /// Load configuration from the environment
    ///
    /// # Errors
    /// `RelayError::Config` on an unparsable or out-of-range value; a
    /// missing variable always falls back to its default.
    pub fn from_env() -> Result<Self, RelayError> {
        let defaults = Self::default();

        let config = Self {
            buffer_capacity: parse_var("SULKU_BUFFER_CAPACITY", defaults.buffer_capacity)?,
            push_timeout: parse_ms("SULKU_PUSH_TIMEOUT_MS", defaults.push_timeout)?,
            accept_backoff: parse_ms("SULKU_ACCEPT_BACKOFF_MS", defaults.accept_backoff)?,
            breaker_trip_threshold: parse_var(
                "SULKU_BREAKER_TRIP_THRESHOLD",
                defaults.breaker_trip_threshold,
            )?,
            breaker_window: parse_ms("SULKU_BREAKER_WINDOW_MS", defaults.breaker_window)?,
            breaker_cooldown: parse_ms("SULKU_BREAKER_COOLDOWN_MS", defaults.breaker_cooldown)?,
            worker_drain: parse_ms("SULKU_WORKER_DRAIN_MS", defaults.worker_drain)?,
            pipeline: std::env::var("SULKU_PIPELINE").unwrap_or(defaults.pipeline),
            log_level: std::env::var("SULKU_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: parse_log_format("SULKU_LOG_FORMAT", defaults.log_format)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.buffer_capacity == 0 {
            return Err(RelayError::Config(
                "SULKU_BUFFER_CAPACITY must be >= 1".to_string(),
            ));
        }
        if self.breaker_trip_threshold == 0 {
            return Err(RelayError::Config(
                "SULKU_BREAKER_TRIP_THRESHOLD must be >= 1".to_string(),
            ));
        }
        if self.pipeline.is_empty() {
            return Err(RelayError::Config(
                "SULKU_PIPELINE must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The breaker configuration slice of this config
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig {
            trip_threshold: self.breaker_trip_threshold,
            window: self.breaker_window,
            cooldown: self.breaker_cooldown,
            half_open_max_probes: 1,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, RelayError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::Config(format!("{name}: cannot parse {raw:?}"))),
        Err(_) => Ok(default),
    }
}

fn parse_ms(name: &str, default: Duration) -> Result<Duration, RelayError> {
    let millis = parse_var::<u64>(name, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn parse_log_format(name: &str, default: LogFormat) -> Result<LogFormat, RelayError> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(RelayError::Config(format!(
                "{name}: expected json or pretty, got {other:?}"
            ))),
        },
        Err(_) => Ok(default),
    }
}
