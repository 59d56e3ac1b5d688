//! Circuit breaker guarding the buffer hand-off
//!
//! Wraps the breaker pattern around risky operations (in this relay, the
//! timed buffer push). Repeated push timeouts mean the downstream is
//! saturated; tripping converts that into fast rejection so workers and
//! the acceptor stop piling onto a blocked buffer.
//!
//! Rejection is a value, not unwinding: guarded calls return
//! [`GuardError::Rejected`] with the state that refused them.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sulku_core::StageError;
use thiserror::Error;
use tokio::time::Instant;

/// Circuit breaker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - guarded calls pass through
    Closed,
    /// Tripped - guarded calls fail fast
    Open,
    /// Probing recovery - a limited number of trial calls allowed
    HalfOpen,
}

/// Which state refused a guarded call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The breaker was open; the operation was not invoked
    Open,
    /// A half-open probe failed, or no probe slot was available
    HalfOpen,
}

/// Failure of a guarded call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The breaker refused the call (or a probe failed)
    #[error("breaker rejected the operation ({0:?})")]
    Rejected(Rejection),
    /// The operation itself failed while the breaker was closed
    #[error(transparent)]
    Inner(StageError),
}

/// Configuration for breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Trackable failures within the window needed to trip
    pub trip_threshold: u32,
    /// Sliding window over which failures accumulate
    pub window: Duration,
    /// Time to wait after a trip before allowing a probe
    pub cooldown: Duration,
    /// Concurrent probe calls allowed while half-open
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            window: Duration::from_secs(10),
            cooldown: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Internal state record; all transitions happen under one lock
struct BreakerState {
    state: CircuitState,
    failures: u32,
    window_start: Option<Instant>,
    tripped_at: Option<Instant>,
    probes_in_flight: u32,
}

/// How a call was admitted; decides what its outcome means
#[derive(Clone, Copy)]
enum Admission {
    Pass,
    Probe,
}

/// Three-state circuit breaker
///
/// Shared by reference between the acceptor (which only queries
/// [`is_closed`](Self::is_closed)) and the connection workers (which run
/// their pushes through [`execute`](Self::execute)).
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: RwLock<BreakerState>,
    /// Times the breaker has tripped open
    open_count: AtomicU64,
    /// Calls refused without invoking the operation
    rejected_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker with the given configuration
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                window_start: None,
                tripped_at: None,
                probes_in_flight: 0,
            }),
            open_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    /// Create a breaker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(BreakerConfig::default())
    }

    /// Whether the breaker is currently closed
    ///
    /// Read-only: never transitions state. While open, this stays false
    /// through the cooldown; the open→half-open transition happens lazily
    /// on the next [`execute`](Self::execute) call.
    pub fn is_closed(&self) -> bool {
        self.state.read().state == CircuitState::Closed
    }

    /// Current state (for monitoring)
    pub fn current_state(&self) -> CircuitState {
        self.state.read().state
    }

    /// Times the breaker has tripped open
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Calls refused without invoking the operation
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Run a guarded operation
    ///
    /// - Closed: the operation runs; success resets the failure counter,
    ///   a trackable failure counts toward the trip threshold and is
    ///   returned as [`GuardError::Inner`].
    /// - Open: rejected immediately unless the cooldown has elapsed, in
    ///   which case this call becomes the half-open probe.
    /// - Half-open: runs as a probe if a slot is free; probe success
    ///   closes the breaker, probe failure re-opens it and surfaces as
    ///   `Rejected(HalfOpen)`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let admission = self.admit().map_err(GuardError::Rejected)?;

        match op().await {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(err) => match admission {
                Admission::Pass => {
                    self.record_failure(&err);
                    Err(GuardError::Inner(err))
                }
                Admission::Probe => {
                    self.record_probe_failure();
                    Err(GuardError::Rejected(Rejection::HalfOpen))
                }
            },
        }
    }

    /// Decide whether a call may proceed, applying the lazy open→half-open
    /// transition.
    fn admit(&self) -> Result<Admission, Rejection> {
        let mut state = self.state.write();

        match state.state {
            CircuitState::Closed => Ok(Admission::Pass),

            CircuitState::Open => {
                if let Some(tripped_at) = state.tripped_at {
                    if tripped_at.elapsed() >= self.config.cooldown {
                        state.state = CircuitState::HalfOpen;
                        state.probes_in_flight = 1;
                        tracing::info!("breaker cooldown elapsed, probing recovery");
                        return Ok(Admission::Probe);
                    }
                }
                self.rejected_count.fetch_add(1, Ordering::Relaxed);
                Err(Rejection::Open)
            }

            CircuitState::HalfOpen => {
                if state.probes_in_flight < self.config.half_open_max_probes {
                    state.probes_in_flight += 1;
                    Ok(Admission::Probe)
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    Err(Rejection::HalfOpen)
                }
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut state = self.state.write();
        state.failures = 0;
        state.window_start = None;

        if matches!(admission, Admission::Probe) && state.state == CircuitState::HalfOpen {
            state.state = CircuitState::Closed;
            state.probes_in_flight = 0;
            state.tripped_at = None;
            tracing::info!("breaker closed, downstream recovered");
        }
    }

    fn record_failure(&self, err: &StageError) {
        if !err.is_trackable() {
            return;
        }

        let mut state = self.state.write();
        let now = Instant::now();

        // Sliding window: failures older than one window stop counting.
        match state.window_start {
            Some(start) if now.duration_since(start) <= self.config.window => {}
            _ => {
                state.window_start = Some(now);
                state.failures = 0;
            }
        }
        state.failures += 1;

        if state.state == CircuitState::Closed && state.failures >= self.config.trip_threshold {
            state.state = CircuitState::Open;
            state.tripped_at = Some(now);
            self.open_count.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                failures = state.failures,
                "breaker tripped open, refusing new work"
            );
        }
    }

    fn record_probe_failure(&self) {
        let mut state = self.state.write();
        state.state = CircuitState::Open;
        state.tripped_at = Some(Instant::now());
        state.probes_in_flight = 0;
        self.open_count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("breaker re-opened, probe failed");
    }
}
