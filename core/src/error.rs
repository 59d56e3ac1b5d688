//! Error types for Sulku pipeline stages

use std::time::Duration;
use thiserror::Error;

/// Error type for collaborator-facing pipeline operations
///
/// This is the standard error type crossing the relay's seams: connection
/// sources, codecs, the relay buffer, and downstream queues all report
/// failures through it. The categories are coarse on purpose; the engine
/// only needs to distinguish what is retryable, what trips the breaker,
/// and what is terminal.
///
/// # Example
///
/// ```
/// use sulku_core::StageError;
///
/// fn read_frame() -> Result<(), StageError> {
///     Err(StageError::Connection("reset by peer".to_string()))
/// }
///
/// match read_frame() {
///     Ok(()) => {}
///     Err(StageError::Connection(msg)) => eprintln!("connection lost: {msg}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// A buffer push did not acquire a slot within its deadline
    ///
    /// Recoverable. This is the one failure kind the circuit breaker
    /// tracks toward its trip threshold: a chronically full relay buffer
    /// surfaces as a stream of these.
    #[error("buffer push timed out after {0:?}")]
    PushTimeout(Duration),

    /// A raw line could not be decoded into events
    ///
    /// Isolated to the record that produced it; the worker logs it and
    /// moves on to the next record.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A connection-level failure (accept or read)
    ///
    /// Examples: reset by peer, truncated frame, source closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The downstream queue refused or lost an event
    #[error("downstream queue error: {0}")]
    Queue(String),

    /// Graceful shutdown failed
    ///
    /// Examples: downstream flush failed, drain deadline exceeded.
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

impl StageError {
    /// Whether this failure counts toward the circuit breaker's trip
    /// threshold.
    ///
    /// Only push timeouts are trackable: they are the signal that the
    /// downstream is saturated. Decode and connection errors say nothing
    /// about downstream health and must not trip the breaker.
    pub fn is_trackable(&self) -> bool {
        matches!(self, StageError::PushTimeout(_))
    }
}
