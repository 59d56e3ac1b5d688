//! SULKU - backpressure-first event relay
//!
//! A small intake engine for line-oriented event streams:
//!
//! ```text
//! Source ──► Acceptor ──► Workers ──► Buffer ──► Relay ──► Downstream
//!                 ▲                     │
//!                 └──── breaker ────────┘
//! ```
//!
//! The buffer holds one event by default and producers *wait* for a
//! slot; a circuit breaker watches push timeouts and, once tripped,
//! makes the acceptor refuse connections outright. Saturation surfaces
//! to clients immediately instead of hiding in a deep queue.
//!
//! Sources, codecs, and downstream queues are pluggable via traits.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

pub mod acceptor;
pub mod breaker;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod relay;
pub mod source;

pub use acceptor::{Acceptor, AcceptorMetrics, AcceptorSnapshot};
pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, GuardError, Rejection};
pub use buffer::{BufferSnapshot, RelayBuffer};
pub use codec::{Codec, Decorator, JsonCodec, PipelineDecorator, PlainCodec};
pub use config::{Config, LogFormat};
pub use error::RelayError;
pub use pipeline::{init_tracing, shutdown_signal, Pipeline, PipelineRunner};
pub use pool::WorkerPool;
pub use relay::{ChannelQueue, DownstreamQueue, Relay};
pub use source::{ChannelSource, ChannelSourceHandle, Connection, ConnectionSource};

pub use sulku_core::{Event, EventId, Record, StageError};
