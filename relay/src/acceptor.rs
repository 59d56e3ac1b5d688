//! Acceptor loop and connection workers
//!
//! The acceptor is the pipeline's intake valve. While the breaker is
//! closed it accepts connections and hands each one to the worker pool;
//! while the breaker is open it stops accepting entirely and naps, so
//! saturation is pushed back to the clients as connection refusal rather
//! than absorbed as queue depth.
//!
//! Each worker owns one connection: read a record, decode it, decorate
//! the events, and run every buffer push through the breaker. An event
//! that cannot be buffered in time is dropped and counted; the
//! connection lives on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sulku_core::StageError;
use tokio_util::sync::CancellationToken;

use crate::breaker::{CircuitBreaker, GuardError};
use crate::buffer::RelayBuffer;
use crate::codec::{Codec, Decorator};
use crate::pool::WorkerPool;
use crate::source::{Connection, ConnectionSource};

/// Counters for acceptor and worker monitoring
#[derive(Debug, Default)]
pub struct AcceptorMetrics {
    /// Connections accepted since start
    pub connections_total: AtomicU64,
    /// Connections currently being served
    pub connections_active: AtomicU64,
    /// Accept rounds skipped because the breaker was not closed
    pub refusals: AtomicU64,
    /// Events successfully decoded
    pub events_decoded: AtomicU64,
    /// Events dropped at the buffer hand-off
    pub events_dropped: AtomicU64,
}

/// Point-in-time view of [`AcceptorMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptorSnapshot {
    /// Connections accepted since start
    pub connections_total: u64,
    /// Connections currently being served
    pub connections_active: u64,
    /// Accept rounds skipped because the breaker was not closed
    pub refusals: u64,
    /// Events successfully decoded
    pub events_decoded: u64,
    /// Events dropped at the buffer hand-off
    pub events_dropped: u64,
}

impl AcceptorMetrics {
    /// Counter snapshot
    pub fn snapshot(&self) -> AcceptorSnapshot {
        AcceptorSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            refusals: self.refusals.load(Ordering::Relaxed),
            events_decoded: self.events_decoded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Everything a connection worker needs, shared across all workers
struct WorkerContext {
    buffer: Arc<RelayBuffer>,
    breaker: Arc<CircuitBreaker>,
    codec: Arc<dyn Codec>,
    decorator: Arc<dyn Decorator>,
    metrics: Arc<AcceptorMetrics>,
    push_timeout: Duration,
}

/// Breaker-gated accept loop
pub struct Acceptor<S: ConnectionSource> {
    source: S,
    pool: Arc<WorkerPool>,
    context: Arc<WorkerContext>,
    accept_backoff: Duration,
}

impl<S: ConnectionSource> Acceptor<S> {
    /// Wire an acceptor over its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        pool: Arc<WorkerPool>,
        buffer: Arc<RelayBuffer>,
        breaker: Arc<CircuitBreaker>,
        codec: Arc<dyn Codec>,
        decorator: Arc<dyn Decorator>,
        metrics: Arc<AcceptorMetrics>,
        push_timeout: Duration,
        accept_backoff: Duration,
    ) -> Self {
        Self {
            source,
            pool,
            context: Arc::new(WorkerContext {
                buffer,
                breaker,
                codec,
                decorator,
                metrics,
                push_timeout,
            }),
            accept_backoff,
        }
    }

    /// Run the accept loop until cancelled
    ///
    /// Returns an error only when the source itself fails; the caller
    /// treats that as a shutdown trigger. Workers spawned here outlive
    /// the loop and are collected by the pool's drain.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), StageError> {
        loop {
            if !self.context.breaker.is_closed() {
                self.context.metrics.refusals.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    backoff_ms = self.accept_backoff.as_millis() as u64,
                    "breaker not closed, refusing connections"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.accept_backoff) => continue,
                    _ = cancel.cancelled() => return Ok(()),
                }
            }

            let conn = tokio::select! {
                result = self.source.accept() => match result {
                    Ok(conn) => conn,
                    Err(err) => {
                        tracing::error!(error = %err, "accept failed, shutting down intake");
                        return Err(err);
                    }
                },
                _ = cancel.cancelled() => return Ok(()),
            };

            self.context
                .metrics
                .connections_total
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(conn = conn.id(), "connection accepted");

            let context = Arc::clone(&self.context);
            let child = cancel.child_token();
            self.pool
                .submit(async move { serve_connection(conn, context, child).await });
        }
    }
}

/// Worker body: drain one connection into the buffer
async fn serve_connection<C: Connection>(
    mut conn: C,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    context
        .metrics
        .connections_active
        .fetch_add(1, Ordering::Relaxed);

    loop {
        let record = tokio::select! {
            result = conn.next_record() => match result {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(conn = conn.id(), error = %err, "connection failed");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        };

        let mut events = match context.codec.decode(conn.id(), &record.line) {
            Ok(events) => events,
            Err(err) => {
                // One bad line never takes the connection down.
                tracing::debug!(conn = conn.id(), error = %err, "decode failed, line skipped");
                continue;
            }
        };
        context
            .metrics
            .events_decoded
            .fetch_add(events.len() as u64, Ordering::Relaxed);

        for event in &mut events {
            context.decorator.decorate(event);
            event.merge_extra_fields(&record.fields);
            event.metadata.insert(
                sulku_core::metadata_keys::CONNECTION.to_string(),
                conn.id().to_string(),
            );
            event.metadata.insert(
                sulku_core::metadata_keys::DECODER.to_string(),
                context.codec.name().to_string(),
            );
        }

        for event in events {
            let result = context
                .breaker
                .execute(|| context.buffer.push(event, context.push_timeout))
                .await;

            if let Err(err) = result {
                context
                    .metrics
                    .events_dropped
                    .fetch_add(1, Ordering::Relaxed);
                match err {
                    GuardError::Rejected(rejection) => {
                        tracing::debug!(conn = conn.id(), ?rejection, "event dropped, breaker refused");
                    }
                    GuardError::Inner(inner) => {
                        tracing::debug!(conn = conn.id(), error = %inner, "event dropped, buffer saturated");
                    }
                }
            }
        }
    }

    context
        .metrics
        .connections_active
        .fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(conn = conn.id(), "connection closed");
}
