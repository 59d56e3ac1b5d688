//! Pipeline wiring and lifecycle
//!
//! [`Pipeline`] is the builder: give it a source, a downstream, and
//! optionally a codec and decorator, then [`build`](Pipeline::build) it
//! into a [`PipelineRunner`]. The runner owns the ordered shutdown:
//! intake stops first, workers drain, and only then does the relay flush
//! the buffer and close the downstream.

use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::acceptor::{Acceptor, AcceptorMetrics};
use crate::breaker::CircuitBreaker;
use crate::buffer::RelayBuffer;
use crate::codec::{Codec, Decorator, PipelineDecorator, PlainCodec};
use crate::config::{Config, LogFormat};
use crate::error::RelayError;
use crate::pool::WorkerPool;
use crate::relay::{DownstreamQueue, Relay};
use crate::source::ConnectionSource;
use tokio_util::sync::CancellationToken;

/// Pipeline builder
///
/// ```ignore
/// let (source, handle) = ChannelSource::new();
/// let (queue, events) = ChannelQueue::new();
/// let runner = Pipeline::new(Config::from_env()?)
///     .source(source)
///     .downstream(queue)
///     .build()?;
/// runner.run(CancellationToken::new()).await?;
/// ```
pub struct Pipeline<S, Q> {
    config: Config,
    source: Option<S>,
    downstream: Option<Q>,
    codec: Option<Arc<dyn Codec>>,
    decorator: Option<Arc<dyn Decorator>>,
}

impl<S: ConnectionSource, Q: DownstreamQueue> Pipeline<S, Q> {
    /// Start a pipeline from configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            source: None,
            downstream: None,
            codec: None,
            decorator: None,
        }
    }

    /// Set the connection source (required)
    pub fn source(mut self, source: S) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the downstream queue (required)
    pub fn downstream(mut self, downstream: Q) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// Override the codec (default: [`PlainCodec`])
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Override the decorator (default: [`PipelineDecorator`] with the
    /// configured pipeline name)
    pub fn decorator(mut self, decorator: impl Decorator + 'static) -> Self {
        self.decorator = Some(Arc::new(decorator));
        self
    }

    /// Validate and assemble the runner
    ///
    /// # Errors
    /// `RelayError::Incomplete` if source or downstream is missing,
    /// `RelayError::Config` if the configuration fails validation.
    pub fn build(self) -> Result<PipelineRunner<S, Q>, RelayError> {
        self.config.validate()?;

        let source = self.source.ok_or(RelayError::Incomplete("source"))?;
        let downstream = self.downstream.ok_or(RelayError::Incomplete("downstream"))?;
        let codec = self.codec.unwrap_or_else(|| Arc::new(PlainCodec::new()));
        let decorator = self
            .decorator
            .unwrap_or_else(|| Arc::new(PipelineDecorator::new(self.config.pipeline.clone())));

        Ok(PipelineRunner {
            buffer: Arc::new(RelayBuffer::new(self.config.buffer_capacity)),
            breaker: Arc::new(CircuitBreaker::new(self.config.breaker())),
            metrics: Arc::new(AcceptorMetrics::default()),
            pool: Arc::new(WorkerPool::new(self.config.worker_drain)),
            config: self.config,
            source,
            downstream: Arc::new(downstream),
            codec,
            decorator,
        })
    }
}

/// Assembled pipeline, ready to run
pub struct PipelineRunner<S, Q> {
    config: Config,
    source: S,
    downstream: Arc<Q>,
    codec: Arc<dyn Codec>,
    decorator: Arc<dyn Decorator>,
    buffer: Arc<RelayBuffer>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<AcceptorMetrics>,
    pool: Arc<WorkerPool>,
}

impl<S: ConnectionSource, Q: DownstreamQueue> PipelineRunner<S, Q> {
    /// The breaker, for monitoring
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    /// The buffer, for monitoring
    pub fn buffer(&self) -> Arc<RelayBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Acceptor and worker counters, for monitoring
    pub fn metrics(&self) -> Arc<AcceptorMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the pipeline until `cancel` fires or the source fails
    ///
    /// Shutdown order: the acceptor stops taking connections, in-flight
    /// workers get the drain grace to finish, then the relay flushes the
    /// buffer and closes the downstream. The downstream is shut down on
    /// every exit path.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), RelayError> {
        tracing::info!(
            pipeline = %self.config.pipeline,
            buffer_capacity = self.config.buffer_capacity,
            push_timeout_ms = self.config.push_timeout.as_millis() as u64,
            "pipeline starting"
        );

        let relay_cancel = CancellationToken::new();
        let relay = Relay::new(Arc::clone(&self.buffer), Arc::clone(&self.downstream));
        let relay_handle = tokio::spawn(relay.run(relay_cancel.clone()));

        let acceptor = Acceptor::new(
            self.source,
            Arc::clone(&self.pool),
            Arc::clone(&self.buffer),
            Arc::clone(&self.breaker),
            self.codec,
            self.decorator,
            Arc::clone(&self.metrics),
            self.config.push_timeout,
            self.config.accept_backoff,
        );
        let accept_result = acceptor.run(cancel).await;
        if let Err(err) = &accept_result {
            tracing::error!(error = %err, "intake stopped on source failure");
        }

        // Workers first, so nothing pushes while the relay drains.
        if !self.pool.drain().await {
            tracing::warn!("some workers did not finish within the drain grace");
        }
        relay_cancel.cancel();
        let relay_result = match relay_handle.await {
            Ok(result) => result.map_err(RelayError::from),
            Err(join_err) => Err(RelayError::Config(format!("relay task failed: {join_err}"))),
        };

        let snap = self.metrics.snapshot();
        tracing::info!(
            connections = snap.connections_total,
            decoded = snap.events_decoded,
            dropped = snap.events_dropped,
            breaker_opens = self.breaker.open_count(),
            "pipeline stopped"
        );

        accept_result.map_err(RelayError::from).and(relay_result)
    }

    /// Run until SIGINT/SIGTERM
    pub async fn run_until_signal(self) -> Result<(), RelayError> {
        let cancel = CancellationToken::new();
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_cancel.cancel();
        });
        self.run(cancel).await
    }
}

/// Initialise the tracing subscriber from config
///
/// Call once at startup; `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::relay::ChannelQueue;
    use crate::source::ChannelSource;

    #[test]
    fn build_requires_source_and_downstream() {
        let (_, _handle) = ChannelSource::new();
        let (queue, _rx) = ChannelQueue::new();

        let result = Pipeline::<ChannelSource, ChannelQueue>::new(Config::default())
            .downstream(queue)
            .build();
        assert!(matches!(result, Err(RelayError::Incomplete("source"))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let (source, _handle) = ChannelSource::new();
        let (queue, _rx) = ChannelQueue::new();

        let config = Config {
            buffer_capacity: 0,
            ..Default::default()
        };
        let result = Pipeline::new(config)
            .source(source)
            .downstream(queue)
            .build();
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}
