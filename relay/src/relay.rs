//! Relay task: the single consumer draining the buffer downstream
//!
//! One task loops `pop` → `downstream.push`. The downstream queue is
//! unbounded, so the push never blocks; backpressure lives entirely in
//! the buffer behind the relay, not in front of it.

use async_trait::async_trait;
use std::sync::Arc;
use sulku_core::{Event, StageError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::RelayBuffer;

/// Destination the relay feeds
///
/// Pushes must not block: implementations buffer internally (unbounded)
/// and flush on their own schedule. `shutdown` is called exactly once,
/// after the relay has drained, so the destination can flush and close.
#[async_trait]
pub trait DownstreamQueue: Send + Sync + 'static {
    /// Enqueue one event
    async fn push(&self, event: Event) -> Result<(), StageError>;

    /// Flush and release resources; no pushes follow
    async fn shutdown(&self) -> Result<(), StageError>;
}

/// Downstream backed by an unbounded mpsc channel
///
/// The simplest useful destination: events come out the paired receiver
/// in relay order. Used by the integration tests and by embedders that
/// consume events in-process.
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelQueue {
    /// Create a queue and the receiver its events come out of
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl DownstreamQueue for ChannelQueue {
    async fn push(&self, event: Event) -> Result<(), StageError> {
        self.tx
            .send(event)
            .map_err(|_| StageError::Queue("downstream receiver dropped".to_string()))
    }

    async fn shutdown(&self) -> Result<(), StageError> {
        // Dropping the last sender closes the receiver; nothing to flush.
        Ok(())
    }
}

/// The relay task body
///
/// Runs until `cancel` fires, then drains whatever is still buffered and
/// shuts the downstream. A downstream push error ends the relay early;
/// the downstream is still shut down on that path.
pub struct Relay<Q: DownstreamQueue> {
    buffer: Arc<RelayBuffer>,
    downstream: Arc<Q>,
}

impl<Q: DownstreamQueue> Relay<Q> {
    /// Create a relay over the given buffer and destination
    pub fn new(buffer: Arc<RelayBuffer>, downstream: Arc<Q>) -> Self {
        Self { buffer, downstream }
    }

    /// Run the drain loop until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<(), StageError> {
        let result = self.drain_until_cancelled(&cancel).await;

        if let Err(shutdown_err) = self.downstream.shutdown().await {
            tracing::error!(error = %shutdown_err, "downstream shutdown failed");
            return result.and(Err(shutdown_err));
        }
        result
    }

    async fn drain_until_cancelled(&self, cancel: &CancellationToken) -> Result<(), StageError> {
        loop {
            let event = tokio::select! {
                event = self.buffer.pop() => event,
                _ = cancel.cancelled() => break,
            };
            self.downstream.push(event).await?;
        }

        // Workers have stopped pushing by the time we are cancelled;
        // whatever is left is finite.
        let mut drained = 0u64;
        while let Some(event) = self.buffer.try_pop() {
            self.downstream.push(event).await?;
            drained += 1;
        }
        if drained > 0 {
            tracing::debug!(drained, "relay drained buffered events on shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn make_event(n: usize) -> Event {
        Event::new("test").with_field("seq", n.to_string())
    }

    fn seq(event: &Event) -> usize {
        event.fields.get("seq").unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn forwards_events_in_buffer_order() {
        let buffer = Arc::new(RelayBuffer::new(8));
        let (queue, mut rx) = ChannelQueue::new();
        let cancel = CancellationToken::new();

        let relay = Relay::new(Arc::clone(&buffer), Arc::new(queue));
        let handle = tokio::spawn(relay.run(cancel.clone()));

        for i in 0..5 {
            buffer.push(make_event(i), Duration::ZERO).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(seq(&rx.recv().await.unwrap()), i);
        }

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drains_backlog_after_cancel() {
        let buffer = Arc::new(RelayBuffer::new(8));
        for i in 0..4 {
            buffer.push(make_event(i), Duration::ZERO).await.unwrap();
        }

        let (queue, mut rx) = ChannelQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        Relay::new(Arc::clone(&buffer), Arc::new(queue))
            .run(cancel)
            .await
            .unwrap();

        for i in 0..4 {
            assert_eq!(seq(&rx.recv().await.unwrap()), i);
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn downstream_shutdown_runs_even_on_push_error() {
        struct FailingQueue {
            shut: AtomicBool,
        }

        #[async_trait]
        impl DownstreamQueue for FailingQueue {
            async fn push(&self, _event: Event) -> Result<(), StageError> {
                Err(StageError::Queue("full disk".to_string()))
            }
            async fn shutdown(&self) -> Result<(), StageError> {
                self.shut.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        let buffer = Arc::new(RelayBuffer::new(1));
        buffer.push(make_event(0), Duration::ZERO).await.unwrap();

        let queue = Arc::new(FailingQueue {
            shut: AtomicBool::new(false),
        });
        let result = Relay::new(buffer, Arc::clone(&queue))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(StageError::Queue(_))));
        assert!(queue.shut.load(Ordering::SeqCst));
    }
}
