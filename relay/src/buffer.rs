//! Bounded hand-off buffer between connection workers and the relay task
//!
//! Unlike a drop-on-full ring, this buffer makes producers *wait*: a push
//! blocks until a slot frees or its timeout elapses. The default capacity
//! is one slot, so a slow downstream is felt by producers after a single
//! in-flight event instead of after a deep queue has absorbed the burst.
//!
//! Many workers push concurrently; exactly one relay task pops.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use sulku_core::{Event, StageError};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Counters for buffer monitoring
#[derive(Debug, Default)]
pub struct BufferMetrics {
    /// Events successfully pushed
    pub pushed: AtomicU64,
    /// Pushes that gave up on timeout
    pub timed_out: AtomicU64,
    /// Events handed to the relay
    pub popped: AtomicU64,
}

/// Point-in-time view of [`BufferMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSnapshot {
    /// Events successfully pushed
    pub pushed: u64,
    /// Pushes that gave up on timeout
    pub timed_out: u64,
    /// Events handed to the relay
    pub popped: u64,
}

/// Bounded FIFO with push-timeout and blocking pop
///
/// Invariant: `len() <= capacity()` at every instant. A push that times
/// out leaves the queue untouched; the event is returned to the caller's
/// ownership only in the sense that it is dropped - the relay core is
/// at-most-once under backpressure.
pub struct RelayBuffer {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    not_full: Notify,
    not_empty: Notify,
    metrics: BufferMetrics,
}

impl RelayBuffer {
    /// Create a buffer with the given capacity (at least 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            metrics: BufferMetrics::default(),
        }
    }

    /// Push an event, waiting up to `timeout` for a free slot
    ///
    /// Returns `StageError::PushTimeout` if no slot freed in time; the
    /// buffer is unchanged in that case. A zero timeout is an immediate
    /// try.
    pub async fn push(&self, event: Event, timeout: Duration) -> Result<(), StageError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for the wakeup *before* checking, so a pop that
            // lands between the check and the await is not lost.
            let notified = self.not_full.notified();
            {
                let mut queue = self.queue.lock();
                if queue.len() < self.capacity {
                    queue.push_back(event);
                    drop(queue);
                    self.metrics.pushed.fetch_add(1, Ordering::Relaxed);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // We may have consumed a wakeup meant for another pusher;
                // forward it so nobody is stranded on a free slot.
                self.not_full.notify_one();
                self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                return Err(StageError::PushTimeout(timeout));
            }
        }
    }

    /// Pop the oldest event, waiting indefinitely
    ///
    /// Single-consumer: only the relay task calls this.
    pub async fn pop(&self) -> Event {
        loop {
            let notified = self.not_empty.notified();
            if let Some(event) = self.take_front() {
                return event;
            }
            notified.await;
        }
    }

    /// Non-blocking pop, used by the relay's shutdown drain
    pub fn try_pop(&self) -> Option<Event> {
        self.take_front()
    }

    fn take_front(&self) -> Option<Event> {
        let event = self.queue.lock().pop_front();
        if event.is_some() {
            self.metrics.popped.fetch_add(1, Ordering::Relaxed);
            self.not_full.notify_one();
        }
        event
    }

    /// Current number of buffered events
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter snapshot
    pub fn snapshot(&self) -> BufferSnapshot {
        BufferSnapshot {
            pushed: self.metrics.pushed.load(Ordering::Relaxed),
            timed_out: self.metrics.timed_out.load(Ordering::Relaxed),
            popped: self.metrics.popped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn make_event(n: usize) -> Event {
        Event::new("test").with_field("seq", n.to_string())
    }

    fn seq(event: &Event) -> usize {
        event.fields.get("seq").unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let buffer = RelayBuffer::new(4);

        for i in 0..4 {
            buffer.push(make_event(i), Duration::ZERO).await.unwrap();
        }

        for i in 0..4 {
            assert_eq!(seq(&buffer.pop().await), i);
        }
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn push_to_full_buffer_times_out_without_enqueueing() {
        let buffer = RelayBuffer::new(1);
        buffer.push(make_event(0), Duration::ZERO).await.unwrap();

        let result = buffer
            .push(make_event(1), Duration::from_millis(10))
            .await;

        assert!(matches!(result, Err(StageError::PushTimeout(_))));
        assert_eq!(buffer.len(), 1);
        assert_eq!(seq(&buffer.pop().await), 0);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn zero_timeout_push_on_full_buffer_fails_immediately() {
        let buffer = RelayBuffer::new(1);
        buffer.push(make_event(0), Duration::ZERO).await.unwrap();

        // The capacity=1 A/B scenario: A in, B refused at once.
        let result = buffer.push(make_event(1), Duration::ZERO).await;
        assert!(matches!(result, Err(StageError::PushTimeout(_))));

        assert_eq!(seq(&buffer.pop().await), 0);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn blocked_push_completes_when_slot_frees() {
        let buffer = Arc::new(RelayBuffer::new(1));
        buffer.push(make_event(0), Duration::ZERO).await.unwrap();

        let pusher = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                buffer.push(make_event(1), Duration::from_secs(5)).await
            })
        };

        // Give the pusher time to block on the full buffer.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seq(&buffer.pop().await), 0);

        pusher.await.unwrap().unwrap();
        assert_eq!(seq(&buffer.pop().await), 1);
    }

    #[tokio::test]
    async fn pop_waits_for_a_push() {
        let buffer = Arc::new(RelayBuffer::new(1));

        let popper = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        buffer.push(make_event(7), Duration::ZERO).await.unwrap();

        assert_eq!(seq(&popper.await.unwrap()), 7);
    }

    #[tokio::test]
    async fn concurrent_pushers_all_eventually_succeed() {
        let buffer = Arc::new(RelayBuffer::new(1));
        let mut handles = Vec::new();

        for i in 0..16 {
            let buffer = Arc::clone(&buffer);
            handles.push(tokio::spawn(async move {
                buffer.push(make_event(i), Duration::from_secs(5)).await
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..16 {
            seen.push(seq(&buffer.pop().await));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        assert_eq!(buffer.snapshot().pushed, 16);
        assert_eq!(buffer.snapshot().popped, 16);
    }

    #[tokio::test]
    async fn metrics_count_timeouts() {
        let buffer = RelayBuffer::new(1);
        buffer.push(make_event(0), Duration::ZERO).await.unwrap();
        let _ = buffer.push(make_event(1), Duration::ZERO).await;
        let _ = buffer.push(make_event(2), Duration::ZERO).await;

        let snap = buffer.snapshot();
        assert_eq!(snap.pushed, 1);
        assert_eq!(snap.timed_out, 2);
    }

    #[tokio::test]
    async fn try_pop_is_non_blocking() {
        let buffer = RelayBuffer::new(2);
        assert!(buffer.try_pop().is_none());

        buffer.push(make_event(3), Duration::ZERO).await.unwrap();
        assert_eq!(seq(&buffer.try_pop().unwrap()), 3);
        assert!(buffer.try_pop().is_none());
    }
}
