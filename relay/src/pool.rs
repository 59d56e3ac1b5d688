//! Worker dispatch pool for per-connection work units
//!
//! Fire-and-forget: `submit` schedules a unit and returns immediately.
//! There is deliberately no upper bound on concurrent units - concurrency
//! is limited indirectly, by the breaker refusing new connections and by
//! the single-slot buffer making each worker wait its turn. A unit that
//! panics terminates only itself.

use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Elastic pool of per-connection work units
///
/// Thin wrapper over a [`TaskTracker`]: tasks run on the tokio runtime
/// (idle execution slots are the runtime's to reclaim), the tracker only
/// exists so shutdown can wait for in-flight units to drain.
pub struct WorkerPool {
    tracker: TaskTracker,
    drain_grace: Duration,
}

impl WorkerPool {
    /// Create a pool with the given drain grace period
    pub fn new(drain_grace: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            drain_grace,
        }
    }

    /// Schedule a work unit; returns immediately
    ///
    /// No-op if the pool is already draining.
    pub fn submit<F>(&self, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            tracing::debug!("pool draining, work unit refused");
            return;
        }
        self.tracker.spawn(unit);
    }

    /// Number of currently running work units
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting units and wait for in-flight ones to finish
    ///
    /// Returns `false` if the grace period expired with units still
    /// running; those units keep the runtime alive until they finish on
    /// their own (they are cancelled through the shutdown token, not
    /// aborted).
    pub async fn drain(&self) -> bool {
        self.tracker.close();
        match tokio::time::timeout(self.drain_grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    "drain grace expired with workers still running"
                );
                false
            }
        }
    }
}
