//! Bounded pool for background reconciliation tasks.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

pub const DEFAULT_WORKERS: usize = 16;

#[derive(Debug)]
struct PoolState {
    in_flight: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

/// Decrements the in-flight count when the task finishes or panics.
struct InFlight(Arc<PoolState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    state: Arc<PoolState>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            state: Arc::new(PoolState {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `task`. At most `workers` tasks run at once; the rest wait for a
    /// permit. Returns `false` once the pool is shutting down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.state.closed.load(Ordering::Acquire) {
            warn!("worker pool is shutting down, task dropped");
            return false;
        }

        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(self.state.clone());
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            task.await;
        });
        true
    }

    /// Tasks submitted and not yet finished, queued ones included.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work and wait up to `timeout` for in-flight tasks.
    /// Returns whether the pool drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.state.closed.store(true, Ordering::Release);
        let drained = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.state.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok();

        if drained {
            debug!("worker pool drained");
        } else {
            warn!(in_flight = self.in_flight(), "worker pool shutdown timed out");
        }
        drained
    }
}
