use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use log::debug;
use tokio::sync::Semaphore;
use crate::error::LimiterClosed;

/// Admission control for heavyweight jobs.
///
/// At most `max_concurrent` tasks run at once; the rest wait in FIFO order
/// (tokio's semaphore is fair). There is no priority and no timeout: a task
/// that never finishes holds its slot forever.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    waiting: AtomicUsize,
}

impl ConcurrencyLimiter {
    /// A limit of 0 is treated as 1
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of tasks currently holding a slot
    pub fn active(&self) -> usize {
        self.max_concurrent - self.semaphore.available_permits().min(self.max_concurrent)
    }

    /// Number of tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Run `task` once a slot is free.
    ///
    /// The slot is released when the task's future completes, whether it
    /// returned an error or panicked, so siblings are unaffected.
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T, LimiterClosed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let permit = {
            let _waiting = WaitingGuard::enter(&self.waiting);
            self.semaphore.acquire().await
        };
        let _permit = permit.map_err(|_| LimiterClosed)?;

        debug!("Slot acquired ({}/{} active)", self.active(), self.max_concurrent);
        Ok(task().await)
    }

    /// Reject every waiting and future task; running tasks finish normally
    pub fn close(&self) {
        self.semaphore.close();
    }
}

// Keeps `queued()` honest when a waiting caller is dropped before admission
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        WaitingGuard(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
