//! In-flight request tracking for drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct DrainInner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts in-flight requests and wakes waiters when the count reaches zero.
#[derive(Debug, Clone, Default)]
pub struct RequestDrainTracker {
    inner: Arc<DrainInner>,
}

impl RequestDrainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as started. The request ends when the guard drops.
    pub fn begin(&self) -> RequestGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            tracker: self.clone(),
        }
    }

    fn end(&self) {
        let previous = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no request is in flight.
    ///
    /// Returns `false` if `timeout` elapsed first; that is not an error.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.in_flight() == 0,
            }
        }
    }
}

/// RAII marker for one in-flight request.
#[derive(Debug)]
#[must_use = "the request ends as soon as the guard is dropped"]
pub struct RequestGuard {
    tracker: RequestDrainTracker,
}

impl RequestGuard {
    pub fn end(self) {}
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.tracker.end();
    }
}
