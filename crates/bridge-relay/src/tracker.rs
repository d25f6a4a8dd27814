//! Live session accounting for the shutdown drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Counts running relay sessions.
#[derive(Clone, Debug)]
pub struct SessionTracker {
    active: Arc<AtomicUsize>,
    zero_notify: Arc<Notify>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            zero_notify: Arc::new(Notify::new()),
        }
    }

    /// Register a session; the count drops again when the guard is dropped.
    pub fn track(&self) -> SessionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            tracker: self.clone(),
        }
    }

    fn release(&self) {
        // AcqRel: Acquire to see previous increments, Release to make the decrement visible
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero_notify.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no session is running. Returns `false` if `timeout` elapsed first.
    pub async fn wait_for_zero(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                // Register interest before checking, so a release in between is not missed.
                let notified = self.zero_notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one session counted while alive.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: SessionTracker,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
