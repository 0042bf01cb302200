//! Cooperative cancellation hook (SPEC_FULL §"Supplemented features" item 2).
//!
//! The original's `symphonia/core/runner.py` turns a SIGTERM into the same
//! cancellation path as an internal node failure, writing partial
//! metrics/timeline before exiting. Wiring an OS signal to this token is an
//! embedder's job (the CLI is out of scope per §1); the token itself is
//! public so `run_plan` can honor it at every suspension point named in §5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cheap, clonable stop signal. `cancel()` is idempotent; `cancelled()`
/// resolves immediately if already cancelled, otherwise when the next
/// `cancel()` call fires.
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationToken {
    /// A fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call more than once or from multiple
    /// clones.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether `cancel()` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once cancelled, now or in the future.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
