//! Cooperative cancellation
//!
//! Sessions and I/O loops observe cancellation through a shared token.
//! Cancelling is idempotent and wakes every task currently awaiting the
//! token.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation handle. All clones share one flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::AcqRel) {
            self.state.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Completes when the token is cancelled. Completes immediately if it
    /// already was.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            // Register interest before re-checking the flag so a cancel
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
