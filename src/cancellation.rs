//! A single cancellation signal shared across all workers (§5).
//!
//! Deliberately minimal: an `Arc<AtomicBool>` plus a `Notify` so awaiting workers wake
//! promptly instead of polling. Not a new dependency — `tokio::sync::Notify` is already part
//! of the `tokio` feature set this crate depends on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Clone, Default)]
pub struct CancellationSignal(Arc<Inner>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called. Used with `tokio::select!` to abort
    /// in-flight work promptly rather than polling `is_cancelled`.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let signal = CancellationSignal::new();
        assert!(!signal.is_cancelled());
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        signal.cancel();
        handle.await.unwrap();
        assert!(signal.is_cancelled());
    }
}
