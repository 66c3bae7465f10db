//! Cooperative cancellation token.
//!
//! Cloned into every handler's execution request. Handlers observe it at
//! I/O boundaries and between logical steps; tripping it never interrupts
//! a handler mid-instruction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once cancellation is requested.
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }

    /// Run a future, bailing out early when cancellation is requested.
    pub async fn guard<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::select! {
            _ = self.cancelled() => None,
            out = fut => Some(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert!(handle.await.unwrap());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_guard_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let out = token
            .guard(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                1
            })
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_guard_passes_through_when_live() {
        let token = CancelToken::new();
        assert_eq!(token.guard(async { 7 }).await, Some(7));
    }
}
