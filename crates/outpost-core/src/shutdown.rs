// SPDX-License-Identifier: MIT OR Apache-2.0
//! The process-wide shutdown broadcast.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable token used to broadcast shutdown to every task.
///
/// The orchestrator owns the only trigger path; subsystems receive a
/// clone and observe it at their next suspension point. All clones share
/// state: triggering one makes every clone observe
/// `is_triggered() == true` immediately.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    /// Create a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                triggered: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Broadcast shutdown. Idempotent.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether shutdown has been broadcast.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Completes when shutdown is broadcast; resolves immediately if it
    /// already was.
    pub async fn triggered(&self) {
        if self.is_triggered() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_triggered() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_untriggered() {
        assert!(!ShutdownSignal::new().is_triggered());
    }

    #[test]
    fn clones_share_state() {
        let a = ShutdownSignal::new();
        let b = a.clone();
        a.trigger();
        assert!(b.is_triggered());
    }

    #[test]
    fn trigger_is_idempotent() {
        let s = ShutdownSignal::new();
        s.trigger();
        s.trigger();
        assert!(s.is_triggered());
    }

    #[tokio::test]
    async fn triggered_future_resolves() {
        let s = ShutdownSignal::new();
        let waiter = s.clone();
        let handle = tokio::spawn(async move { waiter.triggered().await });
        tokio::task::yield_now().await;
        s.trigger();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn triggered_future_resolves_immediately_when_already_triggered() {
        let s = ShutdownSignal::new();
        s.trigger();
        s.triggered().await;
    }
}
