//! Cooperative shutdown signal shared by worker and consumer loops.
//!
//! Loops check the signal between units of work; an in-flight pop, read, or
//! job is always allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every loop holding a clone of this signal to stop.
    pub fn trigger(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Resolves once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for `duration`, returning early on shutdown.
    pub async fn sleep(&self, duration: std::time::Duration) {
        tokio::select! {
            _ = self.wait() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}
