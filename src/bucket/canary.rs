//! Disconnect cancellation token.
//!
//! Models spec.md §9's "cyclic callback registration" design note: rather
//! than the writer and the peer connection holding direct references to one
//! another (writer → canary → writer), both sides share a
//! [`DisconnectCanary`] — the transport fires it when the peer goes away,
//! and the writer (or anyone else) can await [`DisconnectCanary::cancelled`]
//! without either side needing to know the other's concrete type.

use std::sync::{atomic::{AtomicBool, Ordering}, Arc};

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct DisconnectCanary {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

impl DisconnectCanary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the transport when the owning peer connection is lost.
    pub fn fire(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::fire`] has been called, including if it was
    /// already called before this was polled.
    pub async fn cancelled(&self) {
        if self.is_fired() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_fired() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_fire() {
        let canary = DisconnectCanary::new();
        let waiter = canary.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        canary.fire();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_fired() {
        let canary = DisconnectCanary::new();
        canary.fire();
        canary.cancelled().await;
    }
}
