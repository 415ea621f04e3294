//! Auth collaborator implementations.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::store::AuthProvider;

/// Fixed auth state, settled from construction (or on demand via the
/// deferred constructor). Used in tests and embedded setups where the
/// session is established before the feed starts.
pub struct StaticAuth {
    user_id: Option<String>,
    settled_rx: watch::Receiver<bool>,
    settled_tx: watch::Sender<bool>,
}

impl StaticAuth {
    /// A signed-in user, already settled.
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()), true)
    }

    /// No user, already settled.
    pub fn signed_out() -> Self {
        Self::new(None, true)
    }

    /// A signed-in user whose auth state has not settled yet; call
    /// [`StaticAuth::settle`] to release waiters.
    pub fn pending(user_id: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()), false)
    }

    fn new(user_id: Option<String>, settled: bool) -> Self {
        let (settled_tx, settled_rx) = watch::channel(settled);
        Self {
            user_id,
            settled_rx,
            settled_tx,
        }
    }

    /// Mark the auth state as settled.
    pub fn settle(&self) {
        let _ = self.settled_tx.send(true);
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }

    async fn settled(&self) {
        let mut rx = self.settled_rx.clone();
        // wait_for resolves immediately if already settled
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signed_in_settles_immediately() {
        let auth = StaticAuth::signed_in("u1");
        auth.settled().await;
        assert_eq!(auth.current_user_id().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_pending_settles_on_signal() {
        let auth = std::sync::Arc::new(StaticAuth::pending("u1"));

        let waiter = {
            let auth = std::sync::Arc::clone(&auth);
            tokio::spawn(async move { auth.settled().await })
        };

        auth.settle();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_signed_out_has_no_user() {
        let auth = StaticAuth::signed_out();
        assert_eq!(auth.current_user_id(), None);
    }
}
