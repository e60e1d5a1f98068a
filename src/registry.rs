use crate::message::ServerEvent;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};

/// Sending half of a connection's outbound channel. Pushing an event through
/// it never blocks; a send error means the connection task is gone.
pub type ClientHandle = mpsc::UnboundedSender<ServerEvent>;

/// Single source of truth for "is this account currently reachable
/// synchronously".
///
/// Process-local and rebuilt empty on restart: this is a best-effort presence
/// cache, never an oracle for "has ever been online". Constructed once at
/// startup and passed by handle to every consumer.
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<i64, ClientHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or overwrite the entry for an account. Overwrite is intentional:
    /// a second connection from the same account supersedes the first.
    /// Returns whether a previous handle was replaced.
    pub async fn register(&self, account_id: i64, handle: ClientHandle) -> bool {
        self.inner
            .write()
            .await
            .insert(account_id, handle)
            .is_some()
    }

    /// Remove the entry if present; a no-op otherwise.
    pub async fn unregister(&self, account_id: i64) {
        self.inner.write().await.remove(&account_id);
    }

    /// Remove the entry only if it still belongs to the given handle's
    /// channel. Connection teardown uses this so a superseded connection
    /// cannot evict the connection that replaced it.
    pub async fn unregister_stale(&self, account_id: i64, handle: &ClientHandle) {
        let mut map = self.inner.write().await;
        if let Some(current) = map.get(&account_id) {
            if current.same_channel(handle) {
                map.remove(&account_id);
            }
        }
    }

    pub async fn lookup(&self, account_id: i64) -> Option<ClientHandle> {
        self.inner.read().await.get(&account_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ClientHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn lookup_returns_registered_handle() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = handle();

        assert!(!registry.register(7, tx.clone()).await);
        let found = registry.lookup(7).await.expect("entry should exist");
        assert!(found.same_channel(&tx));
        assert_eq!(registry.online_count().await, 1);

        // lookup is a pure read
        assert!(registry.lookup(7).await.is_some());
    }

    #[tokio::test]
    async fn second_registration_supersedes_first() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register(7, first.clone()).await;
        assert!(registry.register(7, second.clone()).await);

        let current = registry.lookup(7).await.unwrap();
        assert!(current.same_channel(&second));
        assert!(!current.same_channel(&first));
        assert_eq!(registry.online_count().await, 1);
    }

    #[tokio::test]
    async fn unregister_missing_account_is_a_noop() {
        let registry = ConnectionRegistry::new();
        registry.unregister(404).await;
        assert_eq!(registry.online_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_removes_presence() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = handle();
        registry.register(7, tx).await;

        registry.unregister(7).await;
        assert!(registry.lookup(7).await.is_none());
    }

    #[tokio::test]
    async fn stale_unregister_leaves_successor_in_place() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = handle();
        let (second, _rx2) = handle();

        registry.register(7, first.clone()).await;
        registry.register(7, second.clone()).await;

        // The first connection's teardown must not evict the second.
        registry.unregister_stale(7, &first).await;
        assert!(registry.lookup(7).await.unwrap().same_channel(&second));

        registry.unregister_stale(7, &second).await;
        assert!(registry.lookup(7).await.is_none());
    }
}
