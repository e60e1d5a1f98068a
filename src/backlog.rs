use crate::error::AppResult;
use crate::message::{ServerEvent, UnreadMarker};
use crate::registry::ClientHandle;
use crate::store::ChatStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Answers "what is pending for account X" and clears it once acknowledged.
///
/// The primitives are on-demand; connect-time draining is a policy layered on
/// top of them (`deliver_pending`), not baked into the registry's connect
/// handling.
pub struct BacklogReconciler {
    store: Arc<dyn ChatStore>,
}

impl BacklogReconciler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Pending markers, oldest message first.
    pub async fn list_unread(&self, account_id: i64) -> AppResult<Vec<UnreadMarker>> {
        Ok(self.store.list_unread(account_id).await?)
    }

    /// Clear the backlog from one peer. Scoping by peer means reading one
    /// conversation does not erase unread state for a different peer.
    pub async fn clear_unread(&self, account_id: i64, peer_id: i64) -> AppResult<u64> {
        let deleted = self.store.clear_unread(account_id, peer_id).await?;
        if deleted > 0 {
            tracing::debug!(account_id, peer_id, deleted, "Cleared unread markers");
        }
        Ok(deleted)
    }

    /// Connect-time reconciliation: push the full unread messages into a
    /// freshly registered connection, oldest first, then clear the markers of
    /// every peer whose messages went out. Peers whose messages could not be
    /// handed over keep their markers.
    pub async fn deliver_pending(
        &self,
        account_id: i64,
        handle: &ClientHandle,
    ) -> AppResult<usize> {
        let messages = self.store.list_unread_messages(account_id).await?;
        if messages.is_empty() {
            return Ok(0);
        }

        let total = messages.len();
        let mut delivered = 0;
        let mut failed = 0;
        let mut drained_peers: BTreeSet<i64> = BTreeSet::new();

        for message in messages {
            match handle.send(ServerEvent::Message(message.clone())) {
                Ok(()) => {
                    delivered += 1;
                    drained_peers.insert(message.message.sender_id);
                }
                Err(_) => {
                    failed += 1;
                }
            }
        }

        for peer_id in drained_peers {
            self.clear_unread(account_id, peer_id).await?;
        }

        tracing::info!(
            account_id,
            total,
            delivered,
            failed,
            "Backlog delivery completed"
        );

        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryChatStore;
    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<MemoryChatStore>,
        reconciler: BacklogReconciler,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryChatStore::new());
        store.add_account(1, "alice").await;
        store.add_account(2, "bob").await;
        store.add_account(3, "carol").await;
        Fixture {
            reconciler: BacklogReconciler::new(store.clone()),
            store,
        }
    }

    async fn queue_message(f: &Fixture, sender_id: i64, body: &str, minutes_ago: i64) -> i64 {
        let message = f
            .store
            .insert_message(
                sender_id,
                2,
                body,
                Utc::now() - Duration::minutes(minutes_ago),
            )
            .await
            .unwrap();
        f.store
            .enqueue_unread(&UnreadMarker {
                message_id: message.id,
                sender_id,
                recipient_id: 2,
            })
            .await
            .unwrap();
        message.id
    }

    #[tokio::test]
    async fn listing_is_oldest_first() {
        let f = fixture().await;
        let newer = queue_message(&f, 1, "newer", 1).await;
        let older = queue_message(&f, 3, "older", 10).await;

        let markers = f.reconciler.list_unread(2).await.unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].message_id, older);
        assert_eq!(markers[1].message_id, newer);
    }

    #[tokio::test]
    async fn double_clear_is_idempotent() {
        let f = fixture().await;
        queue_message(&f, 1, "a", 2).await;
        queue_message(&f, 1, "b", 1).await;

        assert_eq!(f.reconciler.clear_unread(2, 1).await.unwrap(), 2);
        assert_eq!(f.reconciler.clear_unread(2, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clearing_unknown_peer_is_a_noop() {
        let f = fixture().await;
        assert_eq!(f.reconciler.clear_unread(2, 404).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deliver_pending_drains_in_order_and_clears() {
        let f = fixture().await;
        queue_message(&f, 1, "first", 10).await;
        queue_message(&f, 3, "second", 5).await;
        queue_message(&f, 1, "third", 1).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let delivered = f.reconciler.deliver_pending(2, &tx).await.unwrap();
        assert_eq!(delivered, 3);

        let bodies: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                ServerEvent::Message(m) => m.message.body,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);

        assert!(f.reconciler.list_unread(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deliver_pending_with_empty_backlog_sends_nothing() {
        let f = fixture().await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert_eq!(f.reconciler.deliver_pending(2, &tx).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_handle_keeps_markers_intact() {
        let f = fixture().await;
        queue_message(&f, 1, "kept", 1).await;

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let delivered = f.reconciler.deliver_pending(2, &tx).await.unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(f.reconciler.list_unread(2).await.unwrap().len(), 1);
    }
}
