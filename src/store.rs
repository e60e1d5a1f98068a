use crate::message::{ChatMessage, ConversationPreview, EnrichedMessage, UnreadMarker};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Durable storage interface for messages and the unread backlog.
///
/// This trait allows for multiple implementations:
/// - PostgreSQL (production)
/// - In-memory (tests and local development)
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a message and return it with the store-assigned id.
    async fn insert_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ChatMessage>;

    /// Record a pending-delivery obligation. Idempotent: re-queueing the same
    /// message id is absorbed, so a retried write after a transient failure
    /// cannot double-count.
    async fn enqueue_unread(&self, marker: &UnreadMarker) -> Result<()>;

    /// Unread markers for an account, oldest message first.
    async fn list_unread(&self, account_id: i64) -> Result<Vec<UnreadMarker>>;

    /// Full unread messages for an account, oldest first. Used by the
    /// connect-time reconciliation policy, which needs bodies, not markers.
    async fn list_unread_messages(&self, account_id: i64) -> Result<Vec<EnrichedMessage>>;

    /// Delete markers from `peer_id` to `account_id`. Returns the number
    /// deleted; zero is a normal outcome, not an error.
    async fn clear_unread(&self, account_id: i64, peer_id: i64) -> Result<u64>;

    /// Conversation history between two accounts, ascending by timestamp.
    async fn history(&self, account_a: i64, account_b: i64) -> Result<Vec<EnrichedMessage>>;

    /// The newest message of each conversation the account takes part in.
    async fn latest_per_conversation(&self, account_id: i64) -> Result<Vec<ConversationPreview>>;

    async fn display_name(&self, account_id: i64) -> Result<Option<String>>;

    /// Cheap probe used by the health endpoint.
    async fn healthcheck(&self) -> Result<()>;
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

pub struct PostgresChatStore {
    pool: PgPool,
}

impl PostgresChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChatStore for PostgresChatStore {
    async fn insert_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let message = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (sender_id, recipient_id, body, sent_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, sender_id, recipient_id, body, sent_at
            "#,
        )
        .bind(sender_id)
        .bind(recipient_id)
        .bind(body)
        .bind(sent_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        Ok(message)
    }

    async fn enqueue_unread(&self, marker: &UnreadMarker) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO unread_messages (message_id, sender_id, recipient_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(marker.message_id)
        .bind(marker.sender_id)
        .bind(marker.recipient_id)
        .execute(&self.pool)
        .await
        .context("Failed to enqueue unread marker")?;

        Ok(())
    }

    async fn list_unread(&self, account_id: i64) -> Result<Vec<UnreadMarker>> {
        let markers = sqlx::query_as::<_, UnreadMarker>(
            r#"
            SELECT u.message_id, u.sender_id, u.recipient_id
            FROM unread_messages u
            JOIN chat_messages m ON m.id = u.message_id
            WHERE u.recipient_id = $1
            ORDER BY m.sent_at ASC, m.id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unread markers")?;

        Ok(markers)
    }

    async fn list_unread_messages(&self, account_id: i64) -> Result<Vec<EnrichedMessage>> {
        let messages = sqlx::query_as::<_, EnrichedMessage>(
            r#"
            SELECT m.id, m.sender_id, m.recipient_id, m.body, m.sent_at,
                   sa.username AS sender_name, ra.username AS recipient_name
            FROM unread_messages u
            JOIN chat_messages m ON m.id = u.message_id
            JOIN accounts sa ON sa.id = m.sender_id
            JOIN accounts ra ON ra.id = m.recipient_id
            WHERE u.recipient_id = $1
            ORDER BY m.sent_at ASC, m.id ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list unread messages")?;

        Ok(messages)
    }

    async fn clear_unread(&self, account_id: i64, peer_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM unread_messages
            WHERE recipient_id = $1 AND sender_id = $2
            "#,
        )
        .bind(account_id)
        .bind(peer_id)
        .execute(&self.pool)
        .await
        .context("Failed to clear unread markers")?;

        Ok(result.rows_affected())
    }

    async fn history(&self, account_a: i64, account_b: i64) -> Result<Vec<EnrichedMessage>> {
        let messages = sqlx::query_as::<_, EnrichedMessage>(
            r#"
            SELECT m.id, m.sender_id, m.recipient_id, m.body, m.sent_at,
                   sa.username AS sender_name, ra.username AS recipient_name
            FROM chat_messages m
            JOIN accounts sa ON sa.id = m.sender_id
            JOIN accounts ra ON ra.id = m.recipient_id
            WHERE (m.sender_id = $1 AND m.recipient_id = $2)
               OR (m.sender_id = $2 AND m.recipient_id = $1)
            ORDER BY m.sent_at ASC, m.id ASC
            "#,
        )
        .bind(account_a)
        .bind(account_b)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch chat history")?;

        Ok(messages)
    }

    async fn latest_per_conversation(&self, account_id: i64) -> Result<Vec<ConversationPreview>> {
        let previews = sqlx::query_as::<_, ConversationPreview>(
            r#"
            SELECT DISTINCT ON (peer_id)
                   peer.id AS peer_id,
                   peer.username AS peer_name,
                   m.id, m.sender_id, m.recipient_id, m.body, m.sent_at
            FROM chat_messages m
            JOIN accounts peer
              ON peer.id = CASE WHEN m.sender_id = $1 THEN m.recipient_id ELSE m.sender_id END
            WHERE m.sender_id = $1 OR m.recipient_id = $1
            ORDER BY peer_id, m.sent_at DESC, m.id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch conversation previews")?;

        Ok(previews)
    }

    async fn display_name(&self, account_id: i64) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            r#"
            SELECT username FROM accounts WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve display name")?;

        Ok(name)
    }

    async fn healthcheck(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory chat store for tests and local development.
///
/// Mirrors the Postgres semantics that matter to callers: ids are assigned in
/// insertion order, unknown accounts are rejected like a foreign-key
/// violation, and duplicate unread markers are absorbed.
pub struct MemoryChatStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    accounts: HashMap<i64, String>,
    messages: Vec<ChatMessage>,
    unread: Vec<UnreadMarker>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_id: 1,
                ..MemoryInner::default()
            }),
        }
    }

    pub async fn add_account(&self, account_id: i64, username: &str) {
        self.inner
            .lock()
            .await
            .accounts
            .insert(account_id, username.to_string());
    }
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn enrich(&self, message: &ChatMessage) -> EnrichedMessage {
        let name = |id: i64| {
            self.accounts
                .get(&id)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string())
        };
        EnrichedMessage {
            message: message.clone(),
            sender_name: name(message.sender_id),
            recipient_name: name(message.recipient_id),
        }
    }

    fn message_by_id(&self, id: i64) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryChatStore {
    async fn insert_message(
        &self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let mut inner = self.inner.lock().await;
        for id in [sender_id, recipient_id] {
            if !inner.accounts.contains_key(&id) {
                anyhow::bail!("foreign key violation: account {} does not exist", id);
            }
        }
        let message = ChatMessage {
            id: inner.next_id,
            sender_id,
            recipient_id,
            body: body.to_string(),
            sent_at,
        };
        inner.next_id += 1;
        inner.messages.push(message.clone());
        Ok(message)
    }

    async fn enqueue_unread(&self, marker: &UnreadMarker) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.message_by_id(marker.message_id).is_none() {
            anyhow::bail!(
                "foreign key violation: message {} does not exist",
                marker.message_id
            );
        }
        if inner
            .unread
            .iter()
            .all(|m| m.message_id != marker.message_id)
        {
            inner.unread.push(marker.clone());
        }
        Ok(())
    }

    async fn list_unread(&self, account_id: i64) -> Result<Vec<UnreadMarker>> {
        let inner = self.inner.lock().await;
        let mut markers: Vec<UnreadMarker> = inner
            .unread
            .iter()
            .filter(|m| m.recipient_id == account_id)
            .cloned()
            .collect();
        markers.sort_by_key(|m| {
            inner
                .message_by_id(m.message_id)
                .map(|msg| (msg.sent_at, msg.id))
                .unwrap_or((DateTime::<Utc>::MIN_UTC, 0))
        });
        Ok(markers)
    }

    async fn list_unread_messages(&self, account_id: i64) -> Result<Vec<EnrichedMessage>> {
        let markers = self.list_unread(account_id).await?;
        let inner = self.inner.lock().await;
        Ok(markers
            .iter()
            .filter_map(|m| inner.message_by_id(m.message_id))
            .map(|msg| inner.enrich(msg))
            .collect())
    }

    async fn clear_unread(&self, account_id: i64, peer_id: i64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.unread.len();
        inner
            .unread
            .retain(|m| !(m.recipient_id == account_id && m.sender_id == peer_id));
        Ok((before - inner.unread.len()) as u64)
    }

    async fn history(&self, account_a: i64, account_b: i64) -> Result<Vec<EnrichedMessage>> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<&ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| {
                (m.sender_id == account_a && m.recipient_id == account_b)
                    || (m.sender_id == account_b && m.recipient_id == account_a)
            })
            .collect();
        messages.sort_by_key(|m| (m.sent_at, m.id));
        Ok(messages.into_iter().map(|m| inner.enrich(m)).collect())
    }

    async fn latest_per_conversation(&self, account_id: i64) -> Result<Vec<ConversationPreview>> {
        let inner = self.inner.lock().await;
        let mut latest: HashMap<i64, &ChatMessage> = HashMap::new();
        for message in &inner.messages {
            let peer_id = if message.sender_id == account_id {
                message.recipient_id
            } else if message.recipient_id == account_id {
                message.sender_id
            } else {
                continue;
            };
            let newest = latest.entry(peer_id).or_insert(message);
            if (message.sent_at, message.id) > ((newest.sent_at), newest.id) {
                *newest = message;
            }
        }
        let mut previews: Vec<ConversationPreview> = latest
            .into_iter()
            .map(|(peer_id, message)| ConversationPreview {
                peer_id,
                peer_name: inner
                    .accounts
                    .get(&peer_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                last_message: message.clone(),
            })
            .collect();
        previews.sort_by_key(|p| p.peer_id);
        Ok(previews)
    }

    async fn display_name(&self, account_id: i64) -> Result<Option<String>> {
        Ok(self.inner.lock().await.accounts.get(&account_id).cloned())
    }

    async fn healthcheck(&self) -> Result<()> {
        Ok(())
    }
}
