use crate::error::{AppError, AppResult};
use crate::message::{DeliveryStatus, EnrichedMessage, ServerEvent, UnreadMarker};
use crate::push::PushNotifier;
use crate::registry::ConnectionRegistry;
use crate::store::ChatStore;
use std::sync::Arc;

/// Decides between live push and durable backlog, exactly once per message.
///
/// The live path is at-most-once: "delivered" means the event was handed to
/// the recipient's transport, nothing more. The backlog path is at-least-once
/// relative to backlog state; the store absorbs duplicate markers.
pub struct DeliveryCoordinator {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
    push: Arc<dyn PushNotifier>,
}

impl DeliveryCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn ChatStore>,
        push: Arc<dyn PushNotifier>,
    ) -> Self {
        Self {
            registry,
            store,
            push,
        }
    }

    /// Attempt delivery of a persisted, enriched message.
    ///
    /// A send error on a registered handle means the connection task already
    /// died and its registry entry is stale; that is a delivery-miss, not an
    /// error, and the message falls through to the backlog. The disconnect
    /// handler owns the cleanup of the stale entry.
    pub async fn deliver(&self, message: &EnrichedMessage) -> AppResult<DeliveryStatus> {
        let recipient_id = message.message.recipient_id;

        if let Some(handle) = self.registry.lookup(recipient_id).await {
            match handle.send(ServerEvent::Message(message.clone())) {
                Ok(()) => {
                    tracing::debug!(
                        message_id = message.message.id,
                        "Message delivered to online recipient"
                    );
                    return Ok(DeliveryStatus::Delivered);
                }
                Err(_) => {
                    tracing::debug!(
                        message_id = message.message.id,
                        "Stale connection handle, falling back to backlog"
                    );
                }
            }
        }

        self.queue_unread(message).await?;
        Ok(DeliveryStatus::Queued)
    }

    async fn queue_unread(&self, message: &EnrichedMessage) -> AppResult<()> {
        let marker = UnreadMarker {
            message_id: message.message.id,
            sender_id: message.message.sender_id,
            recipient_id: message.message.recipient_id,
        };

        if let Err(e) = self.store.enqueue_unread(&marker).await {
            // The message row itself is already durable; only the unread
            // bookkeeping failed. The recipient will still see the message in
            // a full-history fetch.
            tracing::error!(
                error = %e,
                message_id = marker.message_id,
                "Failed to enqueue unread marker"
            );
            return Err(AppError::delivery(format!(
                "failed to record unread marker for message {}",
                marker.message_id
            )));
        }

        tracing::debug!(
            message_id = marker.message_id,
            "Recipient offline, unread marker recorded"
        );

        if self.push.is_enabled() {
            self.push
                .offline_message(marker.recipient_id, &message.sender_name)
                .await;
        }

        Ok(())
    }
}
