use crate::delivery::DeliveryCoordinator;
use crate::error::{AppError, AppResult};
use crate::message::{DeliveryStatus, EnrichedMessage};
use crate::store::ChatStore;
use chrono::Utc;
use std::sync::Arc;

/// Result of a successful submission: the persisted, enriched message plus
/// how it was routed.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub message: EnrichedMessage,
    pub status: DeliveryStatus,
}

/// Turns an inbound, client-submitted message into a durable chat message.
///
/// The sender identity comes from the authenticated connection, never from
/// the payload. Persistence happens first; enrichment and delivery never run
/// without a successful persist, so a failed call leaves no partial state.
pub struct MessageIngest {
    store: Arc<dyn ChatStore>,
    delivery: Arc<DeliveryCoordinator>,
    max_message_bytes: usize,
}

impl MessageIngest {
    pub fn new(
        store: Arc<dyn ChatStore>,
        delivery: Arc<DeliveryCoordinator>,
        max_message_bytes: usize,
    ) -> Self {
        Self {
            store,
            delivery,
            max_message_bytes,
        }
    }

    pub async fn submit(
        &self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
    ) -> AppResult<SubmitOutcome> {
        let body = body.trim();
        if body.is_empty() {
            return Err(AppError::validation("message body is empty"));
        }
        if body.len() > self.max_message_bytes {
            return Err(AppError::validation(format!(
                "message body exceeds {} bytes",
                self.max_message_bytes
            )));
        }
        if sender_id == recipient_id {
            return Err(AppError::validation("cannot send a message to yourself"));
        }

        let message = self
            .store
            .insert_message(sender_id, recipient_id, body, Utc::now())
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    sender_id,
                    recipient_id,
                    "Message persistence failed"
                );
                AppError::Unknown(e)
            })?;

        let enriched = EnrichedMessage {
            sender_name: self.resolve_name(sender_id).await,
            recipient_name: self.resolve_name(recipient_id).await,
            message,
        };

        let status = self.delivery.deliver(&enriched).await?;

        Ok(SubmitOutcome {
            message: enriched,
            status,
        })
    }

    /// Display-name resolution is presentation only; a lookup failure after a
    /// successful persist must not lose the message.
    async fn resolve_name(&self, account_id: i64) -> String {
        match self.store.display_name(account_id).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                tracing::warn!(account_id, "No display name on record");
                "unknown".to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, account_id, "Display name lookup failed");
                "unknown".to_string()
            }
        }
    }
}
