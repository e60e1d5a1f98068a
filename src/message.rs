use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted direct message between two accounts.
///
/// The id and timestamp are assigned by the chat store at insert time; a row
/// is never edited after that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// A chat message with display names resolved for client presentation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMessage {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub message: ChatMessage,
    pub sender_name: String,
    pub recipient_name: String,
}

/// A pending-delivery obligation: the referenced message was persisted but
/// could not be pushed live. Sender and recipient are denormalized so the
/// backlog can be listed without a join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UnreadMarker {
    pub message_id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
}

/// The newest message in one conversation, for the conversation-list view.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPreview {
    pub peer_id: i64,
    pub peer_name: String,
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub last_message: ChatMessage,
}

/// Outcome of a delivery attempt, reported back to the sender in the ack.
///
/// `Delivered` means handed to the recipient's transport, not confirmed
/// received; `Queued` means a durable unread marker was written instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Queued,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Queued => write!(f, "queued"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckData {
    pub client_ref: Uuid,
    pub message_id: i64,
    pub status: DeliveryStatus,
}

/// Frames a client may send over the WebSocket, as JSON text frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake: the token was issued by the external auth layer and is the
    /// only source of the connection's account identity.
    Hello {
        token: String,
    },
    /// `client_ref` is an opaque correlation id echoed back in the ack; it is
    /// never used as the message's identity.
    SendMessage {
        recipient_id: i64,
        body: String,
        client_ref: Uuid,
    },
    Logout,
}

/// Frames the server pushes to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Welcome { account_id: i64 },
    Message(EnrichedMessage),
    Ack(AckData),
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_types_use_camel_case_fields() {
        let json = r#"{"SendMessage":{"recipientId":7,"body":"hi","clientRef":"6f9e0d3c-8f5a-4f2b-9a64-0d5f8a1b2c3d"}}"#;
        let parsed: ClientMessage = serde_json::from_str(json).unwrap();
        match parsed {
            ClientMessage::SendMessage {
                recipient_id, body, ..
            } => {
                assert_eq!(recipient_id, 7);
                assert_eq!(body, "hi");
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let event = ServerEvent::Message(EnrichedMessage {
            message: ChatMessage {
                id: 1,
                sender_id: 2,
                recipient_id: 3,
                body: "hello".to_string(),
                sent_at: chrono::Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            },
            sender_name: "alice".to_string(),
            recipient_name: "bob".to_string(),
        });
        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains("\"senderId\":2"));
        assert!(encoded.contains("\"senderName\":\"alice\""));
    }

    #[test]
    fn delivery_status_serializes_as_lowercase_token() {
        assert_eq!(
            serde_json::to_string(&DeliveryStatus::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(DeliveryStatus::Delivered.to_string(), "delivered");
    }
}
