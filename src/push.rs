use crate::utils::log_safe_id;

/// Seam for the external push-notification transport.
///
/// The delivery coordinator calls this on the backlog path so an offline
/// recipient's devices can be poked. The transport itself (APNs, FCM, ...)
/// is an external collaborator; this crate ships a disabled default and a
/// log-only implementation for environments without one.
#[async_trait::async_trait]
pub trait PushNotifier: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Fire-and-forget hint that a message is waiting for an offline account.
    /// Failures must not propagate into the delivery path.
    async fn offline_message(&self, recipient_id: i64, sender_name: &str);
}

pub struct DisabledPush;

#[async_trait::async_trait]
impl PushNotifier for DisabledPush {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn offline_message(&self, _recipient_id: i64, _sender_name: &str) {}
}

/// Logs the notification instead of sending one. Useful in development and
/// as the wiring target when `PUSH_ENABLED` is set without a transport.
pub struct LogOnlyPush {
    hash_salt: String,
}

impl LogOnlyPush {
    pub fn new(hash_salt: &str) -> Self {
        Self {
            hash_salt: hash_salt.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PushNotifier for LogOnlyPush {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn offline_message(&self, recipient_id: i64, sender_name: &str) {
        tracing::info!(
            recipient_hash = %log_safe_id(recipient_id, &self.hash_salt),
            sender_name = %sender_name,
            "Push notification requested for offline recipient"
        );
    }
}
