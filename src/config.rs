use anyhow::Result;

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HTTP_PORT: u16 = 8081;

// Default database pool settings
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

// Default access token lifetime (hours)
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

/// Maximum accepted message body size. Text plus a little framing overhead;
/// anything larger belongs on the media/file-storage path, not in chat.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: usize = 64 * 1024; // 64 KB

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// When false, account ids in logs are replaced with a salted hash.
    pub log_account_ids: bool,
    pub hash_salt: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// WebSocket listener port.
    pub port: u16,
    /// HTTP sidecar port (health + chat query endpoints).
    pub http_port: u16,
    pub db_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl_hours: i64,
    pub max_message_bytes: usize,
    /// When set, pending backlog messages are pushed to a client right after
    /// its handshake and their markers cleared. Off by default: reconciliation
    /// is an explicit client action through the unread endpoints.
    pub deliver_backlog_on_connect: bool,
    pub push_enabled: bool,
    pub rust_log: String,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: std::env::var("DATABASE_URL")?,
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_HTTP_PORT),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
            jwt_secret: {
                let secret = std::env::var("JWT_SECRET")?;
                if secret.trim().is_empty() {
                    anyhow::bail!("JWT_SECRET must not be empty");
                }
                secret
            },
            jwt_issuer: std::env::var("JWT_ISSUER")
                .unwrap_or_else(|_| "meadow-server".to_string()),
            token_ttl_hours: std::env::var("TOKEN_TTL_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_TTL_HOURS),
            max_message_bytes: std::env::var("MAX_MESSAGE_BYTES")
                .ok()
                .and_then(|m| m.parse().ok())
                .unwrap_or(MAX_WEBSOCKET_MESSAGE_SIZE),
            deliver_backlog_on_connect: std::env::var("DELIVER_BACKLOG_ON_CONNECT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            push_enabled: std::env::var("PUSH_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            logging: LoggingConfig {
                log_account_ids: std::env::var("LOG_ACCOUNT_IDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(false),
                hash_salt: {
                    let salt = std::env::var("LOG_HASH_SALT").unwrap_or_default();
                    if salt.is_empty() {
                        tracing::warn!(
                            "LOG_HASH_SALT is not set; hashed log identifiers will use a fixed salt"
                        );
                        "meadow-log-salt".to_string()
                    } else {
                        salt
                    }
                },
            },
        })
    }
}
