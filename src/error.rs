use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Covers every failure this service can surface, with enough structure to
/// pick an HTTP status, a stable machine-readable code, and a user-facing
/// message that never leaks internals.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Database & Storage =====
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Authentication =====
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // ===== Validation =====
    #[error("Validation error: {0}")]
    Validation(String),

    // ===== WebSocket transport =====
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    // ===== Delivery pipeline =====
    #[error("Delivery error: {0}")]
    Delivery(String),

    // ===== Configuration =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Internal =====
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) | AppError::Jwt(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::WebSocket(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for programmatic error handling on the client.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Jwt(_) => "JWT_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Json(_) => "INVALID_MESSAGE_FORMAT",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Delivery(_) => "DELIVERY_ERROR",
            AppError::WebSocket(_) => "WEBSOCKET_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// User-facing message without sensitive details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(msg) => format!("Authentication failed: {}", msg),
            AppError::Jwt(_) => "Invalid or expired token".to_string(),
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::Json(_) => "Malformed message".to_string(),
            AppError::Database(_) => "Message could not be persisted. Please retry.".to_string(),
            AppError::Delivery(_) => "Message was saved but could not be routed".to_string(),
            AppError::WebSocket(_) => "WebSocket connection error".to_string(),
            AppError::Config(msg) => format!("Configuration error: {}", msg),
            _ => "Internal server error".to_string(),
        }
    }

    /// Log this error at a level matching its severity.
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, "Server error occurred");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "Authentication failed");
        } else {
            tracing::debug!(error = %self, error_code = %code, "Client error occurred");
        }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        AppError::Auth(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn websocket(msg: impl Into<String>) -> Self {
        AppError::WebSocket(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        AppError::Delivery(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // Server errors never expose internal details to the client.
        let body = if status.is_server_error() {
            json!({
                "error": "Internal server error",
                "error_code": error_code,
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "error_code": error_code,
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_unauthorized() {
        let err = AppError::auth("missing Authorization header");
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), "AUTH_ERROR");
    }

    #[test]
    fn server_errors_hide_details_from_user_message() {
        let err = AppError::internal("pool exhausted on shard 3");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("shard"));
    }
}
