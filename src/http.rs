use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::message::{ConversationPreview, EnrichedMessage, UnreadMarker};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Account identity extracted from a verified bearer token. The HTTP layer
/// never trusts ids carried in the query string.
pub struct AuthedAccount(pub i64);

impl FromRequestParts<AppContext> for AuthedAccount {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::auth("missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::auth("expected a Bearer token"))?;
        ctx.auth.verify_token(token).map(AuthedAccount)
    }
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat/previews", get(previews))
        .route("/chat/history/{peer_id}", get(history))
        .route("/chat/unread", get(list_unread))
        .route("/chat/unread/{peer_id}", delete(clear_unread))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub async fn run_http_server(ctx: AppContext, listener: TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

async fn health(State(ctx): State<AppContext>) -> AppResult<&'static str> {
    ctx.store.healthcheck().await?;
    Ok("OK")
}

/// Latest message of every conversation the caller takes part in; feeds the
/// message-tab overview.
async fn previews(
    State(ctx): State<AppContext>,
    AuthedAccount(account_id): AuthedAccount,
) -> AppResult<Json<Vec<ConversationPreview>>> {
    Ok(Json(ctx.store.latest_per_conversation(account_id).await?))
}

async fn history(
    State(ctx): State<AppContext>,
    AuthedAccount(account_id): AuthedAccount,
    Path(peer_id): Path<i64>,
) -> AppResult<Json<Vec<EnrichedMessage>>> {
    Ok(Json(ctx.store.history(account_id, peer_id).await?))
}

async fn list_unread(
    State(ctx): State<AppContext>,
    AuthedAccount(account_id): AuthedAccount,
) -> AppResult<Json<Vec<UnreadMarker>>> {
    Ok(Json(ctx.backlog.list_unread(account_id).await?))
}

#[derive(Debug, Serialize)]
struct ClearedResponse {
    deleted: u64,
}

async fn clear_unread(
    State(ctx): State<AppContext>,
    AuthedAccount(account_id): AuthedAccount,
    Path(peer_id): Path<i64>,
) -> AppResult<Json<ClearedResponse>> {
    let deleted = ctx.backlog.clear_unread(account_id, peer_id).await?;
    Ok(Json(ClearedResponse { deleted }))
}
