use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::message::{AckData, ClientMessage, ServerEvent};
use crate::registry::ClientHandle;
use crate::utils::log_safe_id;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Accept loop: one task per connection.
pub async fn run_websocket_server(ctx: AppContext, listener: TcpListener) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept socket");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            match accept_async(socket).await {
                Ok(ws_stream) => handle_connection(ws_stream, addr, ctx).await,
                Err(e) => {
                    tracing::debug!(error = %e, %addr, "WebSocket upgrade failed");
                }
            }
        });
    }
}

/// State for one client connection: the write half of the socket, the handle
/// other tasks use to push events to this client, and the identity attached
/// at handshake time.
struct ConnectionHandler {
    ws_sender: WsSink,
    tx: ClientHandle,
    account_id: Option<i64>,
    addr: SocketAddr,
}

impl ConnectionHandler {
    fn new(ws_sender: WsSink, tx: ClientHandle, addr: SocketAddr) -> Self {
        Self {
            ws_sender,
            tx,
            account_id: None,
            addr,
        }
    }

    async fn send_event(&mut self, event: &ServerEvent) -> AppResult<()> {
        let json = serde_json::to_string(event)?;
        self.ws_sender
            .send(WsMessage::Text(json))
            .await
            .map_err(|e| AppError::websocket(e.to_string()))?;
        Ok(())
    }

    async fn send_error(&mut self, code: &str, message: &str) {
        let event = ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        };
        if self.send_event(&event).await.is_err() {
            tracing::debug!(addr = %self.addr, "Failed to send error to disconnected client");
        }
    }
}

async fn handle_connection(ws_stream: WebSocketStream<TcpStream>, addr: SocketAddr, ctx: AppContext) {
    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut handler = ConnectionHandler::new(ws_sender, tx, addr);

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Hello { token }) => {
                                handle_hello(&mut handler, &ctx, &token).await;
                            }
                            Ok(ClientMessage::SendMessage { recipient_id, body, client_ref }) => {
                                handle_send_message(&mut handler, &ctx, recipient_id, &body, client_ref).await;
                            }
                            Ok(ClientMessage::Logout) => break,
                            Err(e) => {
                                tracing::debug!(error = %e, %addr, "Failed to parse client frame");
                                handler
                                    .send_error("INVALID_MESSAGE_FORMAT", "Malformed message")
                                    .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = handler.ws_sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, %addr, "WebSocket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            outbound = rx.recv() => {
                match outbound {
                    Some(event) => {
                        if handler.send_event(&event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // A superseded connection must not evict its successor's registry entry.
    if let Some(account_id) = handler.account_id {
        ctx.registry.unregister_stale(account_id, &handler.tx).await;
        if ctx.config.logging.log_account_ids {
            tracing::info!(account_id, "Client disconnected");
        } else {
            tracing::info!(
                account_hash = %log_safe_id(account_id, &ctx.config.logging.hash_salt),
                "Client disconnected"
            );
        }
    }
}

/// Handshake: verify the token, record presence, optionally drain the
/// backlog into the fresh connection.
async fn handle_hello(handler: &mut ConnectionHandler, ctx: &AppContext, token: &str) {
    let account_id = match ctx.auth.verify_token(token) {
        Ok(id) => id,
        Err(e) => {
            e.log();
            handler.send_error(e.error_code(), &e.user_message()).await;
            return;
        }
    };

    // A repeated handshake under a different account releases the old entry.
    if let Some(previous) = handler.account_id {
        if previous != account_id {
            ctx.registry.unregister_stale(previous, &handler.tx).await;
        }
    }

    let replaced = ctx.registry.register(account_id, handler.tx.clone()).await;
    handler.account_id = Some(account_id);

    if ctx.config.logging.log_account_ids {
        tracing::info!(account_id, replaced, "Client connected");
    } else {
        tracing::info!(
            account_hash = %log_safe_id(account_id, &ctx.config.logging.hash_salt),
            replaced,
            "Client connected"
        );
    }

    if handler
        .send_event(&ServerEvent::Welcome { account_id })
        .await
        .is_err()
    {
        return;
    }

    if ctx.config.deliver_backlog_on_connect {
        if let Err(e) = ctx.backlog.deliver_pending(account_id, &handler.tx).await {
            tracing::error!(error = %e, account_id, "Backlog delivery on connect failed");
        }
    }
}

/// Handles message sending: the sender identity comes from the authenticated
/// connection, never from the payload.
async fn handle_send_message(
    handler: &mut ConnectionHandler,
    ctx: &AppContext,
    recipient_id: i64,
    body: &str,
    client_ref: Uuid,
) {
    let sender_id = match handler.account_id {
        Some(id) => id,
        None => {
            tracing::warn!(addr = %handler.addr, "Unauthenticated client attempted to send a message");
            handler
                .send_error("AUTH_REQUIRED", "Authentication is required to send messages")
                .await;
            return;
        }
    };

    match ctx.ingest.submit(sender_id, recipient_id, body).await {
        Ok(outcome) => {
            let ack = ServerEvent::Ack(AckData {
                client_ref,
                message_id: outcome.message.message.id,
                status: outcome.status,
            });
            let _ = handler.send_event(&ack).await;
        }
        Err(e) => {
            e.log();
            handler.send_error(e.error_code(), &e.user_message()).await;
        }
    }
}
