#![allow(dead_code)]

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use meadow_server::auth::AuthManager;
use meadow_server::backlog::BacklogReconciler;
use meadow_server::config::{Config, LoggingConfig};
use meadow_server::context::AppContext;
use meadow_server::delivery::DeliveryCoordinator;
use meadow_server::ingest::MessageIngest;
use meadow_server::message::{ClientMessage, ServerEvent};
use meadow_server::push::DisabledPush;
use meadow_server::registry::ConnectionRegistry;
use meadow_server::store::{ChatStore, MemoryChatStore};
use meadow_server::{http, server};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

pub struct TestApp {
    pub ws_address: String,
    pub http_address: String,
    pub store: Arc<MemoryChatStore>,
    pub ctx: AppContext,
}

impl TestApp {
    pub fn token_for(&self, account_id: i64) -> String {
        self.ctx.auth.issue_token(account_id).unwrap()
    }

    pub async fn seed_account(&self, account_id: i64, username: &str) {
        self.store.add_account(account_id, username).await;
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused-in-tests".to_string(),
        port: 0,
        http_port: 0,
        db_max_connections: 1,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "meadow-server".to_string(),
        token_ttl_hours: 1,
        max_message_bytes: 64 * 1024,
        deliver_backlog_on_connect: false,
        push_enabled: false,
        rust_log: "info".to_string(),
        logging: LoggingConfig {
            log_account_ids: true,
            hash_salt: "test-salt".to_string(),
        },
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let store = Arc::new(MemoryChatStore::new());
    let store_dyn: Arc<dyn ChatStore> = store.clone();
    let registry = Arc::new(ConnectionRegistry::new());
    let auth = Arc::new(AuthManager::new(&config).unwrap());
    let delivery = Arc::new(DeliveryCoordinator::new(
        registry.clone(),
        store_dyn.clone(),
        Arc::new(DisabledPush),
    ));
    let ingest = Arc::new(MessageIngest::new(
        store_dyn.clone(),
        delivery,
        config.max_message_bytes,
    ));
    let backlog = Arc::new(BacklogReconciler::new(store_dyn.clone()));

    let ctx = AppContext::new(
        Arc::new(config),
        store_dyn,
        registry,
        auth,
        ingest,
        backlog,
    );

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_address = ws_listener.local_addr().unwrap().to_string();
    tokio::spawn(server::run_websocket_server(ctx.clone(), ws_listener));

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_address = http_listener.local_addr().unwrap().to_string();
    let http_ctx = ctx.clone();
    tokio::spawn(async move {
        http::run_http_server(http_ctx, http_listener).await.ok();
    });

    TestApp {
        ws_address,
        http_address,
        store,
        ctx,
    }
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub account_id: Option<i64>,
}

impl TestClient {
    pub async fn connect(address: &str) -> Result<Self> {
        let (ws, _) = connect_async(format!("ws://{}", address))
            .await
            .context("WebSocket connect failed")?;
        Ok(Self {
            ws,
            account_id: None,
        })
    }

    /// Handshake and wait for the Welcome event.
    pub async fn hello(&mut self, token: &str) -> Result<()> {
        self.send(&ClientMessage::Hello {
            token: token.to_string(),
        })
        .await?;
        match self.recv().await? {
            ServerEvent::Welcome { account_id } => {
                self.account_id = Some(account_id);
                Ok(())
            }
            other => anyhow::bail!("expected Welcome, got {:?}", other),
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.ws.send(WsMessage::Text(json)).await?;
        Ok(())
    }

    pub async fn send_message(&mut self, recipient_id: i64, body: &str) -> Result<Uuid> {
        let client_ref = Uuid::new_v4();
        self.send(&ClientMessage::SendMessage {
            recipient_id,
            body: body.to_string(),
            client_ref,
        })
        .await?;
        Ok(client_ref)
    }

    /// Next server event, failing the test if none arrives in time.
    pub async fn recv(&mut self) -> Result<ServerEvent> {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
            .await
            .context("timed out waiting for a server event")?
            .context("connection closed")??;
        match frame {
            WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
            other => anyhow::bail!("unexpected frame: {:?}", other),
        }
    }

    /// Poll briefly for an event; `None` means the server stayed silent.
    pub async fn try_recv(&mut self) -> Option<ServerEvent> {
        let frame = tokio::time::timeout(Duration::from_millis(300), self.ws.next())
            .await
            .ok()??
            .ok()?;
        match frame {
            WsMessage::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }
}
