use anyhow::Result;
use meadow_server::auth::AuthManager;
use meadow_server::backlog::BacklogReconciler;
use meadow_server::config::Config;
use meadow_server::context::AppContext;
use meadow_server::delivery::DeliveryCoordinator;
use meadow_server::ingest::MessageIngest;
use meadow_server::push::{DisabledPush, LogOnlyPush, PushNotifier};
use meadow_server::registry::ConnectionRegistry;
use meadow_server::store::{ChatStore, PostgresChatStore};
use meadow_server::{db, http, server};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.rust_log)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::create_pool(&config).await?;
    sqlx::migrate!().run(&pool).await?;
    tracing::info!("Connected to database");

    let store: Arc<dyn ChatStore> = Arc::new(PostgresChatStore::new(pool));
    let registry = Arc::new(ConnectionRegistry::new());
    let auth = Arc::new(AuthManager::new(&config)?);
    let push: Arc<dyn PushNotifier> = if config.push_enabled {
        Arc::new(LogOnlyPush::new(&config.logging.hash_salt))
    } else {
        Arc::new(DisabledPush)
    };

    let delivery = Arc::new(DeliveryCoordinator::new(
        registry.clone(),
        store.clone(),
        push,
    ));
    let ingest = Arc::new(MessageIngest::new(
        store.clone(),
        delivery,
        config.max_message_bytes,
    ));
    let backlog = Arc::new(BacklogReconciler::new(store.clone()));

    let config = Arc::new(config);
    let ctx = AppContext::new(config.clone(), store, registry, auth, ingest, backlog);

    let ws_listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "WebSocket server listening");

    let http_listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "HTTP server listening");

    let http_ctx = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = http::run_http_server(http_ctx, http_listener).await {
            tracing::error!(error = %e, "HTTP server exited");
        }
    });

    tokio::select! {
        _ = server::run_websocket_server(ctx, ws_listener) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
