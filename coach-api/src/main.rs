use anyhow::Context;
use coach_api::{app, AppState};
use coach_core::ScheduleStore;
use coach_store::app_config::{Config, StoreBackend};
use coach_store::{InMemoryScheduleStore, RedisScheduleStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coach_api=debug,coach_store=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Coach API on port {}", config.server.port);

    let store: Arc<dyn ScheduleStore> = match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory schedule store; bookings are lost on restart");
            Arc::new(InMemoryScheduleStore::new())
        }
        StoreBackend::Redis => {
            let redis = config.redis.as_ref().context("redis.url is required for the redis backend")?;
            let store = RedisScheduleStore::new(&redis.url)
                .await
                .context("Failed to create Redis client")?;
            Arc::new(store)
        }
    };
    store.health_check().await.context("Schedule store is not reachable")?;

    let app_state = AppState::new(
        store,
        Duration::from_millis(config.reservation.claim_timeout_ms),
        config.notifications.observer_buffer,
    )
    .context("Failed to register metrics")?;

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
