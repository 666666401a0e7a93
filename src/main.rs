// main.rs
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use triones_bridge::{
    config,
    dispatch::{self, Dispatcher},
    engine::{ConversationEngine, EngineTimeouts},
    events::{EventBus, StatusPublisher},
    handlers, link, metrics,
    models::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = config::Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        metrics::setup_metrics(settings.metrics.port)
            .map_err(|e| anyhow::anyhow!("Failed to setup metrics: {}", e))?;
        tracing::info!("Metrics exported on port {}", settings.metrics.port);
    }

    let bridge = &settings.bridge;
    let bus = Arc::new(EventBus::new());
    let transport = link::from_settings(&settings.link, bridge.connect_timeout()).await?;
    tracing::info!(backend = %settings.link.backend, "Link transport ready");

    let (requests, inbound) = mpsc::unbounded_channel();
    dispatch::subscribe_control(&bus, &bridge.control_topic, requests);
    let engine = ConversationEngine::new(
        transport,
        StatusPublisher::new(Arc::clone(&bus), bridge.status_topic.clone()),
        EngineTimeouts::from(bridge),
    );
    let dispatcher = tokio::spawn(Dispatcher::new(engine, inbound, bridge).run());

    let state = Arc::new(AppState::new(
        Arc::clone(&bus),
        &bridge.control_topic,
        &bridge.status_topic,
        settings.server.max_connections as usize,
    ));
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    dispatcher.abort();
    Ok(())
}
