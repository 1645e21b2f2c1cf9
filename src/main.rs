//! ombaro-booking server binary

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ombaro_booking::api::{create_router, AppState};
use ombaro_booking::capacity::{HoldSweeper, SweepConfig};
use ombaro_booking::catalog::StaticCatalog;
use ombaro_booking::config::{AppConfig, LogFormat};
use ombaro_booking::notify::TracingNotifier;
use ombaro_booking::service::BookingService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config)?;

    // The catalog collaborator: in a full deployment this is a client
    // for the profile/catalog service. The in-memory store keeps the
    // engine runnable standalone.
    let catalog = Arc::new(StaticCatalog::new());

    let engine = Arc::new(BookingService::new(
        catalog,
        Arc::new(TracingNotifier),
        config.engine_config(),
    ));

    // Background hold-expiry sweep
    let sweeper = HoldSweeper::new(SweepConfig::new(config.capacity.sweep_interval_secs));
    sweeper.start(engine.capacity()).await?;

    let router = create_router(AppState::new(engine));

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    tracing::info!(%addr, "Listening for HTTP traffic");

    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.logging.level.clone()))
        .unwrap_or_else(|_| EnvFilter::new("ombaro_booking=info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format {
        LogFormat::Json => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }

    Ok(())
}
