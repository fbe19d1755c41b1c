//! straddlebot entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use straddlebot::alerts::AlertManager;
use straddlebot::broker::BrokerRestClient;
use straddlebot::config::AppConfig;
use straddlebot::engine::TradingEngine;
use straddlebot::persistence::CsvPersistence;
use straddlebot::scripmaster::ScripMaster;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    config.validate_env()?;
    info!("Starting straddlebot: {}", config.digest());
    if config.bot.dry_run {
        warn!("Dry-run mode: orders are logged, not sent");
    }

    let directory = Arc::new(
        ScripMaster::load(&config.broker.scripmaster_path)
            .with_context(|| format!("Failed to load {}", config.broker.scripmaster_path))?,
    );
    info!(instruments = directory.len(), "Scrip master loaded");

    let broker = Arc::new(BrokerRestClient::new(&config.broker, config.bot.dry_run)?);
    let alerts = Arc::new(AlertManager::new());

    let persistence = if config.persistence.csv_enabled {
        Some(
            CsvPersistence::new(&config.persistence.data_dir)
                .context("Failed to initialize CSV persistence")?,
        )
    } else {
        None
    };

    #[cfg(feature = "dashboard")]
    let dashboard_port = config.dashboard.port;

    let (mut engine, status_rx) = TradingEngine::new(
        config,
        broker.clone(),
        broker,
        directory,
        alerts.clone(),
        persistence,
    );

    #[cfg(feature = "dashboard")]
    {
        let status_rx = status_rx.clone();
        let alerts = alerts.clone();
        tokio::spawn(async move {
            if let Err(e) =
                straddlebot::dashboard::start_server(status_rx, alerts, dashboard_port).await
            {
                tracing::error!("Status API server failed: {e:#}");
            }
        });
    }
    #[cfg(not(feature = "dashboard"))]
    let _ = &status_rx;

    let engine_task = tokio::spawn(async move { engine.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping");
    engine_task.abort();

    Ok(())
}
