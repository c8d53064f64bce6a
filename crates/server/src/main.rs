mod api;
mod bootstrap;
mod effects;
mod health;
mod sessions;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use medidesk_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::sessions::SessionRegistry;

fn init_logging(config: &AppConfig) {
    use medidesk_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let routes = api::router(app.api.clone())
        .merge(health::router(app.db_pool.clone(), app.faq_entries()));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        faq_entries = app.faq_entries(),
        "medidesk-server listening"
    );

    let sweeper = tokio::spawn(sweep_idle_sessions(Arc::clone(&app.api.sessions)));
    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown()).await?;
    sweeper.abort();

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "medidesk-server stopping"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            correlation_id = "shutdown",
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn sweep_idle_sessions(sessions: Arc<SessionRegistry>) {
    let mut ticker = tokio::time::interval(sessions.idle_ttl() / 2);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let evicted = sessions.evict_idle().await;
        if evicted > 0 {
            let remaining = sessions.len().await;
            tracing::info!(
                event_name = "session.sweep",
                correlation_id = "session-sweeper",
                evicted,
                remaining,
                "evicted idle sessions"
            );
        }
    }
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
