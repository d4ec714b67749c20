// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dailysolve Server
//!
//! An HTTP server responsible for:
//! - Serving the daily solution from the cache
//! - Fetching it from the workflow engine at most once per cycle
//! - Refreshing it at every cutover
//! - Submitting it on behalf of users

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use dailysolve_core::Config;
use dailysolve_core::cache::RedisStore;
use dailysolve_core::engine::{WebhookEngine, WebhookEngineConfig};
use dailysolve_core::runtime::SolverRuntime;
use dailysolve_server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dailysolve_core=info,dailysolve_server=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        timezone = %config.timezone,
        cutover_hour = config.cutover_hour,
        refresh_cron = %config.refresh_cron,
        engine = %config.engine_base_url,
        "Starting Dailysolve Server"
    );

    let store = RedisStore::connect(&config.redis_url, config.cache_op_timeout).await?;
    info!("Connected to cache store");

    let engine = WebhookEngine::new(WebhookEngineConfig::from_config(&config))?;
    let engine_health = engine.health().await;
    if engine_health.reachable == engine_health.total {
        info!(base_url = %engine_health.base_url, "Workflow engine reachable");
    } else {
        warn!(
            base_url = %engine_health.base_url,
            reachable = engine_health.reachable,
            total = engine_health.total,
            errors = ?engine_health.errors,
            "Workflow engine connectivity issues"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));

    let runtime = SolverRuntime::builder()
        .config(config)
        .store(Arc::new(store))
        .engine(Arc::new(engine))
        .build()?
        .start()
        .await?;

    let state = Arc::new(AppState::new(runtime.orchestrator(), runtime.submitter()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP server ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    runtime.shutdown().await;

    info!("Dailysolve Server shut down");

    Ok(())
}
