// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background maintenance: history cleanup and cache health checks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::orchestrator::AcquisitionOrchestrator;

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often cleanup and health checks run.
    pub interval: Duration,
    /// Past cycles kept in the cache.
    pub retention_days: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800), // 30 minutes
            retention_days: 7,
        }
    }
}

impl From<&Config> for MaintenanceConfig {
    fn from(config: &Config) -> Self {
        Self {
            interval: config.maintenance_interval,
            retention_days: config.history_retention_days,
        }
    }
}

/// Background worker that trims history and records cache health.
pub struct MaintenanceWorker {
    orchestrator: Arc<AcquisitionOrchestrator>,
    config: MaintenanceConfig,
    shutdown: Arc<Notify>,
}

impl MaintenanceWorker {
    /// Create a new maintenance worker.
    pub fn new(orchestrator: Arc<AcquisitionOrchestrator>, config: MaintenanceConfig) -> Self {
        Self {
            orchestrator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the maintenance loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_days = self.config.retention_days,
            "Maintenance worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Maintenance worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_once().await;
                }
            }
        }
    }

    /// One cleanup and health-check pass. Returns the number of purged entries.
    pub async fn run_once(&self) -> u64 {
        let now = Utc::now();
        let purged = self
            .orchestrator
            .purge_history(now, self.config.retention_days)
            .await;

        let report = self.orchestrator.record_health(now).await;
        if report.healthy {
            debug!(
                cycle_key = %report.cycle_key,
                solution_available = report.solution_available,
                "Health check passed"
            );
        } else {
            warn!(
                backend = %report.cache_backend,
                error = report.cache_error.as_deref().unwrap_or("unknown"),
                "Cache health check failed"
            );
        }
        purged
    }
}
