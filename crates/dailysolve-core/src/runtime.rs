// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for dailysolve.
//!
//! [`SolverRuntime`] wires the orchestrator to its background work: the
//! scheduled refresh, the maintenance worker, and an optional startup warm-up.
//! The HTTP server is one embedder; tests are another.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dailysolve_core::cache::RedisStore;
//! use dailysolve_core::engine::{WebhookEngine, WebhookEngineConfig};
//! use dailysolve_core::runtime::SolverRuntime;
//! use dailysolve_core::Config;
//!
//! let config = Config::from_env()?;
//! let store = RedisStore::connect(&config.redis_url, config.cache_op_timeout).await?;
//! let engine = WebhookEngine::new(WebhookEngineConfig::from_config(&config))?;
//!
//! let runtime = SolverRuntime::builder()
//!     .config(config)
//!     .store(Arc::new(store))
//!     .engine(Arc::new(engine))
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ... serve requests through runtime.orchestrator() ...
//!
//! runtime.shutdown().await;
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::{CacheStore, DurableCache};
use crate::config::Config;
use crate::engine::WorkflowEngine;
use crate::error::{Error, Result};
use crate::maintenance::{MaintenanceConfig, MaintenanceWorker};
use crate::orchestrator::{AcquisitionOrchestrator, AcquisitionState, OrchestratorConfig};
use crate::scheduler::{RefreshSchedule, RefreshScheduler};
use crate::solution::TriggerSource;
use crate::submission::{ProcessSubmitter, Submitter};

/// Bound on one run of the external submit command.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Builder for creating a [`SolverRuntime`].
#[derive(Default)]
pub struct SolverRuntimeBuilder {
    config: Option<Config>,
    store: Option<Arc<dyn CacheStore>>,
    engine: Option<Arc<dyn WorkflowEngine>>,
    submitter: Option<Arc<dyn Submitter>>,
}

impl SolverRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    ///
    /// Default: [`Config::default()`]
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the cache store (required).
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the workflow engine (required).
    pub fn engine(mut self, engine: Arc<dyn WorkflowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the submitter.
    ///
    /// Default: a [`ProcessSubmitter`] when `submit_command` is configured,
    /// otherwise none.
    pub fn submitter(mut self, submitter: Arc<dyn Submitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Validate the configuration and assemble the orchestrator.
    pub fn build(self) -> Result<SolverRuntimeConfig> {
        let config = self.config.unwrap_or_default();
        let store = self
            .store
            .ok_or_else(|| Error::Other("store is required".to_string()))?;
        let engine = self
            .engine
            .ok_or_else(|| Error::Other("engine is required".to_string()))?;

        let schedule = RefreshSchedule::from_config(&config)?;
        let orchestrator = AcquisitionOrchestrator::new(
            DurableCache::new(store, config.key_prefix.clone()),
            config.clock()?,
            engine,
            OrchestratorConfig::from(&config),
        )?;

        let submitter = self.submitter.or_else(|| {
            config
                .submit_command
                .as_deref()
                .and_then(|cmd| ProcessSubmitter::from_command_line(cmd, SUBMIT_TIMEOUT))
                .map(|s| Arc::new(s) as Arc<dyn Submitter>)
        });

        Ok(SolverRuntimeConfig {
            orchestrator: Arc::new(orchestrator),
            schedule,
            submitter,
            maintenance: MaintenanceConfig::from(&config),
            warm_on_startup: config.warm_on_startup,
        })
    }
}

/// Validated runtime, ready to [`start`](Self::start).
pub struct SolverRuntimeConfig {
    orchestrator: Arc<AcquisitionOrchestrator>,
    schedule: RefreshSchedule,
    submitter: Option<Arc<dyn Submitter>>,
    maintenance: MaintenanceConfig,
    warm_on_startup: bool,
}

impl SolverRuntimeConfig {
    /// The orchestrator, usable before the background tasks start.
    pub fn orchestrator(&self) -> &Arc<AcquisitionOrchestrator> {
        &self.orchestrator
    }

    /// Spawn the background tasks.
    pub async fn start(self) -> Result<SolverRuntime> {
        let scheduler = RefreshScheduler::new(self.orchestrator.clone(), self.schedule);
        let scheduler_shutdown = scheduler.shutdown_handle();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        let maintenance = MaintenanceWorker::new(self.orchestrator.clone(), self.maintenance);
        let maintenance_shutdown = maintenance.shutdown_handle();
        let maintenance_handle = tokio::spawn(async move {
            maintenance.run().await;
        });

        let warm_handle = if self.warm_on_startup {
            let orchestrator = self.orchestrator.clone();
            Some(tokio::spawn(async move {
                warm_cache(&orchestrator).await;
            }))
        } else {
            None
        };

        info!(
            engine = self.orchestrator.engine_type(),
            cache_backend = self.orchestrator.cache().backend_type(),
            submitter = self.submitter.as_ref().map(|s| s.submitter_type()),
            warm_on_startup = self.warm_on_startup,
            "SolverRuntime started"
        );

        Ok(SolverRuntime {
            orchestrator: self.orchestrator,
            submitter: self.submitter,
            scheduler_handle,
            maintenance_handle,
            warm_handle,
            scheduler_shutdown,
            maintenance_shutdown,
        })
    }
}

/// A running pipeline with its background tasks.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SolverRuntime {
    orchestrator: Arc<AcquisitionOrchestrator>,
    submitter: Option<Arc<dyn Submitter>>,
    scheduler_handle: JoinHandle<()>,
    maintenance_handle: JoinHandle<()>,
    warm_handle: Option<JoinHandle<()>>,
    scheduler_shutdown: Arc<Notify>,
    maintenance_shutdown: Arc<Notify>,
}

impl SolverRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SolverRuntimeBuilder {
        SolverRuntimeBuilder::new()
    }

    /// Shared orchestrator.
    pub fn orchestrator(&self) -> Arc<AcquisitionOrchestrator> {
        self.orchestrator.clone()
    }

    /// Configured submitter, if any.
    pub fn submitter(&self) -> Option<Arc<dyn Submitter>> {
        self.submitter.clone()
    }

    /// Check if the background tasks are still running.
    pub fn is_running(&self) -> bool {
        !self.scheduler_handle.is_finished() && !self.maintenance_handle.is_finished()
    }

    /// Stop the background tasks and wait for them.
    ///
    /// A startup warm-up still running is abandoned.
    pub async fn shutdown(self) {
        info!("SolverRuntime shutting down...");

        self.scheduler_shutdown.notify_one();
        self.maintenance_shutdown.notify_one();

        if let Some(warm) = self.warm_handle {
            warm.abort();
        }

        if let Err(e) = self.scheduler_handle.await {
            error!("Refresh scheduler task panicked: {}", e);
        }
        if let Err(e) = self.maintenance_handle.await {
            error!("Maintenance worker task panicked: {}", e);
        }

        info!("SolverRuntime shutdown complete");
    }
}

/// Non-forced acquisition so the first user of the cycle hits a warm cache.
async fn warm_cache(orchestrator: &AcquisitionOrchestrator) {
    let outcome = orchestrator.acquire(Utc::now(), TriggerSource::Startup).await;
    match outcome.state() {
        AcquisitionState::FetchingFresh => info!("Startup warm-up fetched today's solution"),
        AcquisitionState::ServingFromCache | AcquisitionState::AwaitingInFlightFetch => {
            info!("Startup warm-up found today's solution cached")
        }
        AcquisitionState::Suppressed => {
            info!("Startup warm-up skipped, a fetch was already attempted this cycle")
        }
        AcquisitionState::Failed => warn!("Startup warm-up fetch failed"),
    }
}
