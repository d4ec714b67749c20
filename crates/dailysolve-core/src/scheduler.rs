// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scheduled refresh.
//!
//! Fires once per cycle (by default at the cutover hour) and runs a
//! refresh that ignores both the cache and the trigger marker, so every cycle
//! gets at least one fetch attempt even if every user-triggered one failed.
//! A failed refresh leaves the previous entry where it is.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::config::{Config, ConfigError};
use crate::orchestrator::{AcquisitionOrchestrator, AcquisitionOutcome};

/// Cron schedule evaluated in a fixed time zone.
pub struct RefreshSchedule {
    cron: Cron,
    expression: String,
    timezone: Tz,
}

impl RefreshSchedule {
    /// Parse a five-field cron expression.
    pub fn new(expression: &str, timezone: Tz) -> Result<Self, ConfigError> {
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| ConfigError::InvalidCron(expression.to_string(), e.to_string()))?;
        Ok(Self {
            cron,
            expression: expression.to_string(),
            timezone,
        })
    }

    /// Schedule from the service configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(&config.refresh_cron, config.timezone)
    }

    /// The cron expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.timezone);
        self.cron
            .find_next_occurrence(&local, false)
            .ok()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// Background worker running the scheduled refresh.
pub struct RefreshScheduler {
    orchestrator: Arc<AcquisitionOrchestrator>,
    schedule: RefreshSchedule,
    shutdown: Arc<Notify>,
}

impl RefreshScheduler {
    /// Create a new refresh scheduler.
    pub fn new(orchestrator: Arc<AcquisitionOrchestrator>, schedule: RefreshSchedule) -> Self {
        Self {
            orchestrator,
            schedule,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(self) {
        info!(
            cron = %self.schedule.expression(),
            timezone = %self.schedule.timezone,
            "Refresh scheduler started"
        );

        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.next_after(now) else {
                error!(cron = %self.schedule.expression(), "Schedule has no future firing, stopping");
                break;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, delay_secs = delay.as_secs(), "Next scheduled refresh");

            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!("Refresh scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    // The timer may fire a little early relative to the wall clock.
                    self.fire(Utc::now().max(next)).await;
                }
            }
        }
    }

    /// Run one scheduled refresh as of `now`.
    pub async fn fire(&self, now: DateTime<Utc>) -> AcquisitionOutcome {
        let outcome = self.orchestrator.scheduled_refresh(now).await;
        if let Some(solution) = outcome.solution() {
            info!(
                cycle_key = %solution.cycle_key,
                title = %solution.title,
                "Scheduled refresh complete"
            );
        }
        outcome
    }
}
