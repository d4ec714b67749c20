// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Acquisition orchestrator.
//!
//! Decides, per call, whether the current cycle's solution can be served from
//! the cache, whether to wait for a fetch someone else started, or whether to
//! start one. It owns the two guarantees the rest of the service relies on:
//!
//! - within a process the workflow engine runs at most once at a time, and a
//!   caller that queued behind a successful fetch is served its result;
//! - once any process has attempted a fetch for a cycle (the trigger marker
//!   exists), a plain cache miss does not start another one. Only a forced or
//!   scheduled refresh, or resetting the marker, allows a second attempt.
//!
//! ```text
//!            ┌──────────────┐ hit
//!  acquire ─►│ read cache   │─────────────────────────────► ServedCache
//!            └──────┬───────┘
//!                   │ miss, fetch running
//!                   ▼
//!            ┌──────────────┐ hit
//!            │ bounded wait │─────────────────────────────► ServedCache (waited)
//!            └──────┬───────┘
//!                   │ miss
//!                   ▼
//!            ┌──────────────┐ present
//!            │ trigger mark │─────────────────────────────► Suppressed
//!            └──────┬───────┘
//!                   │ absent
//!                   ▼
//!            ┌──────────────┐  recheck hit                ServedCache
//!            │ FetchGuard   │──────────────────────────────►
//!            │  mark, fetch │  ok ─► score ─► write        Fresh
//!            │  (timeout)   │  err ─────────────────────── ► Failed
//!            └──────────────┘
//! ```
//!
//! A failed attempt keeps its marker (state `failed`), so a burst of users
//! after an engine outage does not hammer the engine; the scheduled refresh
//! retries at the next cutover.
//!
//! Every attempt (eviction, guard, engine call, marker updates) runs on its
//! own task. Dropping a caller never leaves an attempt half done.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{DurableCache, SOLUTION_NAMESPACE, SYSTEM_NAMESPACE, TRIGGER_NAMESPACE};
use crate::clock::{CycleClock, CycleKey};
use crate::config::Config;
use crate::engine::{EngineError, WorkflowEngine};
use crate::error::{Error, Result};
use crate::quality::QualityScorer;
use crate::single_flight::FetchGuard;
use crate::solution::{
    CachedSolution, RetrievalMethod, TriggerMarker, TriggerSource, TriggerState, epoch_seconds,
};

/// Generated code must be longer than this once trimmed.
pub const MIN_CODE_CHARS: usize = 30;

/// How long a recorded health check stays in the cache.
const HEALTH_RECORD_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Timing knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard bound on one engine fetch.
    pub fetch_timeout: Duration,
    /// Bounded wait on someone else's in-flight fetch.
    pub in_flight_wait: Duration,
    /// Retry hint for suppressed callers.
    pub retry_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(300),
            in_flight_wait: Duration::from_secs(3),
            retry_after: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout,
            in_flight_wait: config.in_flight_wait,
            retry_after: config.retry_after,
        }
    }
}

/// Why a fetch produced no solution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchFailure {
    /// The engine did not answer within the fetch timeout.
    #[error("workflow engine timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The engine answered with too little content.
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),
    /// The engine reported an error.
    #[error("workflow engine error: {0}")]
    Engine(EngineError),
}

impl FetchFailure {
    /// Stable short name for logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Timeout(_) => "timeout",
            FetchFailure::InvalidArtifact(_) => "invalid_content",
            FetchFailure::Engine(_) => "engine_error",
        }
    }
}

/// Why a call did not start a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    /// A fetch is still running past the bounded wait.
    FetchInProgress,
    /// A fetch was already attempted this cycle.
    AlreadyAttempted,
}

/// Result of one acquisition.
#[derive(Debug, Clone)]
pub enum AcquisitionOutcome {
    /// The cached solution, possibly after waiting for another caller's fetch.
    ServedCache {
        solution: CachedSolution,
        waited: bool,
    },
    /// This call fetched the solution.
    Fresh(CachedSolution),
    /// No solution cached and a new fetch was not allowed.
    Suppressed {
        cycle_key: CycleKey,
        reason: SuppressionReason,
        retry_after: Duration,
    },
    /// This call fetched and failed. Nothing was cached.
    Failed(FetchFailure),
}

/// Path an acquisition took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    ServingFromCache,
    AwaitingInFlightFetch,
    FetchingFresh,
    Suppressed,
    Failed,
}

impl AcquisitionOutcome {
    /// The path this outcome came from.
    pub fn state(&self) -> AcquisitionState {
        match self {
            AcquisitionOutcome::ServedCache { waited: false, .. } => {
                AcquisitionState::ServingFromCache
            }
            AcquisitionOutcome::ServedCache { waited: true, .. } => {
                AcquisitionState::AwaitingInFlightFetch
            }
            AcquisitionOutcome::Fresh(_) => AcquisitionState::FetchingFresh,
            AcquisitionOutcome::Suppressed { .. } => AcquisitionState::Suppressed,
            AcquisitionOutcome::Failed(_) => AcquisitionState::Failed,
        }
    }

    /// The solution, if there is one.
    pub fn solution(&self) -> Option<&CachedSolution> {
        match self {
            AcquisitionOutcome::ServedCache { solution, .. } | AcquisitionOutcome::Fresh(solution) => {
                Some(solution)
            }
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping non-success outcomes onto [`Error`].
    pub fn into_result(self) -> Result<CachedSolution> {
        match self {
            AcquisitionOutcome::ServedCache { solution, .. } | AcquisitionOutcome::Fresh(solution) => {
                Ok(solution)
            }
            AcquisitionOutcome::Suppressed {
                cycle_key,
                retry_after,
                ..
            } => Err(Error::DuplicateFetchSuppressed {
                cycle_key,
                retry_after,
            }),
            AcquisitionOutcome::Failed(FetchFailure::Timeout(after)) => {
                Err(Error::EngineTimeout(after))
            }
            AcquisitionOutcome::Failed(FetchFailure::InvalidArtifact(reason)) => {
                Err(Error::InvalidArtifact(reason))
            }
            AcquisitionOutcome::Failed(FetchFailure::Engine(e)) => Err(Error::Engine(e)),
        }
    }
}

/// Counters since startup.
#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    waited_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    suppressed: AtomicU64,
    cache_write_failures: AtomicU64,
}

/// Snapshot of the orchestrator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub cache_hits: u64,
    pub waited_hits: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub suppressed: u64,
    pub cache_write_failures: u64,
}

impl OrchestratorStats {
    /// Fraction of acquisitions answered from the cache.
    pub fn hit_rate(&self) -> f64 {
        let served = self.cache_hits + self.waited_hits;
        let total = served + self.fetches + self.suppressed;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

/// Health of the pipeline at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub cache_backend: String,
    pub cache_error: Option<String>,
    pub cycle_key: CycleKey,
    pub solution_available: bool,
    pub fetch_in_progress: bool,
    pub checked_at: DateTime<Utc>,
}

/// How an attempt treats the current cache entry and trigger marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Re-check cache and marker inside the guard, fetch only if both are absent.
    IfAbsent,
    /// Ignore cache and marker, replace the entry on success.
    Replace,
    /// Delete the entry, then fetch as [`FetchMode::Replace`].
    EvictAndReplace,
}

impl FetchMode {
    fn forced(self) -> bool {
        self != FetchMode::IfAbsent
    }
}

/// The pipeline's single entry point for obtaining the daily solution.
///
/// Cheap to clone. Clones share the fetch guard, the counters and the cache.
#[derive(Clone)]
pub struct AcquisitionOrchestrator {
    cache: DurableCache,
    clock: CycleClock,
    engine: Arc<dyn WorkflowEngine>,
    guard: Arc<FetchGuard>,
    scorer: Arc<QualityScorer>,
    config: OrchestratorConfig,
    counters: Arc<Counters>,
}

impl AcquisitionOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        cache: DurableCache,
        clock: CycleClock,
        engine: Arc<dyn WorkflowEngine>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let scorer = QualityScorer::new()
            .map_err(|e| Error::Other(format!("failed to compile quality rules: {}", e)))?;
        Ok(Self {
            cache,
            clock,
            engine,
            guard: Arc::new(FetchGuard::new()),
            scorer: Arc::new(scorer),
            config,
            counters: Arc::new(Counters::default()),
        })
    }

    /// The cycle clock in use.
    pub fn clock(&self) -> &CycleClock {
        &self.clock
    }

    /// The cache in use.
    pub fn cache(&self) -> &DurableCache {
        &self.cache
    }

    /// Name of the configured engine.
    pub fn engine_type(&self) -> &'static str {
        self.engine.engine_type()
    }

    /// Whether a fetch is running right now.
    pub fn fetch_in_progress(&self) -> bool {
        self.guard.fetch_in_progress()
    }

    /// Retry hint given to suppressed callers.
    pub fn retry_after(&self) -> Duration {
        self.config.retry_after
    }

    /// Serve the current cycle's solution, fetching it if allowed.
    pub async fn ensure_fresh_solution(&self, now: DateTime<Utc>) -> AcquisitionOutcome {
        self.acquire(now, TriggerSource::User).await
    }

    /// Non-forced acquisition on behalf of `source`.
    pub async fn acquire(&self, now: DateTime<Utc>, source: TriggerSource) -> AcquisitionOutcome {
        let key = self.clock.cycle_key(now);

        if let Some(solution) = self.cached_solution(now).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return AcquisitionOutcome::ServedCache {
                solution,
                waited: false,
            };
        }

        // At most one bounded wait per call.
        let mut waited = false;
        if self.guard.fetch_in_progress() {
            waited = true;
            if let Some(solution) = self.wait_for_in_flight(now).await {
                return AcquisitionOutcome::ServedCache {
                    solution,
                    waited: true,
                };
            }
        }

        if let Some(marker) = self.read_marker(key).await {
            if !waited {
                // The marker may belong to a fetch that started after our first look.
                if self.guard.fetch_in_progress() {
                    if let Some(solution) = self.wait_for_in_flight(now).await {
                        return AcquisitionOutcome::ServedCache {
                            solution,
                            waited: true,
                        };
                    }
                } else if let Some(solution) = self.cached_solution(now).await {
                    self.counters.waited_hits.fetch_add(1, Ordering::Relaxed);
                    return AcquisitionOutcome::ServedCache {
                        solution,
                        waited: true,
                    };
                }
            }
            return self.suppressed(key, &marker);
        }

        self.fetch_exclusive(now, key, source, FetchMode::IfAbsent).await
    }

    /// Evict the current solution and fetch a new one, ignoring the marker.
    ///
    /// The attempt runs to completion even if the returned future is dropped.
    pub async fn force_refresh(&self, now: DateTime<Utc>) -> AcquisitionOutcome {
        let key = self.clock.cycle_key(now);
        info!(cycle_key = %key, "Force refresh requested");
        self.fetch_exclusive(now, key, TriggerSource::Admin, FetchMode::EvictAndReplace).await
    }

    /// Fetch a new solution, ignoring cache and marker. The current entry is
    /// only replaced when the fetch succeeds.
    pub async fn scheduled_refresh(&self, now: DateTime<Utc>) -> AcquisitionOutcome {
        let key = self.clock.cycle_key(now);
        info!(cycle_key = %key, "Scheduled refresh starting");
        let outcome = self
            .fetch_exclusive(now, key, TriggerSource::Scheduled, FetchMode::Replace)
            .await;
        if let AcquisitionOutcome::Failed(failure) = &outcome {
            error!(
                cycle_key = %key,
                kind = failure.kind(),
                error = %failure,
                "Scheduled refresh failed, keeping existing cache entry"
            );
        }
        outcome
    }

    /// Current cycle's solution, if cached and written during this cycle.
    pub async fn cached_solution(&self, now: DateTime<Utc>) -> Option<CachedSolution> {
        let key = self.clock.cycle_key(now);
        let solution: CachedSolution =
            self.cache.get(SOLUTION_NAMESPACE, &key.to_string()).await?;

        if solution.cycle_key != key || solution.is_stale(self.clock.cycle_start(key)) {
            debug!(cycle_key = %key, cached_at = solution.cached_at_epoch, "Ignoring stale cache entry");
            return None;
        }
        Some(solution)
    }

    /// Remaining TTL of the current cycle's solution.
    pub async fn solution_ttl(&self, now: DateTime<Utc>) -> Option<u64> {
        let key = self.clock.cycle_key(now);
        self.cache.ttl(SOLUTION_NAMESPACE, &key.to_string()).await
    }

    /// Trigger marker of the current cycle.
    pub async fn trigger_marker(&self, now: DateTime<Utc>) -> Option<TriggerMarker> {
        self.read_marker(self.clock.cycle_key(now)).await
    }

    /// Delete the current cycle's trigger marker.
    pub async fn reset_trigger(&self, now: DateTime<Utc>) -> bool {
        let key = self.clock.cycle_key(now);
        let removed = self.cache.delete(TRIGGER_NAMESPACE, &key.to_string()).await;
        info!(cycle_key = %key, removed, "Trigger marker reset");
        removed
    }

    /// Remove solutions and markers of cycles that fell out of retention.
    ///
    /// Sweeps the week of cycles just past `retention_days`; older entries
    /// have long expired through their TTL.
    pub async fn purge_history(&self, now: DateTime<Utc>, retention_days: u64) -> u64 {
        let current = self.clock.cycle_key(now);
        let mut removed = 0;
        for days in (retention_days + 1)..=(retention_days + 7) {
            let old = current.days_before(days).to_string();
            removed += self.cache.delete_by_prefix(SOLUTION_NAMESPACE, &old).await;
            removed += self.cache.delete_by_prefix(TRIGGER_NAMESPACE, &old).await;
        }
        if removed > 0 {
            info!(removed, retention_days, "Purged historical cache entries");
        }
        removed
    }

    /// Check the cache and report whether the current solution is available.
    pub async fn health_report(&self, now: DateTime<Utc>) -> HealthReport {
        let cache_error = self.cache.health_check().await.err().map(|e| e.to_string());
        HealthReport {
            healthy: cache_error.is_none(),
            cache_backend: self.cache.backend_type().to_string(),
            cache_error,
            cycle_key: self.clock.cycle_key(now),
            solution_available: self.cached_solution(now).await.is_some(),
            fetch_in_progress: self.guard.fetch_in_progress(),
            checked_at: now,
        }
    }

    /// Run [`health_report`](Self::health_report) and persist the result.
    pub async fn record_health(&self, now: DateTime<Utc>) -> HealthReport {
        let report = self.health_report(now).await;
        self.cache
            .set(SYSTEM_NAMESPACE, "last_health_check", &report, HEALTH_RECORD_TTL)
            .await;
        report
    }

    /// Most recently persisted health report.
    pub async fn last_health_check(&self) -> Option<HealthReport> {
        self.cache.get(SYSTEM_NAMESPACE, "last_health_check").await
    }

    /// Counter snapshot.
    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            waited_hits: c.waited_hits.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            cache_write_failures: c.cache_write_failures.load(Ordering::Relaxed),
        }
    }

    async fn wait_for_in_flight(&self, now: DateTime<Utc>) -> Option<CachedSolution> {
        if let Err(e) = self.guard.wait_idle(self.config.in_flight_wait).await {
            debug!(error = %e, "Still waiting on in-flight fetch, re-evaluating");
        }
        let solution = self.cached_solution(now).await?;
        self.counters.waited_hits.fetch_add(1, Ordering::Relaxed);
        Some(solution)
    }

    async fn read_marker(&self, key: CycleKey) -> Option<TriggerMarker> {
        self.cache.get(TRIGGER_NAMESPACE, &key.to_string()).await
    }

    fn suppressed(&self, key: CycleKey, marker: &TriggerMarker) -> AcquisitionOutcome {
        let reason = if self.guard.fetch_in_progress() {
            SuppressionReason::FetchInProgress
        } else {
            SuppressionReason::AlreadyAttempted
        };
        self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
        warn!(
            cycle_key = %key,
            marker_source = ?marker.source,
            marker_state = ?marker.state,
            reason = ?reason,
            "Duplicate fetch suppressed"
        );
        AcquisitionOutcome::Suppressed {
            cycle_key: key,
            reason,
            retry_after: self.config.retry_after,
        }
    }

    /// Run one attempt on its own task. Dropping the caller neither cancels
    /// the attempt nor leaves the guard held.
    async fn fetch_exclusive(
        &self,
        now: DateTime<Utc>,
        key: CycleKey,
        source: TriggerSource,
        mode: FetchMode,
    ) -> AcquisitionOutcome {
        let this = self.clone();
        let attempt = tokio::spawn(async move { this.run_attempt(now, key, source, mode).await });
        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(cycle_key = %key, error = %e, "Fetch task did not complete");
                AcquisitionOutcome::Failed(FetchFailure::Engine(EngineError::Other(format!(
                    "fetch task did not complete: {}",
                    e
                ))))
            }
        }
    }

    async fn run_attempt(
        &self,
        now: DateTime<Utc>,
        key: CycleKey,
        source: TriggerSource,
        mode: FetchMode,
    ) -> AcquisitionOutcome {
        if mode == FetchMode::EvictAndReplace {
            let evicted = self.cache.delete(SOLUTION_NAMESPACE, &key.to_string()).await;
            debug!(cycle_key = %key, evicted, "Evicted current solution");
        }

        let forced = mode.forced();
        let precheck = async {
            if forced {
                return None;
            }
            if let Some(solution) = self.cached_solution(now).await {
                self.counters.waited_hits.fetch_add(1, Ordering::Relaxed);
                return Some(AcquisitionOutcome::ServedCache {
                    solution,
                    waited: true,
                });
            }
            let marker = self.read_marker(key).await?;
            Some(self.suppressed(key, &marker))
        };

        self.guard
            .with_exclusive_fetch(precheck, self.fetch(now, key, source, forced))
            .await
    }

    async fn fetch(
        &self,
        now: DateTime<Utc>,
        key: CycleKey,
        source: TriggerSource,
        forced: bool,
    ) -> AcquisitionOutcome {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        let marker = TriggerMarker::attempted(key, source, now);
        self.write_marker(&marker, now).await;
        info!(
            cycle_key = %key,
            source = ?source,
            forced,
            engine = self.engine.engine_type(),
            "Fetching fresh solution"
        );

        let started = Instant::now();
        let timeout = self.config.fetch_timeout;
        let fetched = tokio::time::timeout(timeout, self.engine.fetch(&key.to_string(), timeout)).await;
        let elapsed = started.elapsed();
        let finished_at = now + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        let generated = match fetched {
            Ok(Ok(generated)) => generated,
            Ok(Err(EngineError::Timeout(after))) => {
                return self.fail(&marker, finished_at, FetchFailure::Timeout(after)).await;
            }
            Ok(Err(e)) => return self.fail(&marker, finished_at, FetchFailure::Engine(e)).await,
            Err(_) => return self.fail(&marker, finished_at, FetchFailure::Timeout(timeout)).await,
        };

        let code = generated.code.trim();
        let chars = code.chars().count();
        if chars <= MIN_CODE_CHARS {
            let failure = FetchFailure::InvalidArtifact(format!(
                "code has {} characters, need more than {}",
                chars, MIN_CODE_CHARS
            ));
            return self.fail(&marker, finished_at, failure).await;
        }

        let report = self.scorer.score(code);
        let mut warnings = generated.warnings;
        warnings.extend(report.warnings);

        let mut solution = CachedSolution {
            code: code.to_string(),
            title: generated.title,
            is_safe: generated.is_safe && report.is_safe,
            quality_score: report.quality_score,
            warnings,
            cached_at_epoch: epoch_seconds(finished_at),
            retrieval_method: source.retrieval_method(forced),
            response_time_seconds: elapsed.as_secs_f64(),
            cycle_key: key,
        };

        let ttl = Duration::from_secs(self.clock.seconds_until_cycle_end(key, finished_at));
        if self
            .cache
            .set(SOLUTION_NAMESPACE, &key.to_string(), &solution, ttl)
            .await
        {
            info!(
                cycle_key = %key,
                ttl_secs = ttl.as_secs(),
                quality_score = solution.quality_score,
                is_safe = solution.is_safe,
                response_time_secs = solution.response_time_seconds,
                "Cached fresh solution"
            );
        } else {
            self.counters
                .cache_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(cycle_key = %key, "Could not cache fresh solution, serving it uncached");
            solution.retrieval_method = RetrievalMethod::EmergencyFallback;
        }

        self.write_marker(&marker.with_state(TriggerState::Succeeded), finished_at)
            .await;
        AcquisitionOutcome::Fresh(solution)
    }

    async fn fail(
        &self,
        marker: &TriggerMarker,
        at: DateTime<Utc>,
        failure: FetchFailure,
    ) -> AcquisitionOutcome {
        self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
        error!(
            cycle_key = %marker.cycle_key,
            kind = failure.kind(),
            error = %failure,
            "Fetch failed"
        );
        self.write_marker(&marker.with_state(TriggerState::Failed), at)
            .await;
        AcquisitionOutcome::Failed(failure)
    }

    async fn write_marker(&self, marker: &TriggerMarker, at: DateTime<Utc>) {
        let ttl = Duration::from_secs(self.clock.seconds_until_cycle_end(marker.cycle_key, at));
        if !self
            .cache
            .set(TRIGGER_NAMESPACE, &marker.cycle_key.to_string(), marker, ttl)
            .await
        {
            warn!(cycle_key = %marker.cycle_key, "Could not persist trigger marker");
        }
    }
}
