// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request handlers.
//!
//! Transport-agnostic: each handler takes the shared state and a typed
//! request and returns a typed response. [`crate::routes`] adapts them to HTTP.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dailysolve_core::dedupe::RequestDeduplicator;
use dailysolve_core::orchestrator::{
    AcquisitionOrchestrator, AcquisitionOutcome, AcquisitionState, OrchestratorStats,
};
use dailysolve_core::solution::TriggerMarker;
use dailysolve_core::submission::{
    Credentials, SubmissionRecord, SubmissionStatus, SubmissionTracker, Submitter,
};
use dailysolve_core::{CachedSolution, CycleKey, RetrievalMethod};

use crate::error::ApiError;

/// Longest accepted username or password.
const MAX_CREDENTIAL_LEN: usize = 100;
/// Longest accepted user id.
const MAX_USER_ID_LEN: usize = 50;

/// Shared state for all handlers.
pub struct AppState {
    /// The acquisition pipeline.
    pub orchestrator: Arc<AcquisitionOrchestrator>,
    /// Submits solutions for users, if configured.
    pub submitter: Option<Arc<dyn Submitter>>,
    /// Last submission per user.
    pub tracker: Arc<SubmissionTracker>,
    /// Collapses concurrent cache-only reads.
    reads: RequestDeduplicator<Option<CachedSolution>, ApiError>,
    /// Collapses concurrent non-forced acquisitions.
    acquisitions: RequestDeduplicator<AcquisitionOutcome, ApiError>,
    /// When the server started (for uptime calculation).
    pub start_time: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Create the handler state.
    pub fn new(
        orchestrator: Arc<AcquisitionOrchestrator>,
        submitter: Option<Arc<dyn Submitter>>,
    ) -> Self {
        Self {
            orchestrator,
            submitter,
            tracker: Arc::new(SubmissionTracker::new()),
            reads: RequestDeduplicator::new(),
            acquisitions: RequestDeduplicator::new(),
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Seconds since startup.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// ============================================================================
// Shared response types
// ============================================================================

/// A solution as returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionView {
    pub code: String,
    pub problem_title: String,
    pub is_safe: bool,
    pub quality_score: f64,
    pub warnings: Vec<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub cycle_key: CycleKey,
    pub retrieval_method: RetrievalMethod,
    pub response_time_seconds: f64,
}

impl From<&CachedSolution> for SolutionView {
    fn from(s: &CachedSolution) -> Self {
        Self {
            code: s.code.clone(),
            problem_title: s.title.clone(),
            is_safe: s.is_safe,
            quality_score: s.quality_score,
            warnings: s.warnings.clone(),
            cached_at: s.cached_at(),
            cycle_key: s.cycle_key,
            retrieval_method: s.retrieval_method,
            response_time_seconds: s.response_time_seconds,
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ============================================================================
// Health Check
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,
    pub cache_backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_error: Option<String>,
    pub engine: String,
    pub cycle_key: CycleKey,
    pub solution_available: bool,
    pub fetch_in_progress: bool,
    pub version: String,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// Whether every check passed.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Handle health check request.
pub async fn handle_health(state: &AppState) -> HealthResponse {
    let report = state.orchestrator.health_report(Utc::now()).await;
    HealthResponse {
        status: if report.healthy { "healthy" } else { "unhealthy" }.to_string(),
        cache_backend: report.cache_backend,
        cache_error: report.cache_error,
        engine: state.orchestrator.engine_type().to_string(),
        cycle_key: report.cycle_key,
        solution_available: report.solution_available,
        fetch_in_progress: report.fetch_in_progress,
        version: state.version.clone(),
        uptime_secs: state.uptime_secs(),
        timestamp: report.checked_at,
    }
}

// ============================================================================
// Daily Solution (cache only)
// ============================================================================

/// Response of a cache-only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSolutionResponse {
    /// "success" or "cache_miss".
    pub status: String,
    pub cache_hit: bool,
    pub cycle_key: CycleKey,
    pub response_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<SolutionView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Serve the current cycle's solution from the cache. Never fetches.
pub async fn handle_get_daily_solution(state: &AppState) -> Result<CachedSolutionResponse, ApiError> {
    let started = Instant::now();
    let now = Utc::now();
    let key = state.orchestrator.clock().cycle_key(now);

    let orchestrator = state.orchestrator.clone();
    let cached = state
        .reads
        .dedupe(&format!("daily_solution_get:{}", key), move || async move {
            Ok(orchestrator.cached_solution(now).await)
        })
        .await?;

    let response = match cached {
        Some(solution) => CachedSolutionResponse {
            status: "success".to_string(),
            cache_hit: true,
            cycle_key: key,
            response_time_ms: elapsed_ms(started),
            solution: Some(SolutionView::from(&solution)),
            message: None,
        },
        None => CachedSolutionResponse {
            status: "cache_miss".to_string(),
            cache_hit: false,
            cycle_key: key,
            response_time_ms: elapsed_ms(started),
            solution: None,
            message: Some(format!(
                "No solution cached for {}. Use POST /solve-daily to request one.",
                key
            )),
        },
    };
    Ok(response)
}

// ============================================================================
// Solve Daily (acquire + submit)
// ============================================================================

/// Request to obtain today's solution and submit it for a user.
#[derive(Debug, Clone, Deserialize)]
pub struct SolveDailyRequest {
    pub username: String,
    pub password: String,
    pub user_id: String,
    #[serde(default)]
    pub force_refresh: bool,
}

impl SolveDailyRequest {
    /// Check field lengths and the user id format.
    pub fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [("username", &self.username), ("password", &self.password)] {
            let len = value.chars().count();
            if len == 0 || len > MAX_CREDENTIAL_LEN {
                return Err(ApiError::invalid_input(format!(
                    "{} must be between 1 and {} characters",
                    field, MAX_CREDENTIAL_LEN
                )));
            }
        }
        if self.user_id.chars().count() > MAX_USER_ID_LEN {
            return Err(ApiError::invalid_input(format!(
                "user_id must be at most {} characters",
                MAX_USER_ID_LEN
            )));
        }
        if !self.user_id.starts_with("user_") {
            return Err(ApiError::invalid_input("user_id must start with \"user_\""));
        }
        Ok(())
    }
}

/// Response of a solve request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveDailyResponse {
    pub status: String,
    pub acquisition: AcquisitionState,
    pub cache_hit: bool,
    pub response_time_ms: f64,
    pub solution: SolutionView,
    /// "scheduled" or "not_configured".
    pub submission: String,
}

/// Acquire today's solution and schedule a submission for the user.
pub async fn handle_solve_daily(
    state: &AppState,
    request: SolveDailyRequest,
) -> Result<SolveDailyResponse, ApiError> {
    request.validate()?;
    let started = Instant::now();
    let now = Utc::now();
    let key = state.orchestrator.clock().cycle_key(now);

    info!(
        user_id = %request.user_id,
        force_refresh = request.force_refresh,
        cycle_key = %key,
        "Daily challenge solve requested"
    );

    let outcome = if request.force_refresh {
        state.orchestrator.force_refresh(now).await
    } else {
        let orchestrator = state.orchestrator.clone();
        state
            .acquisitions
            .dedupe(&format!("fresh_solution_post:{}", key), move || async move {
                Ok(orchestrator.ensure_fresh_solution(now).await)
            })
            .await?
    };

    let acquisition = outcome.state();
    let solution = outcome.into_result()?;

    let submission = match &state.submitter {
        Some(submitter) => {
            schedule_submission(state, submitter.clone(), &request, key, &solution);
            "scheduled"
        }
        None => {
            warn!(user_id = %request.user_id, "No submitter configured, skipping submission");
            "not_configured"
        }
    };

    Ok(SolveDailyResponse {
        status: "success".to_string(),
        acquisition,
        cache_hit: matches!(
            acquisition,
            AcquisitionState::ServingFromCache | AcquisitionState::AwaitingInFlightFetch
        ),
        response_time_ms: elapsed_ms(started),
        solution: SolutionView::from(&solution),
        submission: submission.to_string(),
    })
}

fn schedule_submission(
    state: &AppState,
    submitter: Arc<dyn Submitter>,
    request: &SolveDailyRequest,
    key: CycleKey,
    solution: &CachedSolution,
) {
    let tracker = state.tracker.clone();
    let user_id = request.user_id.clone();
    let credentials = Credentials::new(request.username.clone(), request.password.clone());
    let code = solution.code.clone();

    tracker.update(&user_id, key, SubmissionStatus::Pending);
    tokio::spawn(async move {
        // Outcome and errors are recorded by the tracker.
        let _ = tracker
            .submit_tracked(submitter.as_ref(), &user_id, key, &code, &credentials)
            .await;
    });
}

// ============================================================================
// Admin Refresh
// ============================================================================

/// Response of an on-demand refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub status: String,
    pub cycle_key: CycleKey,
    pub response_time_ms: f64,
    pub solution: SolutionView,
}

/// Evict and refetch the current cycle's solution.
pub async fn handle_admin_refresh(state: &AppState) -> Result<RefreshResponse, ApiError> {
    let started = Instant::now();
    let now = Utc::now();
    let key = state.orchestrator.clock().cycle_key(now);
    let solution = state.orchestrator.force_refresh(now).await.into_result()?;
    Ok(RefreshResponse {
        status: "refreshed".to_string(),
        cycle_key: key,
        response_time_ms: elapsed_ms(started),
        solution: SolutionView::from(&solution),
    })
}

// ============================================================================
// Cache Stats
// ============================================================================

/// Summary of the cached solution, without the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionSummary {
    pub title: String,
    pub quality_score: f64,
    pub is_safe: bool,
    pub retrieval_method: RetrievalMethod,
    pub cached_at: Option<DateTime<Utc>>,
    pub code_length: usize,
}

/// Cache and pipeline statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub cycle_key: CycleKey,
    pub timezone: String,
    pub ttl_seconds: Option<u64>,
    pub seconds_until_next_cycle: u64,
    pub next_cycle_start: DateTime<Utc>,
    pub solution: Option<SolutionSummary>,
    pub fetch_in_progress: bool,
    pub cache_backend: String,
    pub counters: OrchestratorStats,
    pub hit_rate: f64,
    pub requests_in_flight: usize,
    pub tracked_users: usize,
}

/// Report cache contents and counters.
pub async fn handle_cache_stats(state: &AppState) -> CacheStatsResponse {
    let now = Utc::now();
    let orchestrator = &state.orchestrator;
    let clock = orchestrator.clock();
    let counters = orchestrator.stats();

    CacheStatsResponse {
        cycle_key: clock.cycle_key(now),
        timezone: clock.timezone().to_string(),
        ttl_seconds: orchestrator.solution_ttl(now).await,
        seconds_until_next_cycle: clock.seconds_until_next_cycle(now),
        next_cycle_start: clock.next_cycle_start(now),
        solution: orchestrator
            .cached_solution(now)
            .await
            .map(|s| SolutionSummary {
                title: s.title.clone(),
                quality_score: s.quality_score,
                is_safe: s.is_safe,
                retrieval_method: s.retrieval_method,
                cached_at: s.cached_at(),
                code_length: s.code.chars().count(),
            }),
        fetch_in_progress: orchestrator.fetch_in_progress(),
        cache_backend: orchestrator.cache().backend_type().to_string(),
        hit_rate: counters.hit_rate(),
        counters,
        requests_in_flight: state.reads.in_flight() + state.acquisitions.in_flight(),
        tracked_users: state.tracker.len(),
    }
}

// ============================================================================
// Trigger Marker
// ============================================================================

/// Current cycle's trigger marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub cycle_key: CycleKey,
    pub marker: Option<TriggerMarker>,
}

/// Inspect the current cycle's trigger marker.
pub async fn handle_get_trigger(state: &AppState) -> TriggerResponse {
    let now = Utc::now();
    TriggerResponse {
        cycle_key: state.orchestrator.clock().cycle_key(now),
        marker: state.orchestrator.trigger_marker(now).await,
    }
}

/// Result of deleting the trigger marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResetResponse {
    pub cycle_key: CycleKey,
    pub removed: bool,
}

/// Delete the current cycle's trigger marker.
pub async fn handle_reset_trigger(state: &AppState) -> TriggerResetResponse {
    let now = Utc::now();
    TriggerResetResponse {
        cycle_key: state.orchestrator.clock().cycle_key(now),
        removed: state.orchestrator.reset_trigger(now).await,
    }
}

// ============================================================================
// Submission Status
// ============================================================================

/// Last submission status of `user_id`.
pub fn handle_submission_status(
    state: &AppState,
    user_id: &str,
) -> Result<SubmissionRecord, ApiError> {
    state
        .tracker
        .get(user_id)
        .ok_or_else(|| ApiError::not_found(format!("No submission recorded for {}", user_id)))
}
