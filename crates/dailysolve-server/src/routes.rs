// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::handlers::{self, AppState, SolveDailyRequest};

/// Build the router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/solve-daily", get(get_daily_solution).post(solve_daily))
        .route("/admin/refresh", post(admin_refresh))
        .route("/cache/stats", get(cache_stats))
        .route(
            "/debug/daily-trigger",
            get(get_daily_trigger).delete(reset_daily_trigger),
        )
        .route("/automation/{user_id}", get(submission_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = handlers::handle_health(&state).await;
    let status = if response.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn get_daily_solution(
    State(state): State<Arc<AppState>>,
) -> Result<Json<handlers::CachedSolutionResponse>, ApiError> {
    handlers::handle_get_daily_solution(&state).await.map(Json)
}

async fn solve_daily(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SolveDailyRequest>,
) -> Result<Json<handlers::SolveDailyResponse>, ApiError> {
    handlers::handle_solve_daily(&state, request).await.map(Json)
}

async fn admin_refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<handlers::RefreshResponse>, ApiError> {
    handlers::handle_admin_refresh(&state).await.map(Json)
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<handlers::CacheStatsResponse> {
    Json(handlers::handle_cache_stats(&state).await)
}

async fn get_daily_trigger(State(state): State<Arc<AppState>>) -> Json<handlers::TriggerResponse> {
    Json(handlers::handle_get_trigger(&state).await)
}

async fn reset_daily_trigger(
    State(state): State<Arc<AppState>>,
) -> Json<handlers::TriggerResetResponse> {
    Json(handlers::handle_reset_trigger(&state).await)
}

async fn submission_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<dailysolve_core::submission::SubmissionRecord>, ApiError> {
    handlers::handle_submission_status(&state, &user_id).map(Json)
}
