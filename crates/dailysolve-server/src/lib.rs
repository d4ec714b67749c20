// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dailysolve Server - HTTP API for the daily solution pipeline
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Cache health, fetch-in-progress flag, version, uptime |
//! | `GET` | `/solve-daily` | Cached solution only, never fetches |
//! | `POST` | `/solve-daily` | Acquire the solution and submit it for a user |
//! | `POST` | `/admin/refresh` | Evict and refetch the current solution |
//! | `GET` | `/cache/stats` | Cycle, TTL, solution summary, counters |
//! | `GET` | `/debug/daily-trigger` | Current cycle's trigger marker |
//! | `DELETE` | `/debug/daily-trigger` | Remove the trigger marker |
//! | `GET` | `/automation/{user_id}` | Last submission status of a user |
//!
//! Errors are JSON `{code, message}` bodies; see [`error::ErrorCode`].

#![warn(missing_docs)]

/// API error responses.
pub mod error;

/// Transport-agnostic request handlers.
pub mod handlers;

/// Axum router.
pub mod routes;

pub use error::{ApiError, ErrorCode};
pub use handlers::AppState;
pub use routes::router;
