// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for dailysolve-core.

use std::time::Duration;

use thiserror::Error;

use crate::clock::CycleKey;

/// Pipeline errors.
///
/// The orchestrator itself reports through [`AcquisitionOutcome`](crate::orchestrator::AcquisitionOutcome);
/// these variants are what the outcome converts into for callers using `?`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The cache store is unreachable or rejected the operation.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] crate::cache::CacheError),

    /// The workflow engine did not answer within the fetch timeout.
    #[error("Workflow engine timed out after {}s", .0.as_secs())]
    EngineTimeout(Duration),

    /// The fetched artifact failed the minimum content checks.
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// A fetch was already attempted this cycle; no duplicate was started.
    #[error("Solution temporarily unavailable for {cycle_key}, retry in {}s", .retry_after.as_secs())]
    DuplicateFetchSuppressed {
        /// Cycle the suppressed request targeted.
        cycle_key: CycleKey,
        /// Suggested wait before retrying.
        retry_after: Duration,
    },

    /// Waiting for an in-flight fetch exceeded its bound.
    #[error("Timed out after {}ms waiting for in-flight fetch", .0.as_millis())]
    LockAcquisitionTimeout(Duration),

    /// Workflow engine failed.
    #[error("Workflow engine error: {0}")]
    Engine(#[from] crate::engine::EngineError),

    /// Submission collaborator failed.
    #[error("Submission error: {0}")]
    Submission(#[from] crate::submission::SubmissionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the pipeline Error.
pub type Result<T> = std::result::Result<T, Error>;
