// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! API error responses.
//!
//! Every failure leaves the server as a JSON body `{code, message}` with a
//! status derived from the code. Suppressed fetches also carry a
//! `Retry-After` header.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use dailysolve_core::Error;
use dailysolve_core::dedupe::OperationAborted;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request body failed validation
    InvalidInput,
    /// No such resource
    NotFound,
    /// A fetch was already attempted this cycle; retry later
    SolutionTemporarilyUnavailable,
    /// The cache store is unreachable
    CacheUnavailable,
    /// The workflow engine did not answer in time
    EngineTimeout,
    /// The workflow engine answered with unusable content
    InvalidArtifact,
    /// The workflow engine failed
    EngineError,
    /// Anything else
    InternalError,
}

impl ErrorCode {
    /// HTTP status for this code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::SolutionTemporarilyUnavailable | ErrorCode::CacheUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorCode::EngineTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InvalidArtifact | ErrorCode::EngineError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Error returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Seconds the client should wait before retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// 400 with a validation message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// 404 for a missing resource.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// 500 with a generic message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let retry_after = self.retry_after_secs;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

// ============================================================================
// CONVERSIONS FROM PIPELINE ERRORS
// ============================================================================

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::DuplicateFetchSuppressed {
                cycle_key,
                retry_after,
            } => Self {
                code: ErrorCode::SolutionTemporarilyUnavailable,
                message: format!(
                    "Solution for {} is being prepared, please try again shortly",
                    cycle_key
                ),
                retry_after_secs: Some(retry_after.as_secs().max(1)),
            },
            Error::EngineTimeout(after) => Self::new(
                ErrorCode::EngineTimeout,
                format!("Workflow engine timed out after {}s", after.as_secs()),
            ),
            Error::InvalidArtifact(reason) => Self::new(ErrorCode::InvalidArtifact, reason),
            Error::Engine(e) => Self::new(ErrorCode::EngineError, e.to_string()),
            Error::CacheUnavailable(e) => Self::new(ErrorCode::CacheUnavailable, e.to_string()),
            Error::InvalidRequest(msg) => Self::invalid_input(msg),
            other => {
                tracing::error!(error = %other, "Unhandled pipeline error");
                Self::internal("Daily challenge service failed")
            }
        }
    }
}

impl From<OperationAborted> for ApiError {
    fn from(err: OperationAborted) -> Self {
        tracing::error!(error = %err, "Shared request task failed");
        Self::internal("Daily challenge service failed")
    }
}
