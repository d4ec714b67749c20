// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow engine interface.
//!
//! The code-generation backend is opaque to the pipeline: give it a date,
//! get back code or a timeout. [`WebhookEngine`] talks to a webhook-driven
//! workflow server; [`MockEngine`] counts calls for tests.

mod mock;
mod webhook;

pub use mock::{MockEngine, MockMode, SAMPLE_CODE};
pub use webhook::{EngineHealth, WebhookEngine, WebhookEngineConfig};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a workflow engine.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// No usable result before the deadline.
    #[error("no result within {}s", .0.as_secs())]
    Timeout(Duration),

    /// Every trigger endpoint rejected the request and nothing could be polled.
    #[error("workflow could not be triggered: {0}")]
    TriggerFailed(String),

    /// The engine answered, but with nothing usable.
    #[error("empty or unusable response: {0}")]
    EmptyResponse(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Http(e.to_string())
    }
}

/// What the engine hands back for a date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSolution {
    pub code: String,
    /// Engine's own safety verdict; the pipeline also scores the code itself.
    pub is_safe: bool,
    pub warnings: Vec<String>,
    pub title: String,
}

/// Code-generation backend.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Short name for logs (e.g. "webhook", "mock").
    fn engine_type(&self) -> &'static str;

    /// Produce the solution for `challenge_date`, giving up after `timeout`.
    async fn fetch(
        &self,
        challenge_date: &str,
        timeout: Duration,
    ) -> Result<GeneratedSolution, EngineError>;
}
