// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook workflow engine.
//!
//! Generation runs asynchronously inside a workflow server. A fetch is two
//! phases:
//!
//! 1. **Trigger** - POST a job description to each trigger webhook until one
//!    accepts it (production first, then the test webhook).
//! 2. **Poll** - GET each result webhook every `poll_interval` until one
//!    returns usable code or the deadline passes.
//!
//! If no trigger endpoint accepts the job the client still polls, since a
//! previously started run may already have stored a result.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{EngineError, GeneratedSolution, WorkflowEngine};
use crate::config::Config;

/// Minimum trimmed length for a response field to count as code.
const MIN_CODE_LEN: usize = 30;

/// Fields checked first for code, in order.
const PRIMARY_FIELDS: &[&str] = &[
    "solutionCode",
    "code",
    "pythonCode",
    "solution",
    "todayCode",
    "dailyCode",
    "freshCode",
];

/// Fields checked when no primary field holds code.
const SECONDARY_FIELDS: &[&str] = &[
    "codeText",
    "generated_code",
    "final_code",
    "corrected_code",
    "python_code",
    "leetcode_solution",
    "answer",
    "result",
    "content",
];

/// Webhook engine settings.
#[derive(Debug, Clone)]
pub struct WebhookEngineConfig {
    /// Base URL of the workflow server, without trailing slash.
    pub base_url: String,
    /// Trigger webhook paths, tried in order.
    pub trigger_paths: Vec<String>,
    /// Result webhook paths, tried in order on every poll.
    pub fetch_paths: Vec<String>,
    /// Timeout of each individual HTTP request.
    pub request_timeout: Duration,
    /// Pause between poll rounds.
    pub poll_interval: Duration,
}

impl Default for WebhookEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678".to_string(),
            trigger_paths: vec![
                "/webhook/solve-daily".to_string(),
                "/webhook-test/solve-daily".to_string(),
            ],
            fetch_paths: vec![
                "/webhook/leetcode-code".to_string(),
                "/webhook-test/leetcode-code".to_string(),
            ],
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl WebhookEngineConfig {
    /// Settings taken from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.engine_base_url.clone(),
            request_timeout: config.engine_request_timeout,
            poll_interval: config.engine_poll_interval,
            ..Self::default()
        }
    }

    fn trigger_urls(&self) -> Vec<String> {
        self.trigger_paths
            .iter()
            .map(|p| format!("{}{}", self.base_url, p))
            .collect()
    }

    fn fetch_urls(&self) -> Vec<String> {
        self.fetch_paths
            .iter()
            .map(|p| format!("{}{}", self.base_url, p))
            .collect()
    }
}

/// Reachability of the configured webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub base_url: String,
    pub reachable: usize,
    pub total: usize,
    pub errors: Vec<String>,
}

impl EngineHealth {
    /// Fraction of webhooks that answered.
    pub fn success_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.reachable as f64 / self.total as f64
        }
    }
}

/// HTTP client for a webhook-driven workflow server.
pub struct WebhookEngine {
    client: reqwest::Client,
    config: WebhookEngineConfig,
}

impl WebhookEngine {
    /// Build a client for `config`.
    pub fn new(config: WebhookEngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("dailysolve/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    /// Probe every webhook. Any HTTP answer that shows the route exists
    /// counts as reachable.
    pub async fn health(&self) -> EngineHealth {
        let urls: Vec<String> = self
            .config
            .trigger_urls()
            .into_iter()
            .chain(self.config.fetch_urls())
            .collect();
        let mut reachable = 0;
        let mut errors = Vec::new();

        for url in &urls {
            match self.client.head(url).send().await {
                Ok(resp) if matches!(resp.status().as_u16(), 200 | 404 | 405 | 501) => {
                    reachable += 1;
                }
                Ok(resp) => errors.push(format!("{}: HTTP {}", url, resp.status())),
                Err(e) => errors.push(format!("{}: {}", url, e)),
            }
        }

        EngineHealth {
            base_url: self.config.base_url.clone(),
            reachable,
            total: urls.len(),
            errors,
        }
    }

    async fn trigger(&self, challenge_date: &str) -> Result<(), EngineError> {
        let now = Utc::now();
        let payload = json!({
            "action": "solve_daily_challenge",
            "challenge_date": challenge_date,
            "utc_time": now.to_rfc3339(),
            "timestamp": now.timestamp(),
            "source": "dailysolve",
            "request_id": uuid::Uuid::new_v4().to_string(),
            "force_refresh": true,
        });

        let mut last_error = String::from("no trigger URLs configured");
        for url in self.config.trigger_urls() {
            match self.client.post(&url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(url = %url, challenge_date, "Workflow triggered");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    last_error = format!("{}: HTTP {} {}", url, status, truncate(&body, 200));
                    warn!(url = %url, status = %status, "Workflow trigger rejected");
                }
                Err(e) => {
                    last_error = format!("{}: {}", url, e);
                    warn!(url = %url, error = %e, "Workflow trigger failed");
                }
            }
        }
        Err(EngineError::TriggerFailed(last_error))
    }

    async fn poll_once(&self) -> Option<GeneratedSolution> {
        for url in self.config.fetch_urls() {
            let resp = match self.client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => resp,
                Ok(resp) => {
                    debug!(url = %url, status = %resp.status(), "Result webhook not ready");
                    continue;
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "Result webhook poll failed");
                    continue;
                }
            };
            let body: Value = match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    debug!(url = %url, error = %e, "Result webhook returned non-JSON body");
                    continue;
                }
            };
            if let Some(solution) = solution_from_response(&body) {
                info!(url = %url, chars = solution.code.len(), "Solution retrieved from workflow");
                return Some(solution);
            }
        }
        None
    }
}

#[async_trait]
impl WorkflowEngine for WebhookEngine {
    fn engine_type(&self) -> &'static str {
        "webhook"
    }

    async fn fetch(
        &self,
        challenge_date: &str,
        timeout: Duration,
    ) -> Result<GeneratedSolution, EngineError> {
        let deadline = Instant::now() + timeout;
        let trigger_error = self.trigger(challenge_date).await.err();

        loop {
            if let Some(solution) = self.poll_once().await {
                return Ok(solution);
            }
            if Instant::now() + self.config.poll_interval >= deadline {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        match trigger_error {
            Some(e) => Err(e),
            None => Err(EngineError::Timeout(timeout)),
        }
    }
}

/// Pull a solution out of a result webhook's JSON body.
pub(crate) fn solution_from_response(body: &Value) -> Option<GeneratedSolution> {
    let code = extract_code(body)?;
    let title = ["title", "problem_title", "problemTitle"]
        .iter()
        .find_map(|f| body.get(*f).and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("Daily Challenge")
        .to_string();
    let warnings = body
        .get("warnings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let is_safe = body.get("is_safe").and_then(Value::as_bool).unwrap_or(true);

    Some(GeneratedSolution {
        code,
        is_safe,
        warnings,
        title,
    })
}

fn extract_code(body: &Value) -> Option<String> {
    let object = body.as_object()?;

    for fields in [PRIMARY_FIELDS, SECONDARY_FIELDS] {
        let best = fields
            .iter()
            .filter_map(|f| object.get(*f).and_then(Value::as_str))
            .map(str::trim)
            .filter(|c| is_code_candidate(c))
            .max_by_key(|c| c.len());
        if let Some(code) = best {
            return Some(code.to_string());
        }
    }

    // One level down, e.g. {"data": {"code": ...}}.
    object
        .values()
        .filter(|v| v.is_object())
        .find_map(extract_code)
}

fn is_code_candidate(code: &str) -> bool {
    if code.len() <= MIN_CODE_LEN {
        return false;
    }
    if !["def ", "class ", "return", "if ", "for "]
        .iter()
        .any(|marker| code.contains(marker))
    {
        return false;
    }
    let lower = code.to_lowercase();
    if ["<html>", "<body>", "<div>", "<script>"]
        .iter()
        .any(|tag| lower.contains(tag))
    {
        return false;
    }
    !["\"status\":", "\"error\":", "\"message\":"]
        .iter()
        .any(|marker| code.contains(marker))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
