// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock workflow engine for testing.
//!
//! Returns a canned solution after an optional delay and counts every call,
//! so tests can assert how many times the expensive fetch actually ran.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{EngineError, GeneratedSolution, WorkflowEngine};

/// Canned solution returned in [`MockMode::Succeed`].
pub const SAMPLE_CODE: &str = "from typing import List\n\nclass Solution:\n    def twoSum(self, nums: List[int], target: int) -> List[int]:\n        seen = {}\n        for i, n in enumerate(nums):\n            if target - n in seen:\n                return [seen[target - n], i]\n            seen[n] = i\n        return []\n";

/// How the mock answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockMode {
    /// Return [`SAMPLE_CODE`].
    Succeed,
    /// Return this code instead.
    Code(String),
    /// Fail with an HTTP error.
    Fail,
    /// Never answer.
    Hang,
}

/// Call-counting engine stub.
pub struct MockEngine {
    calls: AtomicUsize,
    dates: Mutex<Vec<String>>,
    mode: Mutex<MockMode>,
    /// Simulated generation time before answering.
    pub delay: Duration,
    /// Title reported with every solution.
    pub title: String,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// A mock that succeeds after a short delay.
    pub fn new() -> Self {
        Self::with_mode(MockMode::Succeed)
    }

    /// A mock that always fails.
    pub fn failing() -> Self {
        Self::with_mode(MockMode::Fail)
    }

    /// A mock that never answers.
    pub fn hanging() -> Self {
        Self::with_mode(MockMode::Hang)
    }

    /// A mock in the given mode.
    pub fn with_mode(mode: MockMode) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            dates: Mutex::new(Vec::new()),
            mode: Mutex::new(mode),
            delay: Duration::from_millis(10),
            title: "Two Sum".to_string(),
        }
    }

    /// Set the simulated generation time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Switch mode for subsequent calls.
    pub fn set_mode(&self, mode: MockMode) {
        *self.mode.lock().unwrap_or_else(|p| p.into_inner()) = mode;
    }

    /// Number of `fetch` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Challenge dates requested, in call order.
    pub fn requested_dates(&self) -> Vec<String> {
        self.dates.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl WorkflowEngine for MockEngine {
    fn engine_type(&self) -> &'static str {
        "mock"
    }

    async fn fetch(
        &self,
        challenge_date: &str,
        _timeout: Duration,
    ) -> Result<GeneratedSolution, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dates
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(challenge_date.to_string());
        let mode = self.mode.lock().unwrap_or_else(|p| p.into_inner()).clone();

        if mode == MockMode::Hang {
            return std::future::pending().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let code = match mode {
            MockMode::Code(code) => code,
            MockMode::Fail => return Err(EngineError::Http("mock engine failure".into())),
            MockMode::Succeed | MockMode::Hang => SAMPLE_CODE.to_string(),
        };

        Ok(GeneratedSolution {
            code,
            is_safe: true,
            warnings: Vec::new(),
            title: self.title.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_calls() {
        let engine = MockEngine::new();
        let solution = engine.fetch("2025-01-01", Duration::from_secs(1)).await.unwrap();
        assert!(solution.code.contains("class Solution"));
        engine.fetch("2025-01-02", Duration::from_secs(1)).await.unwrap();
        assert_eq!(engine.calls(), 2);
        assert_eq!(engine.requested_dates(), vec!["2025-01-01", "2025-01-02"]);
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let engine = MockEngine::failing();
        assert!(engine.fetch("2025-01-01", Duration::from_secs(1)).await.is_err());
        engine.set_mode(MockMode::Succeed);
        assert!(engine.fetch("2025-01-01", Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_mode_never_resolves() {
        let engine = MockEngine::hanging();
        let result = tokio::time::timeout(
            Duration::from_secs(600),
            engine.fetch("2025-01-01", Duration::from_secs(1)),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(engine.calls(), 1);
    }
}
