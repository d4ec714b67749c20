// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submission collaborator.
//!
//! Submitting code to the challenge site is a browser-automation job outside
//! this crate. The pipeline only sees `submit(code, credentials) -> outcome`.
//! [`ProcessSubmitter`] hands the job to an external command: code on stdin,
//! credentials in the environment, verdict on the last line of stdout.

use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};

use crate::clock::CycleKey;

/// Errors from a submitter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    /// No submitter is configured.
    #[error("no submitter configured")]
    NotConfigured,

    /// The submission did not finish in time.
    #[error("submission timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The submit command exited with a non-zero code.
    #[error("submit command exited with {exit_code}: {stderr}")]
    ExitCode {
        /// Exit code from the process.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Site login. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    /// Bundle a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Verdict returned by the challenge site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "message", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Accepted,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    Error(String),
}

impl SubmissionOutcome {
    /// Interpret a verdict line, either a bare verdict or a JSON object with a
    /// `status` field.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let verdict = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(obj)) => obj
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => line.to_string(),
        };

        match verdict.to_lowercase().replace([' ', '-'], "_").as_str() {
            "accepted" => SubmissionOutcome::Accepted,
            "wrong_answer" => SubmissionOutcome::WrongAnswer,
            "runtime_error" => SubmissionOutcome::RuntimeError,
            "time_limit_exceeded" => SubmissionOutcome::TimeLimitExceeded,
            "" => SubmissionOutcome::Error("empty verdict".to_string()),
            _ => SubmissionOutcome::Error(verdict),
        }
    }

    /// Whether the site accepted the solution.
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted)
    }
}

/// Submits a solution on behalf of a user.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Short name for logs (e.g. "process", "mock").
    fn submitter_type(&self) -> &'static str;

    /// Submit `code` with `credentials`.
    async fn submit(
        &self,
        code: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionOutcome, SubmissionError>;
}

/// Runs an external automation command per submission.
#[derive(Debug, Clone)]
pub struct ProcessSubmitter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessSubmitter {
    /// Run `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Split a whitespace-separated command line. `None` if it is blank.
    pub fn from_command_line(command: &str, timeout: Duration) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), timeout))
    }
}

#[async_trait]
impl Submitter for ProcessSubmitter {
    fn submitter_type(&self) -> &'static str {
        "process"
    }

    async fn submit(
        &self,
        code: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("DAILYSOLVE_USERNAME", &credentials.username)
            .env("DAILYSOLVE_PASSWORD", credentials.password())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
            // Dropping stdin closes it so the command sees EOF.
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SubmissionError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(SubmissionError::ExitCode {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdict = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        Ok(SubmissionOutcome::parse(verdict))
    }
}

/// Submitter stub that records calls.
pub struct MockSubmitter {
    calls: AtomicUsize,
    outcome: Mutex<SubmissionOutcome>,
    submitted: Mutex<Vec<(String, String)>>,
    /// Simulated submission time.
    pub delay: Duration,
}

impl Default for MockSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSubmitter {
    /// A submitter whose every submission is accepted.
    pub fn new() -> Self {
        Self::with_outcome(SubmissionOutcome::Accepted)
    }

    /// A submitter returning `outcome` every time.
    pub fn with_outcome(outcome: SubmissionOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Mutex::new(outcome),
            submitted: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Number of submissions so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(username, code)` of every submission, in order.
    pub fn submissions(&self) -> Vec<(String, String)> {
        self.submitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl Submitter for MockSubmitter {
    fn submitter_type(&self) -> &'static str {
        "mock"
    }

    async fn submit(
        &self,
        code: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((credentials.username.clone(), code.to_string()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self
            .outcome
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }
}

/// Where a user's submission stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed { outcome: SubmissionOutcome },
    Failed { error: String },
}

/// Latest submission of one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub user_id: String,
    pub cycle_key: CycleKey,
    pub status: SubmissionStatus,
    pub updated_at: DateTime<Utc>,
}

/// Last submission status per user.
#[derive(Debug, Default)]
pub struct SubmissionTracker {
    records: DashMap<String, SubmissionRecord>,
}

impl SubmissionTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status for `user_id`, replacing the previous one.
    pub fn update(&self, user_id: &str, cycle_key: CycleKey, status: SubmissionStatus) {
        self.records.insert(
            user_id.to_string(),
            SubmissionRecord {
                user_id: user_id.to_string(),
                cycle_key,
                status,
                updated_at: Utc::now(),
            },
        );
    }

    /// Latest record of `user_id`.
    pub fn get(&self, user_id: &str) -> Option<SubmissionRecord> {
        self.records.get(user_id).map(|r| r.value().clone())
    }

    /// Number of users with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no user has a record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Submit on behalf of `user_id`, tracking progress.
    pub async fn submit_tracked(
        &self,
        submitter: &dyn Submitter,
        user_id: &str,
        cycle_key: CycleKey,
        code: &str,
        credentials: &Credentials,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        self.update(user_id, cycle_key, SubmissionStatus::Running);
        info!(user_id, cycle_key = %cycle_key, submitter = submitter.submitter_type(), "Submitting solution");

        match submitter.submit(code, credentials).await {
            Ok(outcome) => {
                info!(user_id, verdict = ?outcome, "Submission finished");
                self.update(
                    user_id,
                    cycle_key,
                    SubmissionStatus::Completed {
                        outcome: outcome.clone(),
                    },
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(user_id, error = %e, "Submission failed");
                self.update(
                    user_id,
                    cycle_key,
                    SubmissionStatus::Failed {
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CycleKey {
        "2025-03-10".parse().unwrap()
    }

    #[test]
    fn test_parse_verdicts() {
        assert_eq!(SubmissionOutcome::parse("Accepted"), SubmissionOutcome::Accepted);
        assert_eq!(
            SubmissionOutcome::parse("Wrong Answer"),
            SubmissionOutcome::WrongAnswer
        );
        assert_eq!(
            SubmissionOutcome::parse("time-limit-exceeded"),
            SubmissionOutcome::TimeLimitExceeded
        );
        assert_eq!(
            SubmissionOutcome::parse(r#"{"status": "Runtime Error", "detail": "IndexError"}"#),
            SubmissionOutcome::RuntimeError
        );
        assert_eq!(
            SubmissionOutcome::parse("Compilation Error"),
            SubmissionOutcome::Error("Compilation Error".into())
        );
        assert!(matches!(SubmissionOutcome::parse("  "), SubmissionOutcome::Error(_)));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_from_command_line() {
        assert!(ProcessSubmitter::from_command_line("   ", Duration::from_secs(1)).is_none());
        let submitter =
            ProcessSubmitter::from_command_line("node submit.js --headless", Duration::from_secs(1))
                .unwrap();
        assert_eq!(submitter.program, "node");
        assert_eq!(submitter.args, vec!["submit.js", "--headless"]);
    }

    #[tokio::test]
    async fn test_tracker_records_outcome() {
        let tracker = SubmissionTracker::new();
        let submitter = MockSubmitter::with_outcome(SubmissionOutcome::WrongAnswer);
        let creds = Credentials::new("alice", "pw");

        tracker.update("user_1", key(), SubmissionStatus::Pending);
        let outcome = tracker
            .submit_tracked(&submitter, "user_1", key(), "code", &creds)
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::WrongAnswer);

        let record = tracker.get("user_1").unwrap();
        assert_eq!(
            record.status,
            SubmissionStatus::Completed {
                outcome: SubmissionOutcome::WrongAnswer
            }
        );
        assert_eq!(submitter.submissions(), vec![("alice".to_string(), "code".to_string())]);
    }

    #[test]
    fn test_status_wire_format() {
        let status = SubmissionStatus::Completed {
            outcome: SubmissionOutcome::Accepted,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["outcome"]["verdict"], "accepted");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_submitter_reads_last_line() {
        let submitter = ProcessSubmitter::new(
            "sh",
            vec![
                "-c".into(),
                "cat >/dev/null; echo \"user=$DAILYSOLVE_USERNAME\"; echo accepted".into(),
            ],
            Duration::from_secs(10),
        );
        let outcome = submitter
            .submit("class Solution: pass", &Credentials::new("alice", "pw"))
            .await
            .unwrap();
        assert_eq!(outcome, SubmissionOutcome::Accepted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_submitter_nonzero_exit() {
        let submitter = ProcessSubmitter::new(
            "sh",
            vec!["-c".into(), "cat >/dev/null; echo boom >&2; exit 3".into()],
            Duration::from_secs(10),
        );
        let err = submitter
            .submit("code", &Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::ExitCode { exit_code: 3, ref stderr } if stderr == "boom"));
    }

    #[tokio::test]
    async fn test_process_submitter_missing_program() {
        let submitter = ProcessSubmitter::new(
            "definitely-not-a-real-submit-command",
            vec![],
            Duration::from_secs(1),
        );
        let err = submitter
            .submit("code", &Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Io(_)));
    }
}
