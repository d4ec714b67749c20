// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dailysolve Core - Daily Solution Acquisition Pipeline
//!
//! This crate obtains one generated solution per daily challenge cycle and
//! serves it to any number of callers. Generation is slow and expensive, so
//! the pipeline guarantees that concurrent and repeated callers share a single
//! fetch, and that a cycle's solution is reused until the next cutover.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │        Callers (HTTP handlers, startup warm-up, refresh scheduler)    │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      AcquisitionOrchestrator                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  │
//! │  │ CycleClock  │  │ FetchGuard  │  │  Trigger    │  │  Quality    │  │
//! │  │             │  │ (in-process)│  │  marker     │  │  scorer     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!           │                                               │
//!           ▼                                               ▼
//! ┌───────────────────────────┐               ┌──────────────────────────┐
//! │       DurableCache        │               │      WorkflowEngine      │
//! │   (Redis / in-memory)     │               │   (webhook server)       │
//! └───────────────────────────┘               └──────────────────────────┘
//! ```
//!
//! # Cycle Keys
//!
//! A cycle runs from one cutover (default 06:00 Asia/Kolkata) to the next.
//! Before the cutover hour the cycle key is the previous calendar date.
//! Solutions are cached with a TTL ending exactly at the next cutover.
//!
//! # Cache Layout
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `{prefix}daily_solution:{YYYY-MM-DD}` | [`solution::CachedSolution`] | until cycle end |
//! | `{prefix}daily_trigger:{YYYY-MM-DD}` | [`solution::TriggerMarker`] | until cycle end |
//! | `{prefix}system:last_health_check` | [`orchestrator::HealthReport`] | 2 hours |
//!
//! # Configuration
//!
//! See [`config::Config::from_env`] for the full variable list. The most
//! common ones:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DAILYSOLVE_REDIS_URL` / `REDIS_URL` | `redis://127.0.0.1:6379` | Cache store |
//! | `DAILYSOLVE_TIMEZONE` | `Asia/Kolkata` | Cycle time zone |
//! | `DAILYSOLVE_CUTOVER_HOUR` | `6` | Local hour a cycle begins |
//! | `DAILYSOLVE_FETCH_TIMEOUT_SECS` | `300` | Hard bound on one fetch |
//! | `N8N_WEBHOOK_BASE` | `http://localhost:5678` | Workflow engine |

#![warn(missing_docs)]

/// Namespaced cache over Redis or an in-memory store.
pub mod cache;

/// Cycle keys and cutover arithmetic.
pub mod clock;

/// Configuration loaded from environment variables.
pub mod config;

/// Collapsing of identical concurrent requests.
pub mod dedupe;

/// Workflow engine clients.
pub mod engine;

/// Error types for pipeline operations.
pub mod error;

/// Background history cleanup and health recording.
pub mod maintenance;

/// Cache-first, single-flight acquisition of the daily solution.
pub mod orchestrator;

/// Heuristic scoring of generated code.
pub mod quality;

/// Embeddable runtime wiring the background tasks.
pub mod runtime;

/// Cron-driven refresh at each cutover.
pub mod scheduler;

/// In-process fetch exclusion.
pub mod single_flight;

/// Cached solution and trigger marker records.
pub mod solution;

/// Submission of solutions on a user's behalf.
pub mod submission;

pub use clock::{CycleClock, CycleKey};
pub use config::{Config, ConfigError};
pub use error::{Error, Result};
pub use orchestrator::{AcquisitionOrchestrator, AcquisitionOutcome, AcquisitionState};
pub use runtime::SolverRuntime;
pub use solution::{CachedSolution, RetrievalMethod, TriggerSource};
