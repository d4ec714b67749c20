// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for dailysolve-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use dailysolve_core::cache::{DurableCache, InMemoryStore};
use dailysolve_core::engine::MockEngine;
use dailysolve_core::orchestrator::{AcquisitionOrchestrator, OrchestratorConfig};
use dailysolve_core::CycleClock;

/// Instant in Asia/Kolkata.
pub fn ist(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    chrono_tz::Asia::Kolkata
        .with_ymd_and_hms(y, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

/// Noon on a regular weekday, well inside the 2025-03-10 cycle.
pub fn noon() -> DateTime<Utc> {
    ist(2025, 3, 10, 12, 0)
}

/// Orchestrator over an in-memory store, with handles on both stubs.
pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<MockEngine>,
    pub orchestrator: Arc<AcquisitionOrchestrator>,
}

impl TestContext {
    pub fn new(engine: MockEngine) -> Self {
        Self::with_config(engine, OrchestratorConfig::default())
    }

    pub fn with_config(engine: MockEngine, config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let engine = Arc::new(engine);
        let orchestrator = AcquisitionOrchestrator::new(
            DurableCache::new(store.clone(), "test:"),
            CycleClock::new(chrono_tz::Asia::Kolkata, 6).unwrap(),
            engine.clone(),
            config,
        )
        .unwrap();
        Self {
            store,
            engine,
            orchestrator: Arc::new(orchestrator),
        }
    }
}
