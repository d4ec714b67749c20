// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook engine against a mock workflow server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::noon;
use dailysolve_core::cache::{DurableCache, InMemoryStore};
use dailysolve_core::engine::{EngineError, WebhookEngine, WebhookEngineConfig, WorkflowEngine};
use dailysolve_core::orchestrator::{AcquisitionOrchestrator, AcquisitionState, OrchestratorConfig};
use dailysolve_core::CycleClock;

const CODE: &str = "class Solution:\n    def climbStairs(self, n: int) -> int:\n        a, b = 1, 1\n        for _ in range(n):\n            a, b = b, a + b\n        return a\n";

// =============================================================================
// Test Helpers
// =============================================================================

fn engine(server: &MockServer) -> WebhookEngine {
    WebhookEngine::new(WebhookEngineConfig {
        base_url: server.uri(),
        request_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(50),
        ..WebhookEngineConfig::default()
    })
    .unwrap()
}

async fn mount_trigger(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/webhook/solve-daily"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook-test/solve-daily"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

// =============================================================================
// Fetch Tests
// =============================================================================

#[tokio::test]
async fn test_trigger_then_poll_returns_solution() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook/solve-daily"))
        .and(body_partial_json(json!({
            "action": "solve_daily_challenge",
            "challenge_date": "2025-03-10"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webhook/leetcode-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "solutionCode": CODE,
            "problemTitle": "Climbing Stairs",
            "warnings": ["generated without tests"]
        })))
        .mount(&server)
        .await;

    let solution = engine(&server)
        .fetch("2025-03-10", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(solution.code, CODE.trim());
    assert_eq!(solution.title, "Climbing Stairs");
    assert_eq!(solution.warnings, vec!["generated without tests"]);
    assert!(solution.is_safe);
}

#[tokio::test]
async fn test_rejected_trigger_still_polls() {
    let server = MockServer::start().await;
    mount_trigger(&server, 500).await;
    Mock::given(method("GET"))
        .and(path("/webhook-test/leetcode-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "code": CODE }
        })))
        .mount(&server)
        .await;

    let solution = engine(&server)
        .fetch("2025-03-10", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(solution.title, "Daily Challenge");
}

#[tokio::test]
async fn test_no_result_before_deadline_times_out() {
    let server = MockServer::start().await;
    mount_trigger(&server, 200).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
        .mount(&server)
        .await;

    let err = engine(&server)
        .fetch("2025-03-10", Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout(d) if d == Duration::from_millis(300)));
}

#[tokio::test]
async fn test_failed_trigger_without_result_reports_trigger_error() {
    let server = MockServer::start().await;
    mount_trigger(&server, 503).await;

    let err = engine(&server)
        .fetch("2025-03-10", Duration::from_millis(200))
        .await
        .unwrap_err();
    match err {
        EngineError::TriggerFailed(msg) => assert!(msg.contains("503"), "{}", msg),
        other => panic!("expected TriggerFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_html_error_page_is_not_code() {
    let server = MockServer::start().await;
    mount_trigger(&server, 200).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "<html><body>if you see this, for real, return later</body></html>"
        })))
        .mount(&server)
        .await;

    let result = engine(&server)
        .fetch("2025-03-10", Duration::from_millis(200))
        .await;
    assert!(matches!(result, Err(EngineError::Timeout(_))));
}

// =============================================================================
// Health Tests
// =============================================================================

#[tokio::test]
async fn test_health_counts_known_routes_as_reachable() {
    let server = MockServer::start().await;
    // Unmatched routes answer 404, which still proves the server is up.
    let health = engine(&server).health().await;
    assert_eq!(health.total, 4);
    assert_eq!(health.reachable, 4);
    assert!(health.errors.is_empty());
    assert_eq!(health.success_ratio(), 1.0);
}

#[tokio::test]
async fn test_health_reports_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let health = engine(&server).health().await;
    assert_eq!(health.reachable, 0);
    assert_eq!(health.errors.len(), 4);
}

// =============================================================================
// Orchestrator Integration
// =============================================================================

#[tokio::test]
async fn test_orchestrator_with_webhook_engine() {
    let server = MockServer::start().await;
    mount_trigger(&server, 200).await;
    Mock::given(method("GET"))
        .and(path("/webhook/leetcode-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": CODE,
            "title": "Climbing Stairs"
        })))
        .mount(&server)
        .await;

    let orchestrator = AcquisitionOrchestrator::new(
        DurableCache::new(Arc::new(InMemoryStore::new()), "it:"),
        CycleClock::new(chrono_tz::Asia::Kolkata, 6).unwrap(),
        Arc::new(engine(&server)),
        OrchestratorConfig {
            fetch_timeout: Duration::from_secs(5),
            ..OrchestratorConfig::default()
        },
    )
    .unwrap();

    let outcome = orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(outcome.state(), AcquisitionState::FetchingFresh);
    let solution = outcome.solution().unwrap();
    assert_eq!(solution.title, "Climbing Stairs");
    assert!(solution.quality_score > 0.5);

    let again = orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(again.state(), AcquisitionState::ServingFromCache);
}
