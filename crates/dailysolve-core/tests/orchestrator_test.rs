// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Acquisition behaviour against stub engines.

mod common;

use std::time::Duration;

use common::{TestContext, noon};
use dailysolve_core::cache::{SOLUTION_NAMESPACE, TRIGGER_NAMESPACE};
use dailysolve_core::engine::{MockEngine, MockMode};
use dailysolve_core::orchestrator::{
    AcquisitionOutcome, AcquisitionState, FetchFailure, OrchestratorConfig, SuppressionReason,
};
use dailysolve_core::solution::{TriggerMarker, TriggerState};
use dailysolve_core::{CachedSolution, Error, RetrievalMethod, TriggerSource};

#[tokio::test]
async fn test_cache_hit_never_calls_engine() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(ctx.engine.calls(), 1);

    for _ in 0..10 {
        let outcome = ctx.orchestrator.ensure_fresh_solution(noon()).await;
        assert_eq!(outcome.state(), AcquisitionState::ServingFromCache);
    }
    assert_eq!(ctx.engine.calls(), 1);
    assert_eq!(ctx.orchestrator.stats().cache_hits, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cold_calls_fetch_once() {
    let ctx = TestContext::new(MockEngine::new().with_delay(Duration::from_millis(200)));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let orchestrator = ctx.orchestrator.clone();
            tokio::spawn(async move { orchestrator.ensure_fresh_solution(noon()).await })
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        let solution = outcome
            .solution()
            .unwrap_or_else(|| panic!("expected a solution, got {:?}", outcome));
        assert_eq!(solution.title, "Two Sum");
        if outcome.state() == AcquisitionState::FetchingFresh {
            fresh += 1;
        }
    }

    assert_eq!(ctx.engine.calls(), 1);
    assert_eq!(fresh, 1);
}

#[tokio::test]
async fn test_failed_attempt_suppresses_next_call() {
    let ctx = TestContext::new(MockEngine::failing());

    let first = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(first.state(), AcquisitionState::Failed);

    let second = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    match &second {
        AcquisitionOutcome::Suppressed {
            cycle_key,
            reason,
            retry_after,
        } => {
            assert_eq!(cycle_key.to_string(), "2025-03-10");
            assert_eq!(*reason, SuppressionReason::AlreadyAttempted);
            assert_eq!(*retry_after, Duration::from_secs(60));
        }
        other => panic!("expected Suppressed, got {:?}", other),
    }
    assert!(matches!(
        second.into_result(),
        Err(Error::DuplicateFetchSuppressed { .. })
    ));
    assert_eq!(ctx.engine.calls(), 1);
}

#[tokio::test]
async fn test_marker_from_another_process_suppresses_fetch() {
    let ctx = TestContext::new(MockEngine::new());
    let key = ctx.orchestrator.clock().cycle_key(noon());
    let marker = TriggerMarker::attempted(key, TriggerSource::Scheduled, noon());
    ctx.orchestrator
        .cache()
        .set(TRIGGER_NAMESPACE, &key.to_string(), &marker, Duration::from_secs(3600))
        .await;

    let outcome = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(outcome.state(), AcquisitionState::Suppressed);
    assert_eq!(ctx.engine.calls(), 0);
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache_and_marker() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert!(ctx.orchestrator.trigger_marker(noon()).await.is_some());

    let outcome = ctx.orchestrator.force_refresh(noon()).await;
    assert_eq!(outcome.state(), AcquisitionState::FetchingFresh);
    assert_eq!(
        outcome.solution().unwrap().retrieval_method,
        RetrievalMethod::Forced
    );
    assert_eq!(ctx.engine.calls(), 2);

    let marker = ctx.orchestrator.trigger_marker(noon()).await.unwrap();
    assert_eq!(marker.source, TriggerSource::Admin);
    assert_eq!(marker.state, TriggerState::Succeeded);
}

#[tokio::test]
async fn test_ttl_matches_time_to_next_cycle() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;

    let expected = ctx.orchestrator.clock().seconds_until_next_cycle(noon());
    assert_eq!(expected, 18 * 3600);
    let ttl = ctx.orchestrator.solution_ttl(noon()).await.unwrap();
    assert!(
        ttl.abs_diff(expected) <= 2,
        "ttl {} not within 2s of {}",
        ttl,
        expected
    );
}

#[tokio::test]
async fn test_stale_entry_is_refetched() {
    let ctx = TestContext::new(MockEngine::new());
    let key = ctx.orchestrator.clock().cycle_key(noon());
    let cycle_start = ctx.orchestrator.clock().cycle_start(key);

    // Written the evening before the cutover but under today's key.
    let stale = CachedSolution {
        code: "class Solution:\n    def old(self):\n        return 0\n".into(),
        title: "Yesterday".into(),
        is_safe: true,
        quality_score: 1.0,
        warnings: vec![],
        cached_at_epoch: (cycle_start.timestamp() - 3600) as f64,
        retrieval_method: RetrievalMethod::Scheduled,
        response_time_seconds: 1.0,
        cycle_key: key,
    };
    ctx.orchestrator
        .cache()
        .set(SOLUTION_NAMESPACE, &key.to_string(), &stale, Duration::from_secs(3600))
        .await;

    let outcome = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(outcome.state(), AcquisitionState::FetchingFresh);
    assert_eq!(outcome.solution().unwrap().title, "Two Sum");
    assert_eq!(ctx.engine.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_engine_timeout_leaves_cache_empty_and_marker_set() {
    let ctx = TestContext::with_config(
        MockEngine::hanging(),
        OrchestratorConfig {
            fetch_timeout: Duration::from_secs(300),
            ..OrchestratorConfig::default()
        },
    );

    let outcome = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    match &outcome {
        AcquisitionOutcome::Failed(FetchFailure::Timeout(after)) => {
            assert_eq!(*after, Duration::from_secs(300));
        }
        other => panic!("expected Failed(Timeout), got {:?}", other),
    }
    assert!(matches!(outcome.into_result(), Err(Error::EngineTimeout(_))));

    assert!(ctx.orchestrator.cached_solution(noon()).await.is_none());
    let marker = ctx.orchestrator.trigger_marker(noon()).await.unwrap();
    assert_eq!(marker.state, TriggerState::Failed);
    assert!(!ctx.orchestrator.fetch_in_progress());
}

#[tokio::test]
async fn test_scheduled_refresh_failure_keeps_previous_entry() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;

    ctx.engine.set_mode(MockMode::Fail);
    let outcome = ctx.orchestrator.scheduled_refresh(noon()).await;
    assert_eq!(outcome.state(), AcquisitionState::Failed);

    let kept = ctx.orchestrator.cached_solution(noon()).await.unwrap();
    assert_eq!(kept.retrieval_method, RetrievalMethod::UserTriggered);
    assert_eq!(ctx.engine.calls(), 2);
}

#[tokio::test]
async fn test_scheduled_refresh_replaces_entry() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;

    ctx.engine.set_mode(MockMode::Code(
        "class Solution:\n    def maxArea(self, height):\n        return max(height)\n".into(),
    ));
    let later = noon() + chrono::Duration::hours(1);
    let outcome = ctx.orchestrator.scheduled_refresh(later).await;
    assert_eq!(outcome.state(), AcquisitionState::FetchingFresh);

    let cached = ctx.orchestrator.cached_solution(later).await.unwrap();
    assert!(cached.code.contains("maxArea"));
    assert_eq!(cached.retrieval_method, RetrievalMethod::Scheduled);
}

#[tokio::test]
async fn test_next_cycle_fetches_again() {
    let ctx = TestContext::new(MockEngine::new());
    ctx.orchestrator.ensure_fresh_solution(noon()).await;

    let tomorrow = noon() + chrono::Duration::days(1);
    let outcome = ctx.orchestrator.ensure_fresh_solution(tomorrow).await;
    assert_eq!(outcome.state(), AcquisitionState::FetchingFresh);
    assert_eq!(outcome.solution().unwrap().cycle_key.to_string(), "2025-03-11");
    assert_eq!(ctx.engine.requested_dates(), vec!["2025-03-10", "2025-03-11"]);
}

#[tokio::test]
async fn test_purge_history_removes_only_old_cycles() {
    let ctx = TestContext::new(MockEngine::new());
    let ttl = Duration::from_secs(3600);
    let cache = ctx.orchestrator.cache();
    for day in ["2025-03-01", "2025-03-02", "2025-03-05"] {
        cache.set(SOLUTION_NAMESPACE, day, &"x", ttl).await;
        cache.set(TRIGGER_NAMESPACE, day, &"x", ttl).await;
    }

    // Retention of 7 days from 2025-03-10 keeps 2025-03-03 onwards.
    let removed = ctx.orchestrator.purge_history(noon(), 7).await;
    assert_eq!(removed, 4);
    assert!(cache.get::<String>(SOLUTION_NAMESPACE, "2025-03-05").await.is_some());
    assert!(cache.get::<String>(TRIGGER_NAMESPACE, "2025-03-01").await.is_none());
    assert_eq!(ctx.store.len(), 2);
}

#[tokio::test]
async fn test_health_report_reflects_solution() {
    let ctx = TestContext::new(MockEngine::new());
    let before = ctx.orchestrator.health_report(noon()).await;
    assert!(before.healthy);
    assert!(!before.solution_available);
    assert_eq!(before.cache_backend, "memory");

    ctx.orchestrator.ensure_fresh_solution(noon()).await;
    let after = ctx.orchestrator.record_health(noon()).await;
    assert!(after.solution_available);
    assert!(ctx.orchestrator.last_health_check().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_force_refresh_still_replaces_entry() {
    let ctx = TestContext::new(MockEngine::new().with_delay(Duration::from_millis(500)));
    assert!(ctx.orchestrator.ensure_fresh_solution(noon()).await.solution().is_some());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        ctx.orchestrator.force_refresh(noon()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!ctx.orchestrator.fetch_in_progress());
    let cached = ctx.orchestrator.cached_solution(noon()).await.unwrap();
    assert_eq!(cached.retrieval_method, RetrievalMethod::Forced);
    let marker = ctx.orchestrator.trigger_marker(noon()).await.unwrap();
    assert_eq!(marker.state, TriggerState::Succeeded);

    let next = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    assert_eq!(next.state(), AcquisitionState::ServingFromCache);
    assert_eq!(ctx.engine.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_fetch_is_waited_for_once() {
    let config = OrchestratorConfig {
        in_flight_wait: Duration::from_secs(3),
        ..OrchestratorConfig::default()
    };
    let ctx = TestContext::with_config(
        MockEngine::new().with_delay(Duration::from_secs(60)),
        config,
    );

    let holder = {
        let orchestrator = ctx.orchestrator.clone();
        tokio::spawn(async move { orchestrator.ensure_fresh_solution(noon()).await })
    };
    while !ctx.orchestrator.fetch_in_progress() {
        tokio::task::yield_now().await;
    }

    let started = tokio::time::Instant::now();
    let outcome = ctx.orchestrator.ensure_fresh_solution(noon()).await;
    let waited = started.elapsed();

    match outcome {
        AcquisitionOutcome::Suppressed { reason, .. } => {
            assert_eq!(reason, SuppressionReason::FetchInProgress);
        }
        other => panic!("expected Suppressed, got {:?}", other),
    }
    assert!(
        waited >= Duration::from_secs(3) && waited < Duration::from_secs(6),
        "waited {:?}",
        waited
    );

    assert_eq!(holder.await.unwrap().state(), AcquisitionState::FetchingFresh);
    assert_eq!(ctx.engine.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callers_behind_failed_fetch_are_suppressed() {
    let ctx = TestContext::new(MockEngine::failing().with_delay(Duration::from_millis(200)));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let orchestrator = ctx.orchestrator.clone();
            tokio::spawn(async move { orchestrator.ensure_fresh_solution(noon()).await })
        })
        .collect();

    let mut failed = 0;
    let mut suppressed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AcquisitionOutcome::Failed(FetchFailure::Engine(_)) => failed += 1,
            AcquisitionOutcome::Suppressed { reason, .. } => {
                assert_eq!(reason, SuppressionReason::AlreadyAttempted);
                suppressed += 1;
            }
            other => panic!("expected Failed or Suppressed, got {:?}", other),
        }
    }

    assert_eq!(failed, 1);
    assert_eq!(suppressed, 9);
    assert_eq!(ctx.engine.calls(), 1);
    assert!(!ctx.orchestrator.fetch_in_progress());
    assert_eq!(
        ctx.orchestrator.trigger_marker(noon()).await.unwrap().state,
        TriggerState::Failed
    );
}
