// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cached artifacts: the daily solution and the per-cycle trigger marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::CycleKey;

/// How a cached solution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    /// Scheduled refresh or startup warm-up.
    Scheduled,
    /// First request of the cycle fetched it.
    UserTriggered,
    /// Explicit force-refresh.
    Forced,
    /// Fetched successfully but could not be persisted; served from memory.
    EmergencyFallback,
}

/// The solution for one cycle. Written once, replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSolution {
    pub code: String,
    pub title: String,
    pub is_safe: bool,
    /// In `[0, 1]`.
    pub quality_score: f64,
    pub warnings: Vec<String>,
    /// Unix time (seconds, fractional) the entry was written.
    pub cached_at_epoch: f64,
    pub retrieval_method: RetrievalMethod,
    pub response_time_seconds: f64,
    pub cycle_key: CycleKey,
}

impl CachedSolution {
    /// Instant the entry was written.
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.cached_at_epoch.floor();
        let nanos = ((self.cached_at_epoch - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
    }

    /// Whether the entry was written before `cycle_start`.
    pub fn is_stale(&self, cycle_start: DateTime<Utc>) -> bool {
        let start = cycle_start.timestamp() as f64
            + f64::from(cycle_start.timestamp_subsec_nanos()) / 1e9;
        self.cached_at_epoch < start
    }
}

/// Who started a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduled,
    Startup,
    User,
    Admin,
}

impl TriggerSource {
    /// Retrieval method recorded on a solution fetched for this source.
    pub fn retrieval_method(self, forced: bool) -> RetrievalMethod {
        match (self, forced) {
            (TriggerSource::Scheduled | TriggerSource::Startup, _) => RetrievalMethod::Scheduled,
            (TriggerSource::User, false) => RetrievalMethod::UserTriggered,
            (TriggerSource::User | TriggerSource::Admin, _) => RetrievalMethod::Forced,
        }
    }
}

/// Progress of the fetch a marker records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Attempted,
    Succeeded,
    Failed,
}

/// Record that a fetch was started for a cycle.
///
/// Present means "do not start another non-forced fetch this cycle",
/// whatever its `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerMarker {
    pub cycle_key: CycleKey,
    pub source: TriggerSource,
    pub triggered_at: DateTime<Utc>,
    pub state: TriggerState,
}

impl TriggerMarker {
    /// A marker for a fetch starting now.
    pub fn attempted(cycle_key: CycleKey, source: TriggerSource, now: DateTime<Utc>) -> Self {
        Self {
            cycle_key,
            source,
            triggered_at: now,
            state: TriggerState::Attempted,
        }
    }

    /// Same marker with a new state.
    pub fn with_state(&self, state: TriggerState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Convert an instant to fractional Unix seconds.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_nanos()) / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cached_at_epoch: f64) -> CachedSolution {
        CachedSolution {
            code: "class Solution:\n    pass".into(),
            title: "Two Sum".into(),
            is_safe: true,
            quality_score: 0.8,
            warnings: vec![],
            cached_at_epoch,
            retrieval_method: RetrievalMethod::Scheduled,
            response_time_seconds: 1.5,
            cycle_key: "2025-01-01".parse().unwrap(),
        }
    }

    #[test]
    fn test_staleness() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(sample(1_699_999_999.5).is_stale(start));
        assert!(!sample(1_700_000_000.0).is_stale(start));
        assert!(!sample(1_700_000_100.0).is_stale(start));
    }

    #[test]
    fn test_cached_at_round_trip() {
        let at = DateTime::from_timestamp(1_700_000_000, 250_000_000).unwrap();
        let solution = sample(epoch_seconds(at));
        let back = solution.cached_at().unwrap();
        assert!((back - at).num_milliseconds().abs() <= 1);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(sample(0.0)).unwrap();
        assert_eq!(json["retrieval_method"], "scheduled");
        assert_eq!(json["cycle_key"], "2025-01-01");

        let marker = TriggerMarker::attempted(
            "2025-01-01".parse().unwrap(),
            TriggerSource::User,
            DateTime::from_timestamp(0, 0).unwrap(),
        );
        let json = serde_json::to_value(marker.with_state(TriggerState::Failed)).unwrap();
        assert_eq!(json["source"], "user");
        assert_eq!(json["state"], "failed");
    }

    #[test]
    fn test_retrieval_method_for_source() {
        assert_eq!(
            TriggerSource::User.retrieval_method(false),
            RetrievalMethod::UserTriggered
        );
        assert_eq!(
            TriggerSource::Startup.retrieval_method(false),
            RetrievalMethod::Scheduled
        );
        assert_eq!(
            TriggerSource::Admin.retrieval_method(true),
            RetrievalMethod::Forced
        );
        assert_eq!(
            TriggerSource::User.retrieval_method(true),
            RetrievalMethod::Forced
        );
    }

    #[test]
    fn test_scheduled_refresh_is_labelled_scheduled() {
        assert_eq!(
            TriggerSource::Scheduled.retrieval_method(true),
            RetrievalMethod::Scheduled
        );
        assert_eq!(
            TriggerSource::Scheduled.retrieval_method(false),
            RetrievalMethod::Scheduled
        );
    }
}
