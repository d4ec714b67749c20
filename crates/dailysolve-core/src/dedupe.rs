// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request deduplicator.
//!
//! Collapses concurrent calls with the same key into one execution and hands
//! every caller a clone of its result, failures included. Unlike
//! [`FetchGuard`](crate::single_flight::FetchGuard) this shares the *result*;
//! it keeps nothing once the call completes, so a later call with the same
//! key runs the operation again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, warn};

/// The shared operation panicked or was aborted before producing a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("deduplicated operation did not complete: {0}")]
pub struct OperationAborted(pub String);

type Pending<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Entry<T, E> {
    id: u64,
    result: Pending<T, E>,
}

type Table<T, E> = Arc<Mutex<HashMap<String, Entry<T, E>>>>;

fn lock<T, E>(table: &Table<T, E>) -> MutexGuard<'_, HashMap<String, Entry<T, E>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its table entry when the operation's task ends, however it ends.
struct Release<T, E> {
    table: Table<T, E>,
    key: String,
    id: u64,
}

impl<T, E> Drop for Release<T, E> {
    fn drop(&mut self) {
        let mut pending = lock(&self.table);
        if pending.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            pending.remove(&self.key);
        }
    }
}

/// Keyed in-flight call table.
///
/// Each operation runs on its own task, so it completes and leaves the table
/// even when every caller waiting on it is dropped.
pub struct RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pending: Table<T, E>,
    next_id: AtomicU64,
}

impl<T, E> Default for RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<OperationAborted> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<OperationAborted> + 'static,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `operation` unless a call with `key` is already in flight, in
    /// which case wait for that call and return its result.
    pub async fn dedupe<F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut pending = lock(&self.pending);
            match pending.get(key) {
                Some(existing) => {
                    debug!(key, "Joining in-flight request");
                    existing.result.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let release = Release {
                        table: self.pending.clone(),
                        key: key.to_string(),
                        id,
                    };
                    let operation = operation();
                    // The entry is inserted below while the table is still
                    // locked, so `release` cannot run before it exists.
                    let task = tokio::spawn(async move {
                        let _release = release;
                        operation.await
                    });
                    let owned_key = key.to_string();
                    let result = async move {
                        task.await.unwrap_or_else(|e| {
                            warn!(key = %owned_key, error = %e, "Deduplicated operation did not complete");
                            Err(E::from(OperationAborted(e.to_string())))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(
                        key.to_string(),
                        Entry {
                            id,
                            result: result.clone(),
                        },
                    );
                    result
                }
            }
        };

        shared.await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestError {
        Store(String),
        Aborted(String),
    }

    impl From<OperationAborted> for TestError {
        fn from(e: OperationAborted) -> Self {
            TestError::Aborted(e.0)
        }
    }

    type Dedupe<T> = RequestDeduplicator<T, TestError>;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let dedupe: Arc<Dedupe<u32>> = Arc::new(RequestDeduplicator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let dedupe = dedupe.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                dedupe
                    .dedupe("daily_solution_get:2025-01-01", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(99)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(99));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedupe.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_fans_out_to_all_waiters() {
        let dedupe: Arc<Dedupe<u32>> = Arc::new(RequestDeduplicator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dedupe = dedupe.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                dedupe
                    .dedupe("k", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err::<u32, _>(TestError::Store("store down".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(TestError::Store("store down".to_string()))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completed_call_is_not_reused() {
        let dedupe: Dedupe<u32> = RequestDeduplicator::new();
        let first = dedupe.dedupe("k", || async { Ok(1) }).await;
        let second = dedupe.dedupe("k", || async { Ok(2) }).await;
        assert_eq!(first, Ok(1));
        assert_eq!(second, Ok(2));
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let dedupe: Arc<Dedupe<&'static str>> = Arc::new(RequestDeduplicator::new());
        let (a, b) = tokio::join!(
            dedupe.dedupe("a", || async { Ok("a") }),
            dedupe.dedupe("b", || async { Ok("b") }),
        );
        assert_eq!(a, Ok("a"));
        assert_eq!(b, Ok("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_completes_after_only_caller_is_dropped() {
        let dedupe: Dedupe<u32> = RequestDeduplicator::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = finished.clone();
        let dropped = tokio::time::timeout(
            Duration::from_millis(100),
            dedupe.dedupe("fresh_solution_post:2025-01-01", move || async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }),
        )
        .await;
        assert!(dropped.is_err());
        assert_eq!(dedupe.in_flight(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(dedupe.in_flight(), 0);

        let next = dedupe.dedupe("fresh_solution_post:2025-01-01", || async { Ok(8) }).await;
        assert_eq!(next, Ok(8));
    }

    #[tokio::test]
    async fn test_panicking_operation_reports_aborted() {
        let dedupe: Dedupe<u32> = RequestDeduplicator::new();
        let result = dedupe
            .dedupe("k", || async { panic!("operation blew up") })
            .await;
        assert!(matches!(result, Err(TestError::Aborted(_))));
        assert_eq!(dedupe.in_flight(), 0);
    }
}
