// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Single-flight fetch guard.
//!
//! One fetch at a time, process-wide. The guard serializes *entry* into the
//! fetch section; it does not hand results to waiters. Each caller that gets
//! the lock runs its own precheck first (typically "is it cached now?"), so a
//! waiter that queued behind a successful fetch finds the fresh value and
//! leaves without fetching again, and a waiter behind a failed fetch decides
//! for itself what to do.
//!
//! ```text
//!   caller A ──lock──► precheck: miss ──► [in progress] action ──► unlock
//!   caller B ──lock (blocks) ─────────────────────────────────────► precheck: hit ──► unlock
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use crate::error::{Error, Result};

/// Process-wide exclusion for the expensive fetch.
#[derive(Debug)]
pub struct FetchGuard {
    lock: Mutex<()>,
    in_progress: watch::Sender<bool>,
}

impl Default for FetchGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchGuard {
    /// Create an idle guard.
    pub fn new() -> Self {
        let (in_progress, _) = watch::channel(false);
        Self {
            lock: Mutex::new(()),
            in_progress,
        }
    }

    /// Whether some caller is currently running a fetch action.
    pub fn fetch_in_progress(&self) -> bool {
        *self.in_progress.borrow()
    }

    /// Wait until no fetch action is running, for at most `bound`.
    pub async fn wait_idle(&self, bound: Duration) -> Result<()> {
        let mut rx = self.in_progress.subscribe();
        let idle = tokio::time::timeout(bound, async move {
            // The sender lives in `self`, so the channel cannot close here.
            rx.wait_for(|busy| !*busy).await.map(|_| ()).ok();
        })
        .await;
        idle.map_err(|_| Error::LockAcquisitionTimeout(bound))
    }

    /// Run `action` exclusively, unless `precheck` (run under the lock)
    /// already produces a value.
    ///
    /// The lock is released and the in-progress flag cleared on every exit
    /// path, including when the returned future is dropped mid-action.
    pub async fn with_exclusive_fetch<T, P, A>(&self, precheck: P, action: A) -> T
    where
        P: Future<Output = Option<T>>,
        A: Future<Output = T>,
    {
        let _lock = self.lock.lock().await;
        if let Some(found) = precheck.await {
            return found;
        }
        let _flag = InProgress::raise(&self.in_progress);
        action.await
    }
}

/// Holds the in-progress flag up for as long as it lives.
struct InProgress<'a>(&'a watch::Sender<bool>);

impl<'a> InProgress<'a> {
    fn raise(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}
