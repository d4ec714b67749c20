// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process cache store.
//!
//! Used by tests and by single-node deployments without Redis. Expiry is
//! measured with `tokio::time::Instant`, so paused-clock tests see keys
//! expire when virtual time advances. Expired keys are dropped when read and
//! swept on every write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::{CacheError, CacheStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// DashMap-backed store with TTLs and switchable failure modes.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, Entry>,
    unavailable: AtomicBool,
    reject_writes: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail as if the server were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `set` fail while reads keep working.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored keys, expired ones included.
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Connection("in-memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| !entry.is_live(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check_available()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("in-memory store rejecting writes".into()));
        }
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        let ttl = ttl.max(Duration::from_secs(1));
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| entry.is_live(now)))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|key, entry| {
            let matched = key.starts_with(prefix);
            if matched && entry.is_live(now) {
                removed += 1;
            }
            !matched
        });
        Ok(removed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError> {
        self.check_available()?;
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|entry| {
            let remaining = entry.expires_at.checked_duration_since(now)?;
            (!remaining.is_zero()).then(|| remaining.as_secs_f64().ceil() as u64)
        }))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}
