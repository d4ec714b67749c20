// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable cache.
//!
//! [`DurableCache`] wraps a [`CacheStore`] with the key layout
//! `{prefix}{namespace}:{key}` and JSON values. Every operation except
//! [`DurableCache::health_check`] fails soft: an unreachable store reads as
//! "absent", writes report `false`, and a value that no longer deserializes
//! is treated as missing.

mod memory;
mod redis_store;
mod traits;

pub use memory::InMemoryStore;
pub use redis_store::RedisStore;
pub use traits::{CacheError, CacheStore};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Namespace holding one solution per cycle.
pub const SOLUTION_NAMESPACE: &str = "daily_solution";
/// Namespace holding one trigger marker per cycle.
pub const TRIGGER_NAMESPACE: &str = "daily_trigger";
/// Namespace for service bookkeeping such as health-check results.
pub const SYSTEM_NAMESPACE: &str = "system";

const PROBE_KEY: &str = "health_probe";

/// Namespaced, JSON-valued, fail-soft view over a cache store.
#[derive(Clone)]
pub struct DurableCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl DurableCache {
    /// Wrap `store`, prefixing every key with `prefix`.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Backend name of the underlying store.
    pub fn backend_type(&self) -> &'static str {
        self.store.backend_type()
    }

    /// Fully-qualified store key.
    pub fn full_key(&self, namespace: &str, key: &str) -> String {
        format!("{}{}:{}", self.prefix, namespace, key)
    }

    /// Read and deserialize a value.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full_key = self.full_key(namespace, key);
        let raw = match self.store.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key = %full_key, "Cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key = %full_key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Serialize and store a value, replacing any previous one and its TTL.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let full_key = self.full_key(namespace, key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to serialize cache value");
                return false;
            }
        };

        match self.store.set(&full_key, &raw, ttl).await {
            Ok(()) => {
                debug!(key = %full_key, ttl_secs = ttl.as_secs(), "Cache set");
                true
            }
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Remove a value. Returns whether something was removed.
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        let full_key = self.full_key(namespace, key);
        match self.store.delete(&full_key).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Remove every key in `namespace` whose key starts with `key_prefix`.
    pub async fn delete_by_prefix(&self, namespace: &str, key_prefix: &str) -> u64 {
        let prefix = self.full_key(namespace, key_prefix);
        match self.store.delete_by_prefix(&prefix).await {
            Ok(count) => {
                if count > 0 {
                    debug!(prefix = %prefix, count, "Deleted cache entries by prefix");
                }
                count
            }
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Cache prefix delete failed");
                0
            }
        }
    }

    /// Remove every key in `namespace`.
    pub async fn flush_namespace(&self, namespace: &str) -> u64 {
        self.delete_by_prefix(namespace, "").await
    }

    /// Remaining TTL of a value in seconds.
    pub async fn ttl(&self, namespace: &str, key: &str) -> Option<u64> {
        let full_key = self.full_key(namespace, key);
        match self.store.ttl(&full_key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Cache TTL lookup failed");
                None
            }
        }
    }

    /// Ping the store and round-trip a probe value.
    ///
    /// Unlike the other operations this surfaces failures.
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.store.ping().await?;

        let key = self.full_key(SYSTEM_NAMESPACE, PROBE_KEY);
        let token = uuid::Uuid::new_v4().to_string();
        self.store
            .set(&key, &token, Duration::from_secs(10))
            .await?;
        let read_back = self.store.get(&key).await?;
        self.store.delete(&key).await?;

        if read_back.as_deref() == Some(token.as_str()) {
            Ok(())
        } else {
            Err(CacheError::ProbeMismatch)
        }
    }
}
