// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cache store trait.
//!
//! A store deals in fully-qualified keys and serialized text values. Key
//! layout, serialization and fail-soft behavior live one level up in
//! [`DurableCache`](super::DurableCache).

use std::time::Duration;

use async_trait::async_trait;

/// Key/value store with per-key expiry.
///
/// Implementations must be safe to share between tasks. Every `set`
/// replaces the value and its TTL; reads never extend a TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short name for logs and health output (e.g. "redis").
    fn backend_type(&self) -> &'static str;

    /// Read a value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value with the given TTL, overwriting any previous value.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    ///
    /// Must be safe to run concurrently with `set`; keys written while the
    /// sweep is running may or may not be removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Remaining TTL of a key in whole seconds, `None` if absent or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, CacheError>;

    /// Round-trip to the store.
    async fn ping(&self) -> Result<(), CacheError>;
}

/// Errors from a cache store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Could not reach the store or the connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation did not complete in time.
    #[error("operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The store answered with an error.
    #[error("backend error: {0}")]
    Backend(String),

    /// A value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A health probe read back something other than what it wrote.
    #[error("health probe mismatch")]
    ProbeMismatch,
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            CacheError::Connection(e.to_string())
        } else if e.is_timeout() {
            CacheError::Timeout(Duration::ZERO)
        } else {
            CacheError::Backend(e.to_string())
        }
    }
}
