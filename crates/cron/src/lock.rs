//! Distributed lock trait shared by every worker process.

use async_trait::async_trait;

use crate::Result;

/// Build the store key guarding one job.
pub fn lock_key(namespace: &str, job_id: &str) -> String {
    format!("{namespace}:cronjob:{job_id}")
}

/// A fresh fencing token for one acquire attempt.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mutual exclusion backed by a shared key-value store.
///
/// Both operations must be a single atomic step against the store.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Set `key = token` with expiry `ttl_ms` only if `key` is absent.
    ///
    /// Returns `true` when the lock was obtained.
    async fn acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool>;

    /// Delete `key` only if it still holds `token`.
    ///
    /// Returns `true` when the key was deleted, `false` when it was missing or
    /// held a different token (left untouched).
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}
