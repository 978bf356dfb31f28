//! In-memory lock store for tests and single-process deployments.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {async_trait::async_trait, tokio::time::Instant};

use crate::{Result, lock::LockClient};

struct Entry {
    token: String,
    expires_at: Instant,
}

/// Lock store backed by a `HashMap`. Shared by cloning an `Arc` of it, which
/// is how tests simulate several workers pointing at one store.
pub struct InMemoryLock {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Current token stored under `key`, ignoring expired entries.
    pub fn holder(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.token.clone())
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockClient for InMemoryLock {
    async fn acquire(&self, key: &str, token: &str, ttl_ms: u64) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry {
            token: token.to_string(),
            expires_at: now + Duration::from_millis(ttl_ms),
        });
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let owned = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && entry.token == token);
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }
}
