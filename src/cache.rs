//! TTL-bounded in-memory cache for audit results
//!
//! One instance per view, owned by the server state. Expired entries are
//! indistinguishable from missing entries; they are overwritten in place on
//! the next insert rather than swept by a background task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// Concurrent map from string keys to cloned values with a fixed TTL.
pub struct MemoryCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry<T>>>,
}

impl<T: Clone> MemoryCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a clone of the cached value, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: T) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.into(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn remove(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}
