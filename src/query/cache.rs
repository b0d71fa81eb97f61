use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Thread-safe cache of serialized report bodies with TTL-based expiration.
///
/// Holds at most `max_entries` bodies; once full, expired entries are purged
/// and new inserts are dropped until space frees up.
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    max_entries: usize,
}

struct CacheEntry {
    body: String,
    inserted_at: Instant,
}

impl QueryCache {
    /// Create a new cache with the given TTL in seconds.
    /// A TTL of 0 disables caching (all lookups miss).
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::from_secs(ttl_secs),
            max_entries,
        }
    }

    const fn is_disabled(&self) -> bool {
        self.ttl.is_zero() || self.max_entries == 0
    }

    /// Look up a cached body by key. Returns `None` if missing or expired.
    pub fn get(&self, key: &str) -> Option<String> {
        if self.is_disabled() {
            return None;
        }
        self.entries.lock().get(key).and_then(|entry| {
            if entry.inserted_at.elapsed() > self.ttl {
                None
            } else {
                Some(entry.body.clone())
            }
        })
    }

    /// Insert a report body.
    #[allow(clippy::significant_drop_tightening)]
    pub fn insert(&self, key: String, body: String) {
        if self.is_disabled() {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
            if entries.len() >= self.max_entries {
                tracing::debug!(max_entries = self.max_entries, "Report cache full");
                return;
            }
        }
        entries.insert(
            key,
            CacheEntry {
                body,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove expired entries from the cache. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Returns the number of entries currently in the cache.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache contains no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
