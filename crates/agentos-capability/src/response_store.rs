//! Per-session response store.
//!
//! `analyze.response` operates on the last captured response for a
//! session. Entries are capped at 1 MiB and expire after 24 hours; this is
//! a single-process cache, not durable state.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Per-entry size cap.
pub const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// Entry lifetime.
pub const RESPONSE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct StoredResponse {
    content: String,
    stored_at: Instant,
}

/// Thread-safe per-session cache of the most recent response.
pub struct ResponseStore {
    entries: RwLock<HashMap<String, StoredResponse>>,
    ttl: Duration,
}

impl ResponseStore {
    pub fn new() -> Self {
        Self::with_ttl(RESPONSE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        ResponseStore {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store (or replace) the session's last response, truncated to the
    /// byte cap on a char boundary.
    pub fn store(&self, session_id: &str, content: &str) {
        let mut content = content.to_string();
        if content.len() > MAX_RESPONSE_BYTES {
            let mut cut = MAX_RESPONSE_BYTES;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
        }
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                session_id.to_string(),
                StoredResponse {
                    content,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    /// The session's last response, if present and not expired.
    pub fn get(&self, session_id: &str) -> Option<String> {
        {
            let entries = self.entries.read().ok()?;
            if let Some(entry) = entries.get(session_id) {
                if entry.stored_at.elapsed() < self.ttl {
                    return Some(entry.content.clone());
                }
            } else {
                return None;
            }
        }
        // Entry exists but expired: evict under the write lock.
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(session_id);
        }
        None
    }

    /// Drop all expired entries; returns how many were evicted.
    pub fn evict_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_get() {
        let store = ResponseStore::new();
        store.store("S1", "the last response");
        assert_eq!(store.get("S1").as_deref(), Some("the last response"));
        assert!(store.get("S2").is_none());
    }

    #[test]
    fn test_replace_keeps_latest() {
        let store = ResponseStore::new();
        store.store("S1", "first");
        store.store("S1", "second");
        assert_eq!(store.get("S1").as_deref(), Some("second"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_size_cap_enforced() {
        let store = ResponseStore::new();
        let big = "x".repeat(MAX_RESPONSE_BYTES + 500);
        store.store("S1", &big);
        assert_eq!(store.get("S1").unwrap().len(), MAX_RESPONSE_BYTES);
    }

    #[test]
    fn test_size_cap_respects_char_boundary() {
        let store = ResponseStore::new();
        // Multibyte char repeated past the cap.
        let big = "é".repeat(MAX_RESPONSE_BYTES);
        store.store("S1", &big);
        let stored = store.get("S1").unwrap();
        assert!(stored.len() <= MAX_RESPONSE_BYTES);
        assert!(stored.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_expiry() {
        let store = ResponseStore::with_ttl(Duration::from_millis(10));
        store.store("S1", "short lived");
        assert!(store.get("S1").is_some());

        std::thread::sleep(Duration::from_millis(25));
        assert!(store.get("S1").is_none());
        // Eviction happened on read.
        assert!(store.is_empty());
    }

    #[test]
    fn test_evict_expired_sweep() {
        let store = ResponseStore::with_ttl(Duration::from_millis(10));
        store.store("S1", "a");
        store.store("S2", "b");
        std::thread::sleep(Duration::from_millis(25));
        store.store("S3", "c");

        assert_eq!(store.evict_expired(), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("S3").is_some());
    }
}
