//! Sliding-window rate limiter keyed by `(channel_id, user_key)`.
//!
//! Events are durable rows; the window is trimmed on every check, so the
//! table stays bounded by `limit × active keys`.

use super::Db;
use crate::error::KernelResult;

/// Window length: the per-channel limit is expressed per minute.
const WINDOW_MS: i64 = 60_000;

/// Durable sliding-window limiter.
#[derive(Clone)]
pub struct RateLimitStore {
    db: Db,
}

impl RateLimitStore {
    pub fn new(db: Db) -> Self {
        RateLimitStore { db }
    }

    /// Record one event if the key is under `limit_per_minute`.
    ///
    /// Returns `true` when the event was admitted, `false` when the window
    /// is full. A limit of 0 disables limiting for the key.
    pub fn check_and_record(
        &self,
        channel_id: &str,
        user_key: &str,
        limit_per_minute: u32,
    ) -> KernelResult<bool> {
        self.check_and_record_at(channel_id, user_key, limit_per_minute, now_ms())
    }

    /// Clock-injected variant used by tests.
    pub fn check_and_record_at(
        &self,
        channel_id: &str,
        user_key: &str,
        limit_per_minute: u32,
        now_ms: i64,
    ) -> KernelResult<bool> {
        if limit_per_minute == 0 {
            return Ok(true);
        }
        let cutoff = now_ms - WINDOW_MS;
        self.db.with(|conn| {
            conn.execute(
                "DELETE FROM rate_events
                 WHERE channel_id = ?1 AND user_key = ?2 AND ts_ms < ?3",
                rusqlite::params![channel_id, user_key, cutoff],
            )?;
            let in_window: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rate_events
                 WHERE channel_id = ?1 AND user_key = ?2",
                rusqlite::params![channel_id, user_key],
                |row| row.get(0),
            )?;
            if in_window >= limit_per_minute as i64 {
                return Ok(false);
            }
            conn.execute(
                "INSERT INTO rate_events (channel_id, user_key, ts_ms) VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, user_key, now_ms],
            )?;
            Ok(true)
        })
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_limit() {
        let store = RateLimitStore::new(Db::in_memory().unwrap());
        let t0 = 1_000_000;
        for i in 0..3 {
            assert!(
                store.check_and_record_at("ch", "u1", 3, t0 + i).unwrap(),
                "event {i} should be admitted"
            );
        }
        assert!(!store.check_and_record_at("ch", "u1", 3, t0 + 10).unwrap());
    }

    #[test]
    fn test_window_slides() {
        let store = RateLimitStore::new(Db::in_memory().unwrap());
        let t0 = 1_000_000;
        assert!(store.check_and_record_at("ch", "u1", 1, t0).unwrap());
        assert!(!store.check_and_record_at("ch", "u1", 1, t0 + 1).unwrap());
        // one full window later, the old event has expired
        assert!(store
            .check_and_record_at("ch", "u1", 1, t0 + WINDOW_MS + 1)
            .unwrap());
    }

    #[test]
    fn test_keys_are_independent() {
        let store = RateLimitStore::new(Db::in_memory().unwrap());
        let t0 = 5_000_000;
        assert!(store.check_and_record_at("ch", "u1", 1, t0).unwrap());
        assert!(store.check_and_record_at("ch", "u2", 1, t0).unwrap());
        assert!(store.check_and_record_at("other", "u1", 1, t0).unwrap());
    }

    #[test]
    fn test_zero_limit_disables() {
        let store = RateLimitStore::new(Db::in_memory().unwrap());
        for i in 0..100 {
            assert!(store.check_and_record_at("ch", "u1", 0, i).unwrap());
        }
    }
}
