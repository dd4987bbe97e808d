//! Message dedupe store — `(channel_id, message_id)`, first writer wins.
//!
//! Providers retry webhook deliveries; replays must be suppressed as
//! success so the provider stops retrying.

use chrono::Utc;

use super::Db;
use crate::error::KernelResult;

/// First-writer-wins dedupe over `(channel_id, message_id)`.
#[derive(Clone)]
pub struct DedupeStore {
    db: Db,
}

impl DedupeStore {
    pub fn new(db: Db) -> Self {
        DedupeStore { db }
    }

    /// Record the pair; returns `true` if this was the first sighting.
    ///
    /// `INSERT OR IGNORE` against the primary key makes the race-free
    /// first-writer decision inside SQLite.
    pub fn check_and_record(&self, channel_id: &str, message_id: &str) -> KernelResult<bool> {
        let changed = self.db.with(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_dedupe (channel_id, message_id, first_seen_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![channel_id, message_id, Utc::now().to_rfc3339()],
            )
        })?;
        Ok(changed == 1)
    }

    /// Whether the pair has been seen before (read-only).
    pub fn seen(&self, channel_id: &str, message_id: &str) -> KernelResult<bool> {
        let count: i64 = self.db.with(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM message_dedupe WHERE channel_id = ?1 AND message_id = ?2",
                rusqlite::params![channel_id, message_id],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }
}
