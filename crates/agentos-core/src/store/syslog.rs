//! System log store — the `system_logs` table.
//!
//! Webhook endpoints return provider-expected success even on internal
//! errors; the real failure is captured here.

use chrono::Utc;

use super::Db;
use crate::error::KernelResult;

/// Append-only store over `system_logs`.
#[derive(Clone)]
pub struct SystemLogStore {
    db: Db,
}

impl SystemLogStore {
    pub fn new(db: Db) -> Self {
        SystemLogStore { db }
    }

    /// Append one log row.
    pub fn append(
        &self,
        level: &str,
        message: &str,
        context: Option<&serde_json::Value>,
    ) -> KernelResult<i64> {
        let context_json = context.map(|c| c.to_string());
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO system_logs (level, message, context_json, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![level, message, context_json, Utc::now().to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent rows at or above the given level would need level
    /// ordering; keep reads simple and filter on exact level.
    pub fn recent(&self, level: Option<&str>, limit: usize) -> KernelResult<Vec<(String, String)>> {
        self.db.with(|conn| {
            let mut rows = Vec::new();
            match level {
                Some(lvl) => {
                    let mut stmt = conn.prepare(
                        "SELECT level, message FROM system_logs
                         WHERE level = ?1 ORDER BY id DESC LIMIT ?2",
                    )?;
                    let mapped = stmt.query_map(rusqlite::params![lvl, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT level, message FROM system_logs ORDER BY id DESC LIMIT ?1",
                    )?;
                    let mapped = stmt.query_map(rusqlite::params![limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?;
                    for row in mapped {
                        rows.push(row?);
                    }
                }
            }
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_read() {
        let store = SystemLogStore::new(Db::in_memory().unwrap());
        store
            .append("error", "adapter send failed", Some(&serde_json::json!({"channel": "slack-main"})))
            .unwrap();
        store.append("info", "started", None).unwrap();

        let all = store.recent(None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].1, "started");

        let errors = store.recent(Some("error"), 10).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, "adapter send failed");
    }
}
