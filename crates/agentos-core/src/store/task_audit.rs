//! Task audit store — the `task_audits` table.
//!
//! Tool invocations append a start and an end row keyed by the
//! invocation id, with the inputs hash and outcome in the payload.

use chrono::Utc;

use super::Db;
use crate::error::KernelResult;

/// Append-only store over `task_audits`.
#[derive(Clone)]
pub struct TaskAuditStore {
    db: Db,
}

impl TaskAuditStore {
    pub fn new(db: Db) -> Self {
        TaskAuditStore { db }
    }

    /// Append one audit row for a task.
    pub fn append(
        &self,
        task_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> KernelResult<i64> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO task_audits (task_id, event_type, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    task_id,
                    event_type,
                    payload.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All rows for one task, oldest first: `(event_type, payload)`.
    pub fn for_task(&self, task_id: &str) -> KernelResult<Vec<(String, serde_json::Value)>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT event_type, payload_json FROM task_audits
                 WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let mapped = stmt.query_map([task_id], |row| {
                let event_type: String = row.get(0)?;
                let payload: String = row.get(1)?;
                Ok((event_type, payload))
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                let (event_type, payload) = row?;
                rows.push((
                    event_type,
                    serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                ));
            }
            Ok(rows)
        })
    }
}
