//! Findings — aggregated evidence rows in `lead_findings`.
//!
//! Repeated signals (violations, denials, decision triggers) collapse into
//! one finding per fingerprint; re-observations bump the count and the
//! last-seen timestamp instead of inserting new rows.

use chrono::Utc;

use agentos_core::error::KernelResult;
use agentos_core::store::Db;

/// One aggregated finding.
#[derive(Clone, Debug)]
pub struct Finding {
    pub fingerprint: String,
    pub code: String,
    pub severity: String,
    pub title: String,
    pub description: Option<String>,
    pub window_kind: String,
    pub count: u64,
    pub linked_task_id: Option<String>,
}

/// Upsert-style store over `lead_findings`.
#[derive(Clone)]
pub struct FindingStore {
    db: Db,
}

impl FindingStore {
    pub fn new(db: Db) -> Self {
        FindingStore { db }
    }

    /// Record an observation. First sighting inserts; repeats bump
    /// `count` and `last_seen_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        fingerprint: &str,
        code: &str,
        severity: &str,
        title: &str,
        description: Option<&str>,
        window_kind: &str,
        evidence: Option<&serde_json::Value>,
        linked_task_id: Option<&str>,
    ) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        let evidence_json = evidence.map(|e| e.to_string());
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO lead_findings
                     (fingerprint, code, severity, title, description, window_kind,
                      first_seen_at, last_seen_at, count, evidence_json, linked_task_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1, ?8, ?9)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                     last_seen_at = excluded.last_seen_at,
                     count = count + 1,
                     evidence_json = COALESCE(excluded.evidence_json, evidence_json),
                     linked_task_id = COALESCE(excluded.linked_task_id, linked_task_id)",
                rusqlite::params![
                    fingerprint,
                    code,
                    severity,
                    title,
                    description,
                    window_kind,
                    now,
                    evidence_json,
                    linked_task_id,
                ],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, fingerprint: &str) -> KernelResult<Option<Finding>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT fingerprint, code, severity, title, description, window_kind,
                        count, linked_task_id
                 FROM lead_findings WHERE fingerprint = ?1",
            )?;
            let mut rows = stmt.query_map([fingerprint], |row| {
                Ok(Finding {
                    fingerprint: row.get(0)?,
                    code: row.get(1)?,
                    severity: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    window_kind: row.get(5)?,
                    count: row.get::<_, i64>(6)? as u64,
                    linked_task_id: row.get(7)?,
                })
            })?;
            rows.next().transpose()
        })
    }

    /// Findings above a minimum count, most frequent first.
    pub fn frequent(&self, min_count: u64) -> KernelResult<Vec<Finding>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT fingerprint, code, severity, title, description, window_kind,
                        count, linked_task_id
                 FROM lead_findings WHERE count >= ?1 ORDER BY count DESC",
            )?;
            let rows = stmt.query_map([min_count as i64], |row| {
                Ok(Finding {
                    fingerprint: row.get(0)?,
                    code: row.get(1)?,
                    severity: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    window_kind: row.get(5)?,
                    count: row.get::<_, i64>(6)? as u64,
                    linked_task_id: row.get(7)?,
                })
            })?;
            rows.collect()
        })
    }
}
