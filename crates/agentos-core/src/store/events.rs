//! Channel event audit store — the `channel_events` table.
//!
//! Every message accepted or rejected by the chain leaves a row here; the
//! invariant "accepted ⇒ audit row exists keyed by (channel_id, message_id)"
//! is what the test suite checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Db;
use crate::error::KernelResult;

/// One audited channel event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_id: String,
    pub event_type: String,
    pub message_id: Option<String>,
    /// Outcome: "accepted", "rejected", "sent", "send_failed", …
    pub status: String,
    pub error: Option<String>,
    /// Middleware annotations and decision context, JSON-encoded.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ChannelEvent {
    /// Event for an inbound message with the given outcome.
    pub fn inbound(
        channel_id: impl Into<String>,
        message_id: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        ChannelEvent {
            channel_id: channel_id.into(),
            event_type: "message_inbound".into(),
            message_id: Some(message_id.into()),
            status: status.into(),
            error: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Event for an outbound delivery attempt.
    pub fn outbound(
        channel_id: impl Into<String>,
        message_id: Option<String>,
        status: impl Into<String>,
    ) -> Self {
        ChannelEvent {
            channel_id: channel_id.into(),
            event_type: "message_outbound".into(),
            message_id,
            status: status.into(),
            error: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Append-only store over `channel_events`.
#[derive(Clone)]
pub struct EventStore {
    db: Db,
}

impl EventStore {
    pub fn new(db: Db) -> Self {
        EventStore { db }
    }

    /// Append one event; returns the row id.
    pub fn append(&self, event: &ChannelEvent) -> KernelResult<i64> {
        let metadata = event
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO channel_events
                     (channel_id, event_type, message_id, status, error, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event.channel_id,
                    event.event_type,
                    event.message_id,
                    event.status,
                    event.error,
                    metadata,
                    event.created_at.to_rfc3339(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All events recorded for one `(channel_id, message_id)`, oldest first.
    pub fn for_message(&self, channel_id: &str, message_id: &str) -> KernelResult<Vec<ChannelEvent>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, event_type, message_id, status, error, metadata, created_at
                 FROM channel_events
                 WHERE channel_id = ?1 AND message_id = ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(rusqlite::params![channel_id, message_id], row_to_event)?;
            rows.collect()
        })
    }

    /// Most recent events for a channel, newest first.
    pub fn recent(&self, channel_id: &str, limit: usize) -> KernelResult<Vec<ChannelEvent>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, event_type, message_id, status, error, metadata, created_at
                 FROM channel_events
                 WHERE channel_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![channel_id, limit as i64], row_to_event)?;
            rows.collect()
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelEvent> {
    let metadata: Option<String> = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(ChannelEvent {
        channel_id: row.get(0)?,
        event_type: row.get(1)?,
        message_id: row.get(2)?,
        status: row.get(3)?,
        error: row.get(4)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
    })
}
