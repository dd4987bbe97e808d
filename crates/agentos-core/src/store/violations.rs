//! Security violation store — bounded in-memory ring plus durable rows.
//!
//! The ring keeps the last 1000 violations for cheap dashboard reads; the
//! durable copy lands in `channel_events` with `event_type =
//! "security_violation"` so the audit trail stays in one table.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use super::{ChannelEvent, Db, EventStore};
use crate::error::{ErrorCode, KernelError, KernelResult};
use crate::policy::SecurityViolation;

/// Ring capacity.
const RING_CAPACITY: usize = 1000;

/// Append-only violation store.
pub struct ViolationStore {
    events: EventStore,
    ring: Mutex<VecDeque<SecurityViolation>>,
}

impl ViolationStore {
    pub fn new(db: Db) -> Self {
        ViolationStore {
            events: EventStore::new(db),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    /// Append a violation to the ring and the durable store.
    pub fn append(&self, violation: &SecurityViolation) -> KernelResult<()> {
        let event = ChannelEvent {
            channel_id: violation.channel_id.clone(),
            event_type: "security_violation".into(),
            message_id: violation.message_id.clone(),
            status: format!("{:?}", violation.action).to_uppercase(),
            error: None,
            metadata: Some(serde_json::to_value(violation).unwrap_or_default()),
            created_at: Utc::now(),
        };
        self.events.append(&event)?;

        let mut ring = self.lock_ring()?;
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(violation.clone());
        Ok(())
    }

    /// Most recent violations, newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> KernelResult<Vec<SecurityViolation>> {
        let ring = self.lock_ring()?;
        Ok(ring.iter().rev().take(limit).cloned().collect())
    }

    /// Violations recorded for one channel, newest first.
    pub fn recent_for_channel(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> KernelResult<Vec<SecurityViolation>> {
        let ring = self.lock_ring()?;
        Ok(ring
            .iter()
            .rev()
            .filter(|v| v.channel_id == channel_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn lock_ring(&self) -> KernelResult<MutexGuard<'_, VecDeque<SecurityViolation>>> {
        self.ring
            .lock()
            .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, format!("ring lock: {e}")))
    }
}
