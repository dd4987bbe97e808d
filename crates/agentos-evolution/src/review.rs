//! Human review queue over `evolution_decisions`.
//!
//! Transitions follow PROPOSED → APPROVED → EXECUTED, with REJECTED and
//! EXPIRED as terminal branches. The table is append-only: a transition
//! writes a new row superseding the previous one; the current state of a
//! decision chain is its latest row.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::store::Db;

use crate::engine::{EvolutionAction, EvolutionDecision, ReviewLevel};
use crate::trust::Trajectory;

/// Review state of a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Proposed,
    Approved,
    Rejected,
    Expired,
    Executed,
}

impl DecisionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Proposed => "PROPOSED",
            DecisionStatus::Approved => "APPROVED",
            DecisionStatus::Rejected => "REJECTED",
            DecisionStatus::Expired => "EXPIRED",
            DecisionStatus::Executed => "EXECUTED",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "APPROVED" => DecisionStatus::Approved,
            "REJECTED" => DecisionStatus::Rejected,
            "EXPIRED" => DecisionStatus::Expired,
            "EXECUTED" => DecisionStatus::Executed,
            _ => DecisionStatus::Proposed,
        }
    }

    /// Legal next states.
    fn may_become(&self, next: DecisionStatus) -> bool {
        matches!(
            (self, next),
            (DecisionStatus::Proposed, DecisionStatus::Approved)
                | (DecisionStatus::Proposed, DecisionStatus::Rejected)
                | (DecisionStatus::Proposed, DecisionStatus::Expired)
                | (DecisionStatus::Approved, DecisionStatus::Executed)
        )
    }
}

/// A stored decision row.
#[derive(Clone, Debug)]
pub struct DecisionRow {
    pub decision_id: String,
    pub extension_id: String,
    pub action: EvolutionAction,
    pub risk_score: u8,
    pub trajectory: Trajectory,
    pub review_level: ReviewLevel,
    pub explanation: String,
    pub status: DecisionStatus,
}

/// Append-only store + review-queue transitions.
#[derive(Clone)]
pub struct DecisionStore {
    db: Db,
}

impl DecisionStore {
    pub fn new(db: Db) -> Self {
        DecisionStore { db }
    }

    /// Record a fresh proposal. Returns its decision id.
    pub fn propose(&self, decision: &EvolutionDecision) -> KernelResult<String> {
        let id = decision.decision_id.to_string();
        self.insert_row(
            &id,
            &decision.extension_id,
            decision.action,
            decision.risk_score_snapshot,
            decision.trajectory_snapshot,
            decision.review_level,
            &decision.explanation,
            DecisionStatus::Proposed,
        )?;
        info!(
            extension = %decision.extension_id,
            action = ?decision.action,
            "evolution decision proposed"
        );
        Ok(id)
    }

    /// Transition the latest row for an extension's decision chain.
    ///
    /// Appends a superseding row (never edits in place). The transition is
    /// rejected unless it is legal from the current status.
    pub fn transition(
        &self,
        decision_id: &str,
        next: DecisionStatus,
        reviewer: &str,
    ) -> KernelResult<String> {
        let current = self.get(decision_id)?.ok_or_else(|| {
            KernelError::new(
                ErrorCode::ConfigInvalid,
                format!("unknown decision {decision_id}"),
            )
        })?;
        if !current.status.may_become(next) {
            return Err(KernelError::new(
                ErrorCode::OperationDenied,
                format!("{:?} may not become {:?}", current.status, next),
            ));
        }

        let new_id = Uuid::new_v4().to_string();
        let explanation = format!(
            "{} [{} by {reviewer}, supersedes {decision_id}]",
            current.explanation,
            next.as_str(),
        );
        self.insert_row(
            &new_id,
            &current.extension_id,
            current.action,
            current.risk_score,
            current.trajectory,
            current.review_level,
            &explanation,
            next,
        )?;
        info!(decision = %decision_id, next = ?next, by = %reviewer, "decision transitioned");
        Ok(new_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_row(
        &self,
        decision_id: &str,
        extension_id: &str,
        action: EvolutionAction,
        risk_score: u8,
        trajectory: Trajectory,
        review_level: ReviewLevel,
        explanation: &str,
        status: DecisionStatus,
    ) -> KernelResult<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO evolution_decisions
                     (decision_id, extension_id, action, risk_score, trajectory,
                      review_level, explanation, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    decision_id,
                    extension_id,
                    enum_str(&action),
                    risk_score as i64,
                    enum_str(&trajectory),
                    enum_str(&review_level),
                    explanation,
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, decision_id: &str) -> KernelResult<Option<DecisionRow>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT decision_id, extension_id, action, risk_score, trajectory,
                        review_level, explanation, status
                 FROM evolution_decisions WHERE decision_id = ?1",
            )?;
            let mut rows = stmt.query_map([decision_id], row_to_decision)?;
            rows.next().transpose()
        })
    }

    /// Full history for an extension, oldest first.
    pub fn history(&self, extension_id: &str) -> KernelResult<Vec<DecisionRow>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT decision_id, extension_id, action, risk_score, trajectory,
                        review_level, explanation, status
                 FROM evolution_decisions WHERE extension_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([extension_id], row_to_decision)?;
            rows.collect()
        })
    }

    /// Decisions currently awaiting review.
    pub fn pending(&self) -> KernelResult<Vec<DecisionRow>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT decision_id, extension_id, action, risk_score, trajectory,
                        review_level, explanation, status
                 FROM evolution_decisions WHERE status = 'PROPOSED'
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], row_to_decision)?;
            rows.collect()
        })
    }
}

fn enum_str<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<DecisionRow> {
    let action: String = row.get(2)?;
    let trajectory: String = row.get(4)?;
    let review_level: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(DecisionRow {
        decision_id: row.get(0)?,
        extension_id: row.get(1)?,
        action: parse_enum(&action).unwrap_or(EvolutionAction::None),
        risk_score: row.get::<_, i64>(3)? as u8,
        trajectory: parse_enum(&trajectory).unwrap_or(Trajectory::Stable),
        review_level: parse_enum(&review_level).unwrap_or(ReviewLevel::Standard),
        explanation: row.get(6)?,
        status: DecisionStatus::parse(&status),
    })
}

fn parse_enum<T: for<'de> Deserialize<'de>>(s: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}
