//! The decision engine — proposes, never executes.
//!
//! Priority on conflict is fixed: REVOKE > FREEZE > PROMOTE > NONE. Two
//! red lines cannot be configured away: a risk score of 70 or more never
//! auto-promotes, and an observed sandbox violation always proposes
//! REVOKE. The explanation enumerates the causal chain so a reviewer can
//! retrace the decision from the evidence alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trust::{Trajectory, TrustRecord, TrustTier};

/// Proposable actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvolutionAction {
    Promote,
    Freeze,
    Revoke,
    None,
}

/// How urgently a human should look.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewLevel {
    Standard,
    HighPriority,
    Critical,
}

/// One proposed decision (a row of `evolution_decisions`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvolutionDecision {
    pub decision_id: Uuid,
    pub extension_id: String,
    pub action: EvolutionAction,
    pub risk_score_snapshot: u8,
    pub trajectory_snapshot: Trajectory,
    pub review_level: ReviewLevel,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

/// Thresholds. Constants, not configuration: red lines are not tunable.
const PROMOTE_MAX_RISK: u8 = 30;
const PROMOTE_MIN_SUCCESSES: u64 = 50;
const PROMOTE_MIN_STABLE_DAYS: u32 = 30;
const REVOKE_RISK: u8 = 70;
const REVOKE_DENIALS_24H: u64 = 3;
const FREEZE_MAX_VIOLATIONS: u64 = 5;

/// Evaluate a trust record and propose one action.
pub fn propose_action(record: &TrustRecord) -> EvolutionDecision {
    let mut revoke_reasons: Vec<String> = Vec::new();
    if record.risk_score >= REVOKE_RISK {
        revoke_reasons.push(format!(
            "risk score {} is at or above the revocation threshold {REVOKE_RISK}",
            record.risk_score
        ));
    }
    if record.sandbox_violation {
        revoke_reasons.push("a sandbox violation was observed".to_string());
    }
    if record.policy_denials_24h >= REVOKE_DENIALS_24H {
        revoke_reasons.push(format!(
            "{} policy denials in the last 24h (threshold {REVOKE_DENIALS_24H})",
            record.policy_denials_24h
        ));
    }
    if record.human_flagged {
        revoke_reasons.push("the extension is flagged for review".to_string());
    }
    if record.trajectory == Trajectory::Critical {
        revoke_reasons.push("trajectory is CRITICAL".to_string());
    }

    let (action, review_level, explanation) = if !revoke_reasons.is_empty() {
        (
            EvolutionAction::Revoke,
            ReviewLevel::Critical,
            format!(
                "Propose REVOKE for {}: {}. Evidence: risk_score={}, trajectory={:?}, \
                 violations={}, denials_24h={}, sandbox_clean={}.",
                record.extension_id,
                revoke_reasons.join("; "),
                record.risk_score,
                record.trajectory,
                record.violation_count,
                record.policy_denials_24h,
                record.sandbox_clean_record,
            ),
        )
    } else if record.trajectory == Trajectory::Degrading
        && record.violation_count <= FREEZE_MAX_VIOLATIONS
    {
        (
            EvolutionAction::Freeze,
            ReviewLevel::HighPriority,
            format!(
                "Propose FREEZE for {}: trajectory is DEGRADING with {} violation(s) \
                 (at or below the freeze limit {FREEZE_MAX_VIOLATIONS}); holding the \
                 current tier {:?} while behavior is reviewed. Evidence: risk_score={}.",
                record.extension_id, record.violation_count, record.tier, record.risk_score,
            ),
        )
    } else if promotable(record) {
        (
            EvolutionAction::Promote,
            ReviewLevel::Standard,
            format!(
                "Propose PROMOTE for {}: risk score {} is below {PROMOTE_MAX_RISK}, \
                 trajectory is STABLE, {} successful executions over {} stable days, \
                 zero violations, and a clean sandbox record.",
                record.extension_id, record.risk_score, record.success_count, record.stable_days,
            ),
        )
    } else {
        (
            EvolutionAction::None,
            ReviewLevel::Standard,
            format!(
                "No action for {}: no revocation trigger, trajectory {:?}, and the \
                 promotion bar is not met (risk_score={}, successes={}, stable_days={}, \
                 violations={}).",
                record.extension_id,
                record.trajectory,
                record.risk_score,
                record.success_count,
                record.stable_days,
                record.violation_count,
            ),
        )
    };

    EvolutionDecision {
        decision_id: Uuid::new_v4(),
        extension_id: record.extension_id.clone(),
        action,
        risk_score_snapshot: record.risk_score,
        trajectory_snapshot: record.trajectory,
        review_level,
        explanation,
        created_at: Utc::now(),
    }
}

fn promotable(record: &TrustRecord) -> bool {
    // Red line: at or past the revocation threshold, promotion is
    // impossible regardless of the other signals.
    if record.risk_score >= REVOKE_RISK {
        return false;
    }
    record.risk_score < PROMOTE_MAX_RISK
        && record.trajectory == Trajectory::Stable
        && record.success_count >= PROMOTE_MIN_SUCCESSES
        && record.stable_days >= PROMOTE_MIN_STABLE_DAYS
        && record.violation_count == 0
        && record.sandbox_clean_record
        && !record.sandbox_violation
        && record.tier != TrustTier::High
}
