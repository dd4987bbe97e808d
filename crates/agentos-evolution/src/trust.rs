//! Trust records — risk scoring, tiers, and trajectory.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Tiers & trajectory
// ─────────────────────────────────────────────

/// Extension trust tiers. HIGH is reachable only through an approved
/// PROMOTE decision, never directly from scoring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustTier {
    Quarantined,
    Basic,
    Trusted,
    High,
}

impl TrustTier {
    /// Tier implied by a risk score (HIGH excluded).
    pub fn from_risk_score(score: u8) -> Self {
        match score {
            0..=29 => TrustTier::Trusted,
            30..=69 => TrustTier::Basic,
            _ => TrustTier::Quarantined,
        }
    }
}

/// Which way an extension's behavior is heading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trajectory {
    Stable,
    Improving,
    Degrading,
    Critical,
}

// ─────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────

/// Per-extension trust state fed to the decision engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustRecord {
    pub extension_id: String,
    pub tier: TrustTier,
    /// 0 (clean) to 100 (radioactive).
    pub risk_score: u8,
    pub trajectory: Trajectory,
    pub success_count: u64,
    pub failure_count: u64,
    pub violation_count: u64,
    pub policy_denials_24h: u64,
    pub sandbox_clean_record: bool,
    /// A sandbox violation was observed (isolation breach attempt).
    pub sandbox_violation: bool,
    pub stable_days: u32,
    pub human_flagged: bool,
}

impl TrustRecord {
    /// A clean record for a freshly installed extension.
    pub fn new(extension_id: impl Into<String>) -> Self {
        TrustRecord {
            extension_id: extension_id.into(),
            tier: TrustTier::Basic,
            risk_score: 40,
            trajectory: Trajectory::Stable,
            success_count: 0,
            failure_count: 0,
            violation_count: 0,
            policy_denials_24h: 0,
            sandbox_clean_record: true,
            sandbox_violation: false,
            stable_days: 0,
            human_flagged: false,
        }
    }

    /// Recompute score, tier, and trajectory from the counters.
    pub fn rescore(&mut self, recent_scores: &[u8]) {
        self.risk_score = compute_risk_score(self);
        // The HIGH tier is sticky unless the score disqualifies it.
        let scored = TrustTier::from_risk_score(self.risk_score);
        if self.tier != TrustTier::High || scored == TrustTier::Quarantined {
            self.tier = scored;
        }
        self.trajectory = compute_trajectory(self.risk_score, recent_scores);
    }
}

/// Deterministic risk score from the record's counters.
///
/// Violations weigh the most, then fresh policy denials, then the failure
/// ratio; a long clean history pulls the score down.
pub fn compute_risk_score(record: &TrustRecord) -> u8 {
    let mut score: i64 = 20;

    score += (record.violation_count as i64) * 12;
    score += (record.policy_denials_24h as i64) * 10;
    if record.sandbox_violation {
        score += 60;
    }
    if record.human_flagged {
        score += 30;
    }

    let total = record.success_count + record.failure_count;
    if total > 0 {
        let failure_ratio = record.failure_count as f64 / total as f64;
        score += (failure_ratio * 40.0) as i64;
    }

    // Clean-history discount: capped so history never buys absolution for
    // live violations.
    let discount = (record.success_count / 25).min(10) as i64 + (record.stable_days / 10).min(10) as i64;
    score -= discount;

    score.clamp(0, 100) as u8
}

/// Trajectory from the current score and a recent-score window (oldest
/// first).
pub fn compute_trajectory(current: u8, recent: &[u8]) -> Trajectory {
    if current >= 85 {
        return Trajectory::Critical;
    }
    if recent.len() < 2 {
        return Trajectory::Stable;
    }
    let mid = recent.len() / 2;
    let older = average(&recent[..mid]);
    let newer = average(&recent[mid..]);
    let delta = newer - older;
    if delta > 5.0 {
        Trajectory::Degrading
    } else if delta < -5.0 {
        Trajectory::Improving
    } else {
        Trajectory::Stable
    }
}

fn average(scores: &[u8]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_score() {
        assert_eq!(TrustTier::from_risk_score(0), TrustTier::Trusted);
        assert_eq!(TrustTier::from_risk_score(29), TrustTier::Trusted);
        assert_eq!(TrustTier::from_risk_score(30), TrustTier::Basic);
        assert_eq!(TrustTier::from_risk_score(69), TrustTier::Basic);
        assert_eq!(TrustTier::from_risk_score(70), TrustTier::Quarantined);
        assert_eq!(TrustTier::from_risk_score(100), TrustTier::Quarantined);
    }

    #[test]
    fn test_clean_record_scores_low() {
        let mut record = TrustRecord::new("notes.sync");
        record.success_count = 200;
        record.stable_days = 60;
        let score = compute_risk_score(&record);
        assert!(score < 30, "clean record scored {score}");
    }

    #[test]
    fn test_sandbox_violation_dominates() {
        let mut record = TrustRecord::new("notes.sync");
        record.success_count = 1000;
        record.stable_days = 365;
        record.sandbox_violation = true;
        assert!(compute_risk_score(&record) >= 70);
    }

    #[test]
    fn test_violations_raise_score() {
        let mut record = TrustRecord::new("notes.sync");
        let clean = compute_risk_score(&record);
        record.violation_count = 5;
        assert!(compute_risk_score(&record) > clean + 30);
    }

    #[test]
    fn test_failure_ratio_contributes() {
        let mut record = TrustRecord::new("notes.sync");
        record.success_count = 10;
        record.failure_count = 10;
        let half_failing = compute_risk_score(&record);

        record.failure_count = 0;
        let all_passing = compute_risk_score(&record);
        assert!(half_failing > all_passing);
    }

    #[test]
    fn test_score_clamped() {
        let mut record = TrustRecord::new("notes.sync");
        record.violation_count = 100;
        record.sandbox_violation = true;
        record.human_flagged = true;
        assert_eq!(compute_risk_score(&record), 100);
    }

    #[test]
    fn test_trajectory_critical_at_85() {
        assert_eq!(compute_trajectory(85, &[10, 10]), Trajectory::Critical);
        assert_eq!(compute_trajectory(90, &[]), Trajectory::Critical);
    }

    #[test]
    fn test_trajectory_from_window() {
        assert_eq!(compute_trajectory(40, &[20, 22, 40, 45]), Trajectory::Degrading);
        assert_eq!(compute_trajectory(20, &[50, 48, 22, 20]), Trajectory::Improving);
        assert_eq!(compute_trajectory(30, &[30, 31, 29, 30]), Trajectory::Stable);
        assert_eq!(compute_trajectory(30, &[30]), Trajectory::Stable);
    }

    #[test]
    fn test_rescore_updates_tier() {
        let mut record = TrustRecord::new("notes.sync");
        record.success_count = 300;
        record.stable_days = 90;
        record.rescore(&[]);
        assert_eq!(record.tier, TrustTier::Trusted);
        assert!(record.risk_score < 30);

        record.violation_count = 8;
        record.sandbox_violation = true;
        record.rescore(&[]);
        assert_eq!(record.tier, TrustTier::Quarantined);
    }

    #[test]
    fn test_high_tier_sticky_until_quarantine() {
        let mut record = TrustRecord::new("notes.sync");
        record.tier = TrustTier::High;
        record.success_count = 100;
        record.rescore(&[]);
        assert_eq!(record.tier, TrustTier::High);

        record.sandbox_violation = true;
        record.rescore(&[]);
        assert_eq!(record.tier, TrustTier::Quarantined);
    }
}
