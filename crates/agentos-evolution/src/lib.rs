//! Trust & evolution engine.
//!
//! Scores each extension's recent behavior, derives a trust tier and
//! trajectory, and proposes PROMOTE/FREEZE/REVOKE actions. The engine only
//! proposes: every action passes the human review queue before anything is
//! executed. Silent revocations are forbidden.

pub mod engine;
pub mod findings;
pub mod review;
pub mod trust;

pub use engine::{propose_action, EvolutionAction, EvolutionDecision, ReviewLevel};
pub use findings::FindingStore;
pub use review::{DecisionStatus, DecisionStore};
pub use trust::{TrustRecord, TrustTier, Trajectory};
