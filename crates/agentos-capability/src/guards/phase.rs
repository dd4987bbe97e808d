//! Phase gate — `comm.*` operations run only in execution phase.

use serde::{Deserialize, Serialize};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

/// The two phases an operation can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionPhase {
    Planning,
    Execution,
}

impl ExecutionPhase {
    /// Parse a phase string; anything unknown is `None` (and fails closed
    /// at the gate).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(ExecutionPhase::Planning),
            "execution" => Some(ExecutionPhase::Execution),
            _ => None,
        }
    }
}

/// Namespace gated to execution phase.
const GATED_NAMESPACE: &str = "comm.";

/// The gate itself; stateless.
pub struct PhaseGate;

impl PhaseGate {
    /// Check one operation against its declared phase.
    ///
    /// - Unknown phase strings are rejected outright (fail closed).
    /// - `comm.*` requires `execution`.
    /// - Everything else passes in either known phase.
    pub fn check(operation: &str, phase: &str) -> KernelResult<()> {
        let Some(parsed) = ExecutionPhase::parse(phase) else {
            return Err(KernelError::new(
                ErrorCode::PhaseGateViolation,
                format!("unknown execution phase {phase:?}"),
            ));
        };
        if operation.starts_with(GATED_NAMESPACE) && parsed != ExecutionPhase::Execution {
            return Err(KernelError::new(
                ErrorCode::PhaseGateViolation,
                format!("{operation} is not permitted during {phase}"),
            ));
        }
        Ok(())
    }
}
