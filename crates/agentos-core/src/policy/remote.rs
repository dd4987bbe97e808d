//! Remote-exposure detection.
//!
//! A deployment reachable from the public internet deserves stricter
//! defaults. Detection is a pure function over a fixed set of environment
//! variables; the result is advisory and surfaces exactly one warning per
//! process start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use super::{PolicyMode, SecurityViolation, ViolationAction, ViolationType};
use crate::error::KernelResult;
use crate::store::ViolationStore;

/// Any of these being set marks the deployment as remotely exposed.
pub const REMOTE_ENV_VARS: &[&str] = &[
    "AGENTOS_REMOTE_MODE",
    "RAILWAY_ENVIRONMENT",
    "HEROKU_APP_NAME",
    "VERCEL",
    "AWS_EXECUTION_ENV",
    "KUBERNETES_SERVICE_HOST",
];

/// Pure detection over an arbitrary lookup — tests inject their own.
pub fn is_remotely_exposed_with(lookup: impl Fn(&str) -> Option<String>) -> bool {
    REMOTE_ENV_VARS
        .iter()
        .any(|var| lookup(var).map(|v| !v.is_empty()).unwrap_or(false))
}

/// Detection against the process environment.
pub fn is_remotely_exposed() -> bool {
    is_remotely_exposed_with(|var| std::env::var(var).ok())
}

/// One-shot warner wrapping the pure detector.
pub struct RemoteExposureDetector {
    violations: Arc<ViolationStore>,
    warned: AtomicBool,
}

impl RemoteExposureDetector {
    pub fn new(violations: Arc<ViolationStore>) -> Self {
        RemoteExposureDetector {
            violations,
            warned: AtomicBool::new(false),
        }
    }

    /// Check the environment; on first positive detection, log a warning
    /// and append an advisory violation row. Returns the detection result.
    pub fn check_once(&self) -> KernelResult<bool> {
        self.check_once_with(|var| std::env::var(var).ok())
    }

    /// Lookup-injected variant used by tests.
    pub fn check_once_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> KernelResult<bool> {
        let exposed = is_remotely_exposed_with(lookup);
        if exposed && !self.warned.swap(true, Ordering::SeqCst) {
            warn!("deployment appears remotely exposed; review channel policies");
            self.violations.append(&SecurityViolation {
                channel_id: "system".into(),
                violation_type: ViolationType::RemoteExposureWarning,
                message_id: None,
                user_key: None,
                policy_mode: PolicyMode::ChatOnly,
                attempted_operation: "startup".into(),
                timestamp: Utc::now(),
                action: ViolationAction::Warned,
            })?;
        }
        Ok(exposed)
    }
}
