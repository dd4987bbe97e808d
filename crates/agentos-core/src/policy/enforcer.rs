//! The policy enforcer — default policy plus per-channel overrides.
//!
//! Evaluation is a fixed sequence: classify, whitelist any slash command,
//! gate the operation class, then the admin token. The first failure wins
//! and is recorded as a violation; whether the message is then dropped or
//! merely marked depends on the channel's `block_on_violation`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{debug, warn};

use super::{classify, OperationClass, SecurityPolicy, SecurityViolation, ViolationAction, ViolationType};
use crate::error::{ErrorCode, KernelError, KernelResult};
use crate::store::ViolationStore;
use crate::types::InboundMessage;

/// Metadata key an adapter uses to forward an admin token.
pub const ADMIN_TOKEN_KEY: &str = "admin_token";

/// Outcome of a policy evaluation.
#[derive(Clone, Debug)]
pub enum PolicyDecision {
    /// Message passes untouched.
    Allow,
    /// Violation recorded, message continues (block_on_violation = false).
    Warn(KernelError),
    /// Violation recorded, message dropped.
    Block(KernelError),
}

impl PolicyDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PolicyDecision::Block(_))
    }
}

/// Per-channel policy enforcement.
///
/// Read-mostly: the override map is behind a `RwLock`; writers are config
/// saves only.
pub struct PolicyEnforcer {
    default_policy: SecurityPolicy,
    overrides: RwLock<HashMap<String, SecurityPolicy>>,
    violations: Arc<ViolationStore>,
}

impl PolicyEnforcer {
    /// Create an enforcer with a validated default policy.
    pub fn new(default_policy: SecurityPolicy, violations: Arc<ViolationStore>) -> KernelResult<Self> {
        default_policy.validate()?;
        Ok(PolicyEnforcer {
            default_policy,
            overrides: RwLock::new(HashMap::new()),
            violations,
        })
    }

    /// The effective policy for a channel.
    pub fn policy_for(&self, channel_id: &str) -> SecurityPolicy {
        self.overrides
            .read()
            .ok()
            .and_then(|map| map.get(channel_id).cloned())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Install a per-channel override. The policy is validated first;
    /// invalid overrides are rejected and the previous one stays in force.
    pub fn set_override(&self, channel_id: &str, policy: SecurityPolicy) -> KernelResult<()> {
        policy.validate()?;
        let mut map = self
            .overrides
            .write()
            .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, format!("policy lock: {e}")))?;
        map.insert(channel_id.to_string(), policy);
        Ok(())
    }

    /// Drop a per-channel override, reverting to the default policy.
    pub fn clear_override(&self, channel_id: &str) {
        if let Ok(mut map) = self.overrides.write() {
            map.remove(channel_id);
        }
    }

    /// Evaluate one inbound message against its channel policy.
    pub fn evaluate(&self, msg: &InboundMessage) -> KernelResult<PolicyDecision> {
        let policy = self.policy_for(&msg.channel_id);
        let op = classify(msg);
        debug!(channel = %msg.channel_id, ?op, "policy evaluation");

        // Slash commands are whitelisted regardless of class.
        if let Some(text) = msg.text.as_deref() {
            if text.trim_start().starts_with('/') && !policy.is_command_whitelisted(text) {
                return self.violation(
                    msg,
                    &policy,
                    ViolationType::CommandNotWhitelisted,
                    ErrorCode::CommandNotWhitelisted,
                    format!("command {:?} is not whitelisted", msg.command_word().unwrap_or_default()),
                );
            }
        }

        // Chat is always permitted; everything else is gated.
        if op != OperationClass::Chat {
            if !policy.permits(op) {
                return self.violation(
                    msg,
                    &policy,
                    ViolationType::OperationDenied,
                    ErrorCode::OperationDenied,
                    format!("{op:?} operations are denied by channel policy"),
                );
            }
            if policy.require_admin_token {
                let provided = msg.metadata.get(ADMIN_TOKEN_KEY).map(String::as_str);
                let ok = provided.map(|t| policy.verify_admin_token(t)).unwrap_or(false);
                if !ok {
                    return self.violation(
                        msg,
                        &policy,
                        ViolationType::InvalidToken,
                        ErrorCode::InvalidToken,
                        "admin token missing or mismatched",
                    );
                }
            }
        }

        Ok(PolicyDecision::Allow)
    }

    /// Record a rate-limit violation (the limiter middleware calls this so
    /// that all violations flow through one store).
    pub fn record_rate_limit(&self, msg: &InboundMessage) -> KernelResult<()> {
        let policy = self.policy_for(&msg.channel_id);
        self.append_violation(msg, &policy, ViolationType::RateLimitExceeded, ViolationAction::Blocked)
    }

    fn violation(
        &self,
        msg: &InboundMessage,
        policy: &SecurityPolicy,
        vtype: ViolationType,
        code: ErrorCode,
        reason: impl Into<String>,
    ) -> KernelResult<PolicyDecision> {
        let action = if policy.block_on_violation {
            ViolationAction::Blocked
        } else {
            ViolationAction::Warned
        };
        self.append_violation(msg, policy, vtype, action)?;

        let err = KernelError::new(code, reason);
        warn!(channel = %msg.channel_id, code = %err.code, "policy violation");
        Ok(if policy.block_on_violation {
            PolicyDecision::Block(err)
        } else {
            PolicyDecision::Warn(err)
        })
    }

    fn append_violation(
        &self,
        msg: &InboundMessage,
        policy: &SecurityPolicy,
        vtype: ViolationType,
        action: ViolationAction,
    ) -> KernelResult<()> {
        self.violations.append(&SecurityViolation {
            channel_id: msg.channel_id.clone(),
            violation_type: vtype,
            message_id: Some(msg.message_id.clone()),
            user_key: Some(msg.user_key.clone()),
            policy_mode: policy.mode,
            attempted_operation: msg.text.clone().unwrap_or_default(),
            timestamp: Utc::now(),
            action,
        })
    }
}
