//! Install plans — ordered, whitelisted steps with guarded execution.
//!
//! A plan is third-party data. Step types come from a closed whitelist;
//! an unknown type fails the whole plan before step 0 runs. The `when`
//! grammar is deliberately tiny: `identifier ("==" | "!=") literal`, with
//! identifiers drawn from platform variables only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::manifest::Permission;

/// The closed step-type whitelist.
pub const STEP_TYPES: &[&str] = &[
    "detect.platform",
    "download.http",
    "extract.zip",
    "exec.shell",
    "exec.powershell",
    "verify.command_exists",
    "verify.http",
    "write.config",
];

/// Default per-step timeout, seconds.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────

/// One step. Type-specific fields are optional here and checked by
/// [`InstallPlan::validate`] per type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallStep {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    /// Guard predicate over platform variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default)]
    pub requires_permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    // type-specific fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl InstallStep {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS))
    }
}

/// The uninstall block reuses the same step model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UninstallBlock {
    #[serde(default)]
    pub steps: Vec<InstallStep>,
}

/// A parsed plan.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallPlan {
    #[serde(default)]
    pub steps: Vec<InstallStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<UninstallBlock>,
}

impl InstallPlan {
    /// Parse from YAML and validate the whole plan.
    pub fn parse(content: &str) -> KernelResult<Self> {
        let plan: InstallPlan = serde_yaml::from_str(content)
            .map_err(|e| KernelError::new(ErrorCode::PlanInvalid, format!("plan parse: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Whole-plan validation; runs before any step executes.
    pub fn validate(&self) -> KernelResult<()> {
        Self::validate_steps(&self.steps)?;
        if let Some(uninstall) = &self.uninstall {
            Self::validate_steps(&uninstall.steps)?;
        }
        Ok(())
    }

    fn validate_steps(steps: &[InstallStep]) -> KernelResult<()> {
        let mut seen = std::collections::HashSet::new();
        for step in steps {
            if step.id.is_empty() {
                return Err(invalid("step with empty id"));
            }
            if !seen.insert(&step.id) {
                return Err(invalid(format!("duplicate step id {:?}", step.id)));
            }
            if !STEP_TYPES.contains(&step.step_type.as_str()) {
                return Err(invalid(format!(
                    "unknown step type {:?} in step {:?}",
                    step.step_type, step.id
                )));
            }
            match step.step_type.as_str() {
                "download.http" => {
                    let url = step.url.as_deref().unwrap_or_default();
                    if url.is_empty() || step.target.is_none() {
                        return Err(invalid(format!("step {:?} needs url and target", step.id)));
                    }
                    if !url.starts_with("https://") {
                        return Err(invalid(format!(
                            "step {:?}: downloads must use https",
                            step.id
                        )));
                    }
                }
                "extract.zip" => {
                    if step.source.is_none() || step.target.is_none() {
                        return Err(invalid(format!(
                            "step {:?} needs source and target",
                            step.id
                        )));
                    }
                }
                "exec.shell" | "exec.powershell" => {
                    if step.command.as_deref().unwrap_or_default().is_empty() {
                        return Err(invalid(format!("step {:?} needs a command", step.id)));
                    }
                }
                "verify.command_exists" => {
                    if step.command.as_deref().unwrap_or_default().is_empty() {
                        return Err(invalid(format!("step {:?} needs a command", step.id)));
                    }
                }
                "verify.http" => {
                    if step.url.as_deref().unwrap_or_default().is_empty() {
                        return Err(invalid(format!("step {:?} needs a url", step.id)));
                    }
                }
                "write.config" => {
                    if step.key.as_deref().unwrap_or_default().is_empty() || step.value.is_none() {
                        return Err(invalid(format!("step {:?} needs key and value", step.id)));
                    }
                }
                // detect.platform takes no fields
                _ => {}
            }
            for field in [&step.target, &step.source] {
                if let Some(path) = field {
                    if path.contains("..") || path.starts_with('/') {
                        return Err(invalid(format!(
                            "step {:?}: paths must stay inside the work dir",
                            step.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> KernelError {
    KernelError::new(ErrorCode::PlanInvalid, reason)
}

// ─────────────────────────────────────────────
// Conditions
// ─────────────────────────────────────────────

/// Comparison operator in a `when` guard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Ne,
}

/// A parsed `when` predicate: `identifier ("==" | "!=") literal`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Condition {
    pub identifier: String,
    pub op: ConditionOp,
    pub literal: String,
}

impl Condition {
    /// Parse a guard. Any deviation from the grammar is CONDITION_ERROR.
    pub fn parse(input: &str) -> KernelResult<Self> {
        let (identifier, op, literal) = if let Some((lhs, rhs)) = input.split_once("==") {
            (lhs, ConditionOp::Eq, rhs)
        } else if let Some((lhs, rhs)) = input.split_once("!=") {
            (lhs, ConditionOp::Ne, rhs)
        } else {
            return Err(condition_error(format!("no operator in {input:?}")));
        };

        let identifier = identifier.trim();
        let literal = literal.trim().trim_matches(|c| c == '"' || c == '\'');
        if identifier.is_empty() || literal.is_empty() {
            return Err(condition_error(format!("incomplete condition {input:?}")));
        }
        if literal.contains("==") || literal.contains("!=") {
            return Err(condition_error(format!("chained operators in {input:?}")));
        }
        if !identifier.starts_with("platform.") {
            return Err(condition_error(format!(
                "identifier {identifier:?} is not a platform variable"
            )));
        }
        Ok(Condition {
            identifier: identifier.to_string(),
            op,
            literal: literal.to_string(),
        })
    }

    /// Evaluate against the platform variables.
    pub fn eval(&self, vars: &HashMap<String, String>) -> KernelResult<bool> {
        let actual = vars.get(&self.identifier).ok_or_else(|| {
            condition_error(format!("variable {:?} is not defined", self.identifier))
        })?;
        Ok(match self.op {
            ConditionOp::Eq => actual == &self.literal,
            ConditionOp::Ne => actual != &self.literal,
        })
    }
}

fn condition_error(reason: String) -> KernelError {
    KernelError::new(ErrorCode::ConditionError, reason)
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
