//! Unified tool model — descriptors, invocations, results, and risk
//! inference.
//!
//! Extensions and MCP tools meet here: one `tool_id` namespace
//! (`ext:<extension_id>:<command>` / `mcp:<server_id>:<tool_name>`), one
//! risk scale, one side-effect vocabulary. Risk is monotonically
//! non-decreasing across declared side effects — `payments` can never be
//! LOW, no matter what the source declares.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

// ─────────────────────────────────────────────
// Risk
// ─────────────────────────────────────────────

/// Risk classification, ordered LOW < MED < HIGH < CRITICAL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Med,
    High,
    Critical,
}

/// Where a tool comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSourceType {
    Extension,
    Mcp,
}

impl ToolSourceType {
    /// The mandatory tool_id prefix for this source.
    pub fn prefix(&self) -> &'static str {
        match self {
            ToolSourceType::Extension => "ext",
            ToolSourceType::Mcp => "mcp",
        }
    }
}

// ─────────────────────────────────────────────
// Descriptor
// ─────────────────────────────────────────────

/// One invocable unit, as exposed to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// `ext:<extension_id>:<command>` or `mcp:<server_id>:<tool_name>`.
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub output_schema: serde_json::Value,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub side_effect_tags: BTreeSet<String>,
    pub source_type: ToolSourceType,
    pub source_id: String,
    pub enabled: bool,
}

impl ToolDescriptor {
    /// Structural validation: prefix, non-empty parts.
    pub fn validate(&self) -> KernelResult<()> {
        let mut parts = self.tool_id.splitn(3, ':');
        let prefix = parts.next().unwrap_or_default();
        let source = parts.next().unwrap_or_default();
        let item = parts.next().unwrap_or_default();
        if prefix != self.source_type.prefix() || source.is_empty() || item.is_empty() {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("malformed tool_id {:?}", self.tool_id),
            ));
        }
        if source != self.source_id {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("tool_id {:?} does not match source {}", self.tool_id, self.source_id),
            ));
        }
        // Risk must respect the side-effect floor.
        if self.risk_level < risk_floor(&self.side_effect_tags) {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!(
                    "tool {} declares {:?} but its side effects require at least {:?}",
                    self.tool_id,
                    self.risk_level,
                    risk_floor(&self.side_effect_tags)
                ),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Inference
// ─────────────────────────────────────────────

/// Tokens marking a mutating/dangerous tool.
const HIGH_RISK_TOKENS: &[&str] = &[
    "delete", "drop", "remove", "destroy", "execute", "exec", "run", "shell", "write", "create",
    "chmod", "unlink",
];

/// Tokens marking a read-only tool.
const READ_ONLY_TOKENS: &[&str] = &["get", "list", "read", "query", "search", "describe", "show"];

/// Side effects that always mean CRITICAL.
fn is_critical_tag(tag: &str) -> bool {
    tag == "payments" || tag.starts_with("cloud.key_")
}

/// Side effects that mutate state.
fn is_mutating_tag(tag: &str) -> bool {
    matches!(tag, "fs.write" | "system.exec" | "payments") || tag.starts_with("cloud.")
}

/// The minimum risk the side effects impose.
pub fn risk_floor(side_effects: &BTreeSet<String>) -> RiskLevel {
    if side_effects.iter().any(|t| is_critical_tag(t)) {
        RiskLevel::Critical
    } else {
        RiskLevel::Low
    }
}

/// Infer a risk level when the source does not declare one; a declared
/// level is still raised to the side-effect floor (never lowered).
pub fn infer_risk(
    name: &str,
    description: &str,
    side_effects: &BTreeSet<String>,
    declared: Option<RiskLevel>,
) -> RiskLevel {
    let floor = risk_floor(side_effects);
    if let Some(declared) = declared {
        return declared.max(floor);
    }

    let haystack = format!("{} {}", name, description).to_lowercase();
    let tokens: BTreeSet<&str> = haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .flat_map(|w| w.split('_'))
        .filter(|w| !w.is_empty())
        .collect();

    let inferred = if HIGH_RISK_TOKENS.iter().any(|t| tokens.contains(t)) {
        RiskLevel::High
    } else if READ_ONLY_TOKENS.iter().any(|t| tokens.contains(t))
        && !side_effects.iter().any(|t| is_mutating_tag(t))
    {
        RiskLevel::Low
    } else {
        RiskLevel::Med
    };
    inferred.max(floor)
}

/// Infer side-effect tags from declared permissions and the tool name.
pub fn infer_side_effects(permissions: &[String], tool_name: &str) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for permission in permissions {
        match permission.as_str() {
            "network" => {
                tags.insert("network.http".to_string());
            }
            "exec" => {
                tags.insert("system.exec".to_string());
            }
            "filesystem.read" => {
                tags.insert("fs.read".to_string());
            }
            "filesystem.write" => {
                tags.insert("fs.write".to_string());
            }
            _ => {}
        }
    }
    let lowered = tool_name.to_lowercase();
    if lowered.contains("pay") || lowered.contains("charge") || lowered.contains("refund") {
        tags.insert("payments".to_string());
    }
    if HIGH_RISK_TOKENS
        .iter()
        .any(|t| lowered.split('_').any(|w| w == *t))
        && !tags.contains("system.exec")
        && (lowered.contains("file") || tags.contains("fs.read"))
    {
        tags.insert("fs.write".to_string());
    }
    tags
}

// ─────────────────────────────────────────────
// Invocation & result
// ─────────────────────────────────────────────

/// Whether an invocation may produce side effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Planning,
    Execution,
}

/// One request to run a tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub invocation_id: Uuid,
    pub tool_id: String,
    pub inputs: serde_json::Value,
    pub actor: String,
    pub project_id: String,
    pub mode: ExecutionMode,
    pub spec_frozen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Admin approval for CRITICAL-risk tools, when granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_token: Option<String>,
}

impl ToolInvocation {
    /// A PLANNING invocation (no side effects permitted).
    pub fn planning(tool_id: impl Into<String>, inputs: serde_json::Value) -> Self {
        ToolInvocation {
            invocation_id: Uuid::new_v4(),
            tool_id: tool_id.into(),
            inputs,
            actor: "agent".into(),
            project_id: "default".into(),
            mode: ExecutionMode::Planning,
            spec_frozen: false,
            spec_hash: None,
            timestamp: Utc::now(),
            approval_token: None,
        }
    }

    /// An EXECUTION invocation with a frozen spec.
    pub fn execution(tool_id: impl Into<String>, inputs: serde_json::Value) -> Self {
        let mut invocation = Self::planning(tool_id, inputs);
        invocation.mode = ExecutionMode::Execution;
        invocation.spec_frozen = true;
        invocation.spec_hash = Some(agentos_core::utils::sha256_hex(
            invocation.inputs.to_string().as_bytes(),
        ));
        invocation
    }

    pub fn with_approval(mut self, token: impl Into<String>) -> Self {
        self.approval_token = Some(token.into());
        self
    }

    /// Hash of the inputs, recorded in the audit trail instead of raw
    /// inputs (which may hold secrets).
    pub fn inputs_hash(&self) -> String {
        agentos_core::utils::sha256_hex(self.inputs.to_string().as_bytes())
    }
}

/// Outcome of a tool invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub invocation_id: Uuid,
    pub success: bool,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub declared_side_effects: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<KernelError>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ToolResult {
    pub fn ok(invocation_id: Uuid, payload: serde_json::Value, duration_ms: u64) -> Self {
        ToolResult {
            invocation_id,
            success: true,
            payload,
            declared_side_effects: BTreeSet::new(),
            error: None,
            duration_ms,
            exit_code: Some(0),
        }
    }

    pub fn fail(invocation_id: Uuid, error: KernelError, duration_ms: u64) -> Self {
        ToolResult {
            invocation_id,
            success: false,
            payload: serde_json::Value::Null,
            declared_side_effects: BTreeSet::new(),
            error: Some(error),
            duration_ms,
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

// ─────────────────────────────────────────────
// Input-schema validation
// ─────────────────────────────────────────────

/// Validate inputs against a tool's (object-shaped) input schema.
///
/// Covers the subset the registry emits: top-level `type: object`,
/// `required` names, and per-property `type` checks.
pub fn validate_inputs(schema: &serde_json::Value, inputs: &serde_json::Value) -> KernelResult<()> {
    if schema.is_null() {
        return Ok(());
    }
    let obj = inputs.as_object().ok_or_else(|| {
        KernelError::new(ErrorCode::InputSchemaViolation, "inputs must be an object")
    })?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !obj.contains_key(name) {
                return Err(KernelError::new(
                    ErrorCode::InputSchemaViolation,
                    format!("missing required input {name:?}"),
                ));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (name, value) in obj {
            let Some(prop) = properties.get(name) else {
                continue;
            };
            let Some(expected) = prop.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(KernelError::new(
                    ErrorCode::InputSchemaViolation,
                    format!("input {name:?} must be a {expected}"),
                ));
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn descriptor(tool_id: &str, risk: RiskLevel) -> ToolDescriptor {
        let (source_type, source_id) = if tool_id.starts_with("mcp:") {
            (ToolSourceType::Mcp, tool_id.split(':').nth(1).unwrap())
        } else {
            (ToolSourceType::Extension, tool_id.split(':').nth(1).unwrap())
        };
        ToolDescriptor {
            tool_id: tool_id.to_string(),
            name: tool_id.split(':').next_back().unwrap().to_string(),
            description: "test tool".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            output_schema: serde_json::Value::Null,
            risk_level: risk,
            side_effect_tags: BTreeSet::new(),
            source_type,
            source_id: source_id.to_string(),
            enabled: true,
        }
    }
}
