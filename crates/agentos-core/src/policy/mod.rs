//! Per-channel security policy — model, operation classification, and the
//! enforcer that gates every inbound message.
//!
//! Classification is static and closed: a fixed command table plus an
//! explicit metadata intent. No free-text keyword matching.

pub mod enforcer;
pub mod remote;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{ErrorCode, KernelError, KernelResult};
use crate::types::InboundMessage;

pub use enforcer::{PolicyDecision, PolicyEnforcer};
pub use remote::RemoteExposureDetector;

// ─────────────────────────────────────────────
// Policy model
// ─────────────────────────────────────────────

/// Coarse policy mode for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyMode {
    ChatOnly,
    ChatExecRestricted,
}

/// The effective security policy of one channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityPolicy {
    pub mode: PolicyMode,
    pub chat_only: bool,
    pub allow_execute: bool,
    pub block_on_violation: bool,
    pub require_admin_token: bool,
    /// `salt$hex(sha256(salt || token))`; required when require_admin_token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token_hash: Option<String>,
    /// Prefix-matched, case-insensitive command whitelist.
    pub allowed_commands: Vec<String>,
    pub rate_limit_per_minute: u32,
    pub retention_days: u32,
    pub require_signature: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicy {
            mode: PolicyMode::ChatOnly,
            chat_only: true,
            allow_execute: false,
            block_on_violation: true,
            require_admin_token: false,
            admin_token_hash: None,
            allowed_commands: vec!["/help".into(), "/session".into()],
            rate_limit_per_minute: 30,
            retention_days: 90,
            require_signature: false,
        }
    }
}

impl SecurityPolicy {
    /// Reject inconsistent policies at save time (fail closed).
    pub fn validate(&self) -> KernelResult<()> {
        if self.require_admin_token {
            match &self.admin_token_hash {
                Some(h) if h.contains('$') => {}
                _ => {
                    return Err(KernelError::new(
                        ErrorCode::ConfigInvalid,
                        "requireAdminToken is set but adminTokenHash is missing or malformed",
                    ))
                }
            }
        }
        if self.chat_only && self.allow_execute {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                "chatOnly and allowExecute are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Whether an operation class is permitted. Chat is always permitted.
    pub fn permits(&self, op: OperationClass) -> bool {
        match op {
            OperationClass::Chat => true,
            OperationClass::Execute
            | OperationClass::FileAccess
            | OperationClass::SystemInfo
            | OperationClass::ConfigChange => self.allow_execute && !self.chat_only,
        }
    }

    /// Case-insensitive prefix match of `text` against the whitelist.
    pub fn is_command_whitelisted(&self, text: &str) -> bool {
        let lowered = text.trim_start().to_lowercase();
        self.allowed_commands
            .iter()
            .any(|allowed| lowered.starts_with(&allowed.to_lowercase()))
    }

    /// Constant-time comparison of a provided token against the stored hash.
    pub fn verify_admin_token(&self, provided: &str) -> bool {
        self.admin_token_hash
            .as_deref()
            .map(|stored| verify_token_hash(stored, provided))
            .unwrap_or(false)
    }

    /// Produce the stored form of an admin token.
    pub fn hash_admin_token(token: &str, salt: &str) -> String {
        let digest = Sha256::digest(format!("{salt}{token}").as_bytes());
        format!("{salt}${}", hex::encode(digest))
    }
}

/// Constant-time check of a provided token against a `salt$hex` hash.
pub fn verify_token_hash(stored: &str, provided: &str) -> bool {
    let Some((salt, expected_hex)) = stored.split_once('$') else {
        return false;
    };
    let computed = hex::encode(Sha256::digest(format!("{salt}{provided}").as_bytes()));
    computed.as_bytes().ct_eq(expected_hex.as_bytes()).into()
}

// ─────────────────────────────────────────────
// Operation classification
// ─────────────────────────────────────────────

/// What an inbound message asks the system to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationClass {
    Chat,
    Execute,
    FileAccess,
    SystemInfo,
    ConfigChange,
}

/// Fixed command-word table. Closed by design.
const COMMAND_CLASSES: &[(&str, OperationClass)] = &[
    ("/exec", OperationClass::Execute),
    ("/execute", OperationClass::Execute),
    ("/run", OperationClass::Execute),
    ("/shell", OperationClass::Execute),
    ("/sh", OperationClass::Execute),
    ("/file", OperationClass::FileAccess),
    ("/read", OperationClass::FileAccess),
    ("/write", OperationClass::FileAccess),
    ("/sysinfo", OperationClass::SystemInfo),
    ("/env", OperationClass::SystemInfo),
    ("/config", OperationClass::ConfigChange),
    ("/set", OperationClass::ConfigChange),
];

/// Classify a message. CHAT is the default; everything else requires an
/// explicit command word or an explicit metadata intent.
pub fn classify(msg: &InboundMessage) -> OperationClass {
    if let Some(intent) = msg.metadata.get("intent") {
        match intent.as_str() {
            "execute" => return OperationClass::Execute,
            "file_access" => return OperationClass::FileAccess,
            "system_info" => return OperationClass::SystemInfo,
            "config_change" => return OperationClass::ConfigChange,
            _ => {}
        }
    }
    if let Some(word) = msg.command_word() {
        for (cmd, class) in COMMAND_CLASSES {
            if word == *cmd {
                return *class;
            }
        }
    }
    OperationClass::Chat
}

// ─────────────────────────────────────────────
// Violations
// ─────────────────────────────────────────────

/// Kinds of security violation the enforcer records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    OperationDenied,
    CommandNotWhitelisted,
    RateLimitExceeded,
    InvalidToken,
    RemoteExposureWarning,
}

/// Whether the violating message was dropped or allowed through with a mark.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationAction {
    Blocked,
    Warned,
}

/// An append-only security violation record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub channel_id: String,
    pub violation_type: ViolationType,
    pub message_id: Option<String>,
    pub user_key: Option<String>,
    pub policy_mode: PolicyMode,
    pub attempted_operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub action: ViolationAction,
}
