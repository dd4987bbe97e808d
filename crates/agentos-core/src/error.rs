//! Closed error taxonomy for the kernel.
//!
//! Every rejection the kernel produces carries a machine code from
//! [`ErrorCode`], a short reason, and (when one exists) a remediation hint.
//! The set is closed on purpose: callers match on codes, never on strings.

use serde::{Deserialize, Serialize};

/// Machine-readable error code.
///
/// Serialized as SCREAMING_SNAKE_CASE (the wire and audit format).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ── Validation ──
    ManifestInvalid,
    ConfigInvalid,
    PlanInvalid,
    InputSchemaViolation,

    // ── Policy ──
    OperationDenied,
    CommandNotWhitelisted,
    RateLimitExceeded,
    InvalidToken,
    PhaseGateViolation,
    AttributionViolation,
    SpecNotFrozen,
    ApprovalRequired,
    SideEffectDenied,
    SsrfBlocked,
    UnknownTool,

    // ── Execution ──
    CommandFailed,
    Timeout,
    DownloadFailed,
    VerificationFailed,
    PlatformNotSupported,
    PermissionDenied,
    SandboxUnavailable,
    ConditionError,
    InstallInProgress,

    // ── Infrastructure ──
    StoreWriteFailed,
    AdapterSendFailed,
    McpConnectionError,
    McpProtocolError,

    Unknown,
}

/// Coarse classification driving the propagation policy: validation and
/// policy errors are recovered locally, execution errors halt the operation,
/// infrastructure errors are retried at the site that knows how.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Policy,
    Execution,
    Infrastructure,
}

impl ErrorCode {
    /// The SCREAMING_SNAKE_CASE wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::PlanInvalid => "PLAN_INVALID",
            ErrorCode::InputSchemaViolation => "INPUT_SCHEMA_VIOLATION",
            ErrorCode::OperationDenied => "OPERATION_DENIED",
            ErrorCode::CommandNotWhitelisted => "COMMAND_NOT_WHITELISTED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::PhaseGateViolation => "PHASE_GATE_VIOLATION",
            ErrorCode::AttributionViolation => "ATTRIBUTION_VIOLATION",
            ErrorCode::SpecNotFrozen => "SPEC_NOT_FROZEN",
            ErrorCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ErrorCode::SideEffectDenied => "SIDE_EFFECT_DENIED",
            ErrorCode::SsrfBlocked => "SSRF_BLOCKED",
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::CommandFailed => "COMMAND_FAILED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DownloadFailed => "DOWNLOAD_FAILED",
            ErrorCode::VerificationFailed => "VERIFICATION_FAILED",
            ErrorCode::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::SandboxUnavailable => "SANDBOX_UNAVAILABLE",
            ErrorCode::ConditionError => "CONDITION_ERROR",
            ErrorCode::InstallInProgress => "INSTALL_IN_PROGRESS",
            ErrorCode::StoreWriteFailed => "STORE_WRITE_FAILED",
            ErrorCode::AdapterSendFailed => "ADAPTER_SEND_FAILED",
            ErrorCode::McpConnectionError => "MCP_CONNECTION_ERROR",
            ErrorCode::McpProtocolError => "MCP_PROTOCOL_ERROR",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Which propagation class this code belongs to.
    pub fn class(&self) -> ErrorClass {
        use ErrorCode::*;
        match self {
            ManifestInvalid | ConfigInvalid | PlanInvalid | InputSchemaViolation => {
                ErrorClass::Validation
            }
            OperationDenied | CommandNotWhitelisted | RateLimitExceeded | InvalidToken
            | PhaseGateViolation | AttributionViolation | SpecNotFrozen | ApprovalRequired
            | SideEffectDenied | SsrfBlocked | UnknownTool => ErrorClass::Policy,
            CommandFailed | Timeout | DownloadFailed | VerificationFailed
            | PlatformNotSupported | PermissionDenied | SandboxUnavailable | ConditionError
            | InstallInProgress | Unknown => ErrorClass::Execution,
            StoreWriteFailed | AdapterSendFailed | McpConnectionError | McpProtocolError => {
                ErrorClass::Infrastructure
            }
        }
    }

    /// Human-readable remediation hint, when one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            ErrorCode::CommandNotWhitelisted => {
                Some("add the command to the channel's allowedCommands list")
            }
            ErrorCode::RateLimitExceeded => Some("wait a minute and retry"),
            ErrorCode::InvalidToken => Some("supply the channel admin token"),
            ErrorCode::SpecNotFrozen => Some("freeze the invocation spec before executing"),
            ErrorCode::ApprovalRequired => Some("a critical-risk tool needs admin approval"),
            ErrorCode::SandboxUnavailable => {
                Some("start the container runtime; high-risk tools never run unsandboxed")
            }
            ErrorCode::PlatformNotSupported => {
                Some("this extension does not support the current platform")
            }
            ErrorCode::PermissionDenied => {
                Some("the extension manifest does not declare the required permission")
            }
            ErrorCode::DownloadFailed => Some("check the URL and network connectivity"),
            ErrorCode::VerificationFailed => {
                Some("the downloaded artifact did not match its declared sha256")
            }
            ErrorCode::Timeout => Some("increase timeoutSeconds for the step or tool"),
            ErrorCode::ConditionError => {
                Some("when-conditions must be `platform.<var> ==|!= <literal>`")
            }
            ErrorCode::InstallInProgress => {
                Some("an install for this extension is already running")
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured rejection: machine code + short reason + optional hint.
///
/// This is the kernel's only routine-rejection currency; no exceptions-style
/// control flow. Secrets must never appear in `reason`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {reason}")]
pub struct KernelError {
    pub code: ErrorCode,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl KernelError {
    /// Build an error with the code's default hint.
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        KernelError {
            code,
            reason: reason.into(),
            hint: code.hint().map(str::to_string),
        }
    }

    /// Build an error with a custom hint.
    pub fn with_hint(code: ErrorCode, reason: impl Into<String>, hint: impl Into<String>) -> Self {
        KernelError {
            code,
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }
}

impl From<rusqlite::Error> for KernelError {
    fn from(e: rusqlite::Error) -> Self {
        KernelError::new(ErrorCode::StoreWriteFailed, e.to_string())
    }
}

/// Kernel-wide result alias.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_form() {
        assert_eq!(ErrorCode::CommandNotWhitelisted.as_str(), "COMMAND_NOT_WHITELISTED");
        assert_eq!(ErrorCode::SsrfBlocked.as_str(), "SSRF_BLOCKED");
        assert_eq!(ErrorCode::McpProtocolError.as_str(), "MCP_PROTOCOL_ERROR");
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");

        let back: ErrorCode = serde_json::from_str("\"SANDBOX_UNAVAILABLE\"").unwrap();
        assert_eq!(back, ErrorCode::SandboxUnavailable);
    }

    #[test]
    fn test_classification() {
        assert_eq!(ErrorCode::PlanInvalid.class(), ErrorClass::Validation);
        assert_eq!(ErrorCode::OperationDenied.class(), ErrorClass::Policy);
        assert_eq!(ErrorCode::Timeout.class(), ErrorClass::Execution);
        assert_eq!(ErrorCode::StoreWriteFailed.class(), ErrorClass::Infrastructure);
    }

    #[test]
    fn test_kernel_error_default_hint() {
        let err = KernelError::new(ErrorCode::SandboxUnavailable, "runtime unreachable");
        assert!(err.hint.as_deref().unwrap().contains("container runtime"));
    }

    #[test]
    fn test_kernel_error_display() {
        let err = KernelError::new(ErrorCode::InvalidToken, "token mismatch");
        assert_eq!(err.to_string(), "INVALID_TOKEN: token mismatch");
    }

    #[test]
    fn test_kernel_error_custom_hint() {
        let err = KernelError::with_hint(ErrorCode::ConfigInvalid, "bad port", "use 1-65535");
        assert_eq!(err.hint.as_deref(), Some("use 1-65535"));
    }
}
