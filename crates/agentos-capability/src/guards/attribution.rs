//! Attribution guard — every external artifact names its origin.
//!
//! The required form is exact: `CommunicationOS (<operation>) in session
//! <session_id>`. Artifacts reaching the agent without it, or carrying a
//! different session, are rejected.

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

const PREFIX: &str = "CommunicationOS (";
const INFIX: &str = ") in session ";

/// Build the attribution string for an operation in a session.
pub fn format_attribution(operation: &str, session_id: &str) -> String {
    format!("{PREFIX}{operation}{INFIX}{session_id}")
}

/// Attach an attribution to an artifact's metadata, in place.
pub fn attach_attribution(data: &mut serde_json::Value, operation: &str, session_id: &str) {
    let attribution = format_attribution(operation, session_id);
    match data.get_mut("metadata") {
        Some(serde_json::Value::Object(meta)) => {
            meta.insert("attribution".into(), attribution.into());
        }
        _ => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert(
                    "metadata".into(),
                    serde_json::json!({ "attribution": attribution }),
                );
            }
        }
    }
}

/// Enforce that `data.metadata.attribution` exists, matches the required
/// format exactly, and belongs to the current session.
pub fn enforce_attribution(data: &serde_json::Value, session_id: &str) -> KernelResult<()> {
    let attribution = data
        .get("metadata")
        .and_then(|m| m.get("attribution"))
        .and_then(|a| a.as_str())
        .ok_or_else(|| {
            KernelError::new(
                ErrorCode::AttributionViolation,
                "artifact carries no attribution",
            )
        })?;

    let Some(rest) = attribution.strip_prefix(PREFIX) else {
        return Err(malformed());
    };
    let Some((operation, session)) = rest.split_once(INFIX) else {
        return Err(malformed());
    };
    if operation.is_empty() || session.is_empty() || operation.contains(')') {
        return Err(malformed());
    }
    if session != session_id {
        return Err(KernelError::new(
            ErrorCode::AttributionViolation,
            format!("attribution session {session:?} does not match current session"),
        ));
    }
    Ok(())
}

fn malformed() -> KernelError {
    KernelError::new(
        ErrorCode::AttributionViolation,
        "attribution string is malformed",
    )
}
