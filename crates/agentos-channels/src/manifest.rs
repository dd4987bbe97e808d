//! Channel manifests — declarative descriptions of channel types.
//!
//! A manifest is the single source of truth for which config fields a
//! channel has, which of them are secret (encrypted at rest), which webhook
//! paths the server exposes, and the security defaults its policy derives
//! from. Manifests are data; validation happens at load into these typed
//! structures, and unknown field types fail closed.

use regex::Regex;
use serde::{Deserialize, Serialize};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::policy::{PolicyMode, SecurityPolicy};

// ─────────────────────────────────────────────
// Field model
// ─────────────────────────────────────────────

/// The closed set of config field types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Secret,
    Url,
    Integer,
    Boolean,
    Enum,
}

/// One declared config field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    /// Allowed values when `type = "enum"`.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Whether sessions are keyed per user or per user+conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    User,
    UserConversation,
}

/// Security defaults a manifest declares for its channel type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityDefaults {
    pub mode: PolicyMode,
    #[serde(default)]
    pub allow_execute: bool,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub require_signature: bool,
}

fn default_rate_limit() -> u32 {
    30
}
fn default_retention_days() -> u32 {
    90
}

/// Per-channel policy overrides; every field optional.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_execute: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_on_violation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_admin_token: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

/// One human-facing setup step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetupStep {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ─────────────────────────────────────────────
// Manifest
// ─────────────────────────────────────────────

/// Declarative description of one channel type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub required_config_fields: Vec<ConfigField>,
    #[serde(default)]
    pub webhook_paths: Vec<String>,
    pub session_scope: SessionScope,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub security_defaults: SecurityDefaults,
    #[serde(default)]
    pub setup_steps: Vec<SetupStep>,
}

impl ChannelManifest {
    /// Structural validation performed at load.
    pub fn validate(&self) -> KernelResult<()> {
        if self.id.is_empty() || self.name.is_empty() || self.version.is_empty() {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                "manifest requires id, name, and version",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.required_config_fields {
            if field.name.is_empty() {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("manifest {}: config field with empty name", self.id),
                ));
            }
            if !seen.insert(&field.name) {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("manifest {}: duplicate config field {}", self.id, field.name),
                ));
            }
            if field.field_type == FieldType::Enum && field.options.is_empty() {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("manifest {}: enum field {} has no options", self.id, field.name),
                ));
            }
            if let Some(pattern) = &field.validation_regex {
                Regex::new(pattern).map_err(|e| {
                    KernelError::new(
                        ErrorCode::ManifestInvalid,
                        format!("manifest {}: bad regex on {}: {e}", self.id, field.name),
                    )
                })?;
            }
            // A secret field must be declared with the secret type, and
            // vice versa, or the at-rest encryption flag would drift.
            if field.secret != (field.field_type == FieldType::Secret) {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!(
                        "manifest {}: field {} secret flag disagrees with its type",
                        self.id, field.name
                    ),
                ));
            }
        }
        for path in &self.webhook_paths {
            if !path.starts_with('/') {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("manifest {}: webhook path {path:?} must start with '/'", self.id),
                ));
            }
        }
        Ok(())
    }

    /// Validate a candidate config object against the declared fields.
    ///
    /// Returns the first failure; the config-store rejects the save and the
    /// stored state is unchanged.
    pub fn validate_config(&self, config: &serde_json::Value) -> KernelResult<()> {
        let obj = config.as_object().ok_or_else(|| {
            KernelError::new(ErrorCode::ConfigInvalid, "config must be a JSON object")
        })?;

        for field in &self.required_config_fields {
            let value = obj.get(&field.name);
            let Some(value) = value else {
                if field.required {
                    return Err(KernelError::new(
                        ErrorCode::ConfigInvalid,
                        format!("missing required field {}", field.name),
                    ));
                }
                continue;
            };

            match field.field_type {
                FieldType::String | FieldType::Secret => {
                    let s = value.as_str().ok_or_else(|| type_error(field, "string"))?;
                    if field.required && s.is_empty() {
                        return Err(KernelError::new(
                            ErrorCode::ConfigInvalid,
                            format!("field {} must not be empty", field.name),
                        ));
                    }
                    self.check_regex(field, s)?;
                }
                FieldType::Url => {
                    let s = value.as_str().ok_or_else(|| type_error(field, "url"))?;
                    let parsed = url::Url::parse(s)
                        .map_err(|_| type_error(field, "url"))?;
                    if !matches!(parsed.scheme(), "http" | "https") {
                        return Err(KernelError::new(
                            ErrorCode::ConfigInvalid,
                            format!("field {} must be an http(s) URL", field.name),
                        ));
                    }
                }
                FieldType::Integer => {
                    if !value.is_i64() && !value.is_u64() {
                        return Err(type_error(field, "integer"));
                    }
                }
                FieldType::Boolean => {
                    if !value.is_boolean() {
                        return Err(type_error(field, "boolean"));
                    }
                }
                FieldType::Enum => {
                    let s = value.as_str().ok_or_else(|| type_error(field, "enum"))?;
                    if !field.options.iter().any(|o| o == s) {
                        return Err(KernelError::new(
                            ErrorCode::ConfigInvalid,
                            format!(
                                "field {} must be one of {:?}",
                                field.name, field.options
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_regex(&self, field: &ConfigField, value: &str) -> KernelResult<()> {
        if let Some(pattern) = &field.validation_regex {
            // Validated at manifest load; a parse failure here means the
            // manifest bypassed validation.
            let re = Regex::new(pattern).map_err(|e| {
                KernelError::new(ErrorCode::ManifestInvalid, format!("bad regex: {e}"))
            })?;
            if !re.is_match(value) {
                let reason = field
                    .validation_error
                    .clone()
                    .unwrap_or_else(|| format!("field {} failed validation", field.name));
                return Err(KernelError::new(ErrorCode::ConfigInvalid, reason));
            }
        }
        Ok(())
    }

    /// Names of fields whose values must be encrypted at rest.
    pub fn secret_fields(&self) -> Vec<&str> {
        self.required_config_fields
            .iter()
            .filter(|f| f.secret)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Content hash establishing the (id, version) ⇒ content identity.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        agentos_core::utils::sha256_hex(&canonical)
    }
}

fn type_error(field: &ConfigField, expected: &str) -> KernelError {
    KernelError::new(
        ErrorCode::ConfigInvalid,
        format!("field {} must be a {expected}", field.name),
    )
}

// ─────────────────────────────────────────────
// Policy derivation
// ─────────────────────────────────────────────

/// Derive the effective [`SecurityPolicy`] for a channel. Pure function.
pub fn derive_policy(
    defaults: &SecurityDefaults,
    overrides: Option<&PolicyOverride>,
) -> SecurityPolicy {
    let mut policy = SecurityPolicy {
        mode: defaults.mode,
        chat_only: defaults.mode == PolicyMode::ChatOnly,
        allow_execute: defaults.allow_execute,
        block_on_violation: true,
        require_admin_token: false,
        admin_token_hash: None,
        allowed_commands: defaults.allowed_commands.clone(),
        rate_limit_per_minute: defaults.rate_limit_per_minute,
        retention_days: defaults.retention_days,
        require_signature: defaults.require_signature,
    };
    if let Some(o) = overrides {
        if let Some(v) = o.allow_execute {
            policy.allow_execute = v;
            if v {
                policy.chat_only = false;
                policy.mode = PolicyMode::ChatExecRestricted;
            }
        }
        if let Some(v) = o.block_on_violation {
            policy.block_on_violation = v;
        }
        if let Some(v) = o.require_admin_token {
            policy.require_admin_token = v;
        }
        if let Some(v) = &o.admin_token_hash {
            policy.admin_token_hash = Some(v.clone());
        }
        if let Some(v) = &o.allowed_commands {
            policy.allowed_commands = v.clone();
        }
        if let Some(v) = o.rate_limit_per_minute {
            policy.rate_limit_per_minute = v;
        }
        if let Some(v) = o.retention_days {
            policy.retention_days = v;
        }
    }
    policy
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fixtures::slack_like;
    use super::*;
    use agentos_core::error::ErrorCode;

    #[test]
    fn test_fixture_is_valid() {
        assert!(slack_like().validate().is_ok());
    }

    #[test]
    fn test_secret_fields_flagged() {
        let manifest = slack_like();
        assert_eq!(manifest.secret_fields(), vec!["bot_token", "signing_secret"]);
    }

    #[test]
    fn test_secret_flag_type_mismatch_rejected() {
        let mut manifest = slack_like();
        manifest.required_config_fields[0].secret = false;
        let err = manifest.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::ManifestInvalid);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut manifest = slack_like();
        let dup = manifest.required_config_fields[0].clone();
        manifest.required_config_fields.push(dup);
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_webhook_path_must_be_rooted() {
        let mut manifest = slack_like();
        manifest.webhook_paths.push("webhooks/bad".into());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_valid_config_accepted() {
        let manifest = slack_like();
        let config = serde_json::json!({
            "bot_token": "xoxb-123",
            "signing_secret": "sssh",
            "workspace_url": "https://example.slack.com",
            "max_threads": 4,
            "reply_style": "thread"
        });
        assert!(manifest.validate_config(&config).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let manifest = slack_like();
        let config = serde_json::json!({"bot_token": "xoxb-123"});
        let err = manifest.validate_config(&config).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
        assert!(err.reason.contains("signing_secret"));
    }

    #[test]
    fn test_regex_validation() {
        let manifest = slack_like();
        let config = serde_json::json!({
            "bot_token": "not-a-bot-token",
            "signing_secret": "sssh"
        });
        let err = manifest.validate_config(&config).unwrap_err();
        assert_eq!(err.reason, "bot tokens start with xoxb-");
    }

    #[test]
    fn test_url_field_validation() {
        let manifest = slack_like();
        let config = serde_json::json!({
            "bot_token": "xoxb-1",
            "signing_secret": "s",
            "workspace_url": "ftp://example.com"
        });
        assert!(manifest.validate_config(&config).is_err());
    }

    #[test]
    fn test_enum_field_validation() {
        let manifest = slack_like();
        let config = serde_json::json!({
            "bot_token": "xoxb-1",
            "signing_secret": "s",
            "reply_style": "carrier_pigeon"
        });
        assert!(manifest.validate_config(&config).is_err());
    }

    #[test]
    fn test_integer_field_validation() {
        let manifest = slack_like();
        let config = serde_json::json!({
            "bot_token": "xoxb-1",
            "signing_secret": "s",
            "max_threads": "four"
        });
        assert!(manifest.validate_config(&config).is_err());
    }

    #[test]
    fn test_content_hash_stable_and_sensitive() {
        let a = slack_like();
        let b = slack_like();
        assert_eq!(a.content_hash(), b.content_hash());

        let mut c = slack_like();
        c.description = "different".into();
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_derive_policy_defaults() {
        let manifest = slack_like();
        let policy = derive_policy(&manifest.security_defaults, None);
        assert!(policy.chat_only);
        assert!(!policy.allow_execute);
        assert!(policy.require_signature);
        assert_eq!(policy.allowed_commands, vec!["/session", "/help"]);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_derive_policy_with_overrides() {
        let manifest = slack_like();
        let overrides = PolicyOverride {
            allow_execute: Some(true),
            rate_limit_per_minute: Some(5),
            allowed_commands: Some(vec!["/session".into(), "/exec".into()]),
            ..Default::default()
        };
        let policy = derive_policy(&manifest.security_defaults, Some(&overrides));
        assert!(policy.allow_execute);
        assert!(!policy.chat_only);
        assert_eq!(policy.mode, PolicyMode::ChatExecRestricted);
        assert_eq!(policy.rate_limit_per_minute, 5);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_derivation_is_pure() {
        let manifest = slack_like();
        let p1 = derive_policy(&manifest.security_defaults, None);
        let p2 = derive_policy(&manifest.security_defaults, None);
        assert_eq!(
            serde_json::to_value(&p1).unwrap(),
            serde_json::to_value(&p2).unwrap()
        );
    }
}
