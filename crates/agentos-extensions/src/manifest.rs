//! Extension manifests — validated at load into typed structures.

use semver::Version;
use serde::{Deserialize, Serialize};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

/// Permissions an extension may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "exec")]
    Exec,
    #[serde(rename = "filesystem.read")]
    FilesystemRead,
    #[serde(rename = "filesystem.write")]
    FilesystemWrite,
}

impl Permission {
    /// The manifest wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Network => "network",
            Permission::Exec => "exec",
            Permission::FilesystemRead => "filesystem.read",
            Permission::FilesystemWrite => "filesystem.write",
        }
    }
}

/// Platforms an extension supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Win32,
    All,
}

/// The kinds of capability an extension exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    SlashCommand,
    Tool,
    Agent,
    Workflow,
}

/// One declared capability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub id: String,
    pub kind: CapabilityKind,
    /// Command word (slash commands) or tool name.
    pub command: String,
    /// Sub-executor selector: `exec.<tool>`, `analyze.response`, ….
    pub runner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Optional declared risk (inference applies when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
}

/// The `install` block.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallSpec {
    /// Path to the plan file inside the package.
    pub plan: String,
    /// Must be `agentos_managed`.
    pub mode: String,
}

/// A parsed and validated extension manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub id: String,
    pub version: Version,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDecl>,
    #[serde(default)]
    pub permissions_required: Vec<Permission>,
    #[serde(default)]
    pub platforms: Vec<Platform>,
    pub install: InstallSpec,
}

impl ExtensionManifest {
    /// Parse and validate from JSON.
    pub fn parse(content: &str) -> KernelResult<Self> {
        let manifest: ExtensionManifest = serde_json::from_str(content)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> KernelResult<()> {
        if !is_valid_id(&self.id) {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("extension id {:?} must be dotted [a-z0-9_.-]+", self.id),
            ));
        }
        if self.name.is_empty() {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                "extension name must not be empty",
            ));
        }
        if self.install.mode != "agentos_managed" {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("unsupported install mode {:?}", self.install.mode),
            ));
        }
        if self.install.plan.is_empty() || self.install.plan.contains("..") {
            return Err(KernelError::new(
                ErrorCode::ManifestInvalid,
                "install plan path must be package-relative",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for capability in &self.capabilities {
            if capability.id.is_empty() || capability.command.is_empty() {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("capability {:?} needs an id and a command", capability.id),
                ));
            }
            if !seen.insert(&capability.id) {
                return Err(KernelError::new(
                    ErrorCode::ManifestInvalid,
                    format!("duplicate capability id {:?}", capability.id),
                ));
            }
        }
        Ok(())
    }

    /// Whether this extension supports the given platform.
    pub fn supports_platform(&self, os: &str) -> bool {
        if self.platforms.is_empty() {
            return true;
        }
        self.platforms.iter().any(|p| match p {
            Platform::All => true,
            Platform::Linux => os == "linux",
            Platform::Darwin => os == "darwin",
            Platform::Win32 => os == "win32",
        })
    }

    /// Permission wire strings, for side-effect inference.
    pub fn permission_names(&self) -> Vec<String> {
        self.permissions_required
            .iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }
}

/// `[a-z0-9_.-]+` with at least one dot, no leading/trailing separator.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.contains('.')
        && !id.starts_with(['.', '-', '_'])
        && !id.ends_with(['.', '-', '_'])
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A representative manifest used across the crate's tests.
    pub fn manifest_json() -> serde_json::Value {
        serde_json::json!({
            "id": "notes.sync",
            "version": "1.2.0",
            "name": "Notes Sync",
            "description": "Sync notes with a remote service",
            "capabilities": [
                {
                    "id": "pull",
                    "kind": "tool",
                    "command": "pull",
                    "runner": "exec.notes-pull",
                    "description": "Pull latest notes",
                    "input_schema": {"type": "object", "properties": {}, "required": []}
                },
                {
                    "id": "summary",
                    "kind": "slash_command",
                    "command": "notes",
                    "runner": "analyze.response",
                    "description": "Summarize the last response"
                }
            ],
            "permissions_required": ["network", "filesystem.write"],
            "platforms": ["linux", "darwin"],
            "install": {"plan": "install/plan.yaml", "mode": "agentos_managed"}
        })
    }
}
