//! Configuration schema.
//!
//! Hierarchy: `KernelConfig` → `StoreConfig`, `BusConfig`, `ChannelsConfig`,
//! `GovernanceConfig`, `SandboxConfig`, `McpConfig`, `InstallConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.
//! `#[serde(rename_all = "camelCase")]` handles the conversion.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::policy::SecurityPolicy;

// ─────────────────────────────────────────────
// Root config
// ─────────────────────────────────────────────

/// Root configuration — loaded from `~/.agentos/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelConfig {
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub channels: ChannelsConfig,
    pub governance: GovernanceConfig,
    pub sandbox: SandboxConfig,
    pub mcp: McpConfig,
    pub install: InstallConfig,
}

// ─────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────

/// SQLite store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Path to the kernel database.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.agentos/kernel.db".to_string(),
        }
    }
}

// ─────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────

/// Message bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Queue capacity for inbound and outbound.
    pub buffer_size: usize,
    /// Maximum outbound send attempts on transient failure.
    pub max_send_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            max_send_attempts: 3,
        }
    }
}

// ─────────────────────────────────────────────
// Channels
// ─────────────────────────────────────────────

/// Channel registry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelsConfig {
    /// Directory containing channel manifests.
    pub manifests_dir: String,
    /// Minutes of heartbeat silence before a channel is marked ERROR.
    pub heartbeat_stale_minutes: u32,
    /// Default security policy applied when a manifest has no defaults.
    pub default_policy: SecurityPolicy,
    /// Per-channel policy overrides, keyed by channel_id.
    pub policy_overrides: HashMap<String, SecurityPolicy>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            manifests_dir: "~/.agentos/manifests".to_string(),
            heartbeat_stale_minutes: 10,
            default_policy: SecurityPolicy::default(),
            policy_overrides: HashMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Governance
// ─────────────────────────────────────────────

/// Capability governance settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GovernanceConfig {
    /// Tool-table refresh TTL, seconds.
    pub refresh_ttl_seconds: u64,
    /// Side-effect tags denied per source ("ext" / "mcp").
    pub denied_side_effects: HashMap<String, Vec<String>>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            refresh_ttl_seconds: 60,
            denied_side_effects: HashMap::new(),
        }
    }
}

// ─────────────────────────────────────────────
// Sandbox
// ─────────────────────────────────────────────

/// Container sandbox settings (defaults for HIGH risk).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxConfig {
    /// Container runtime binary (docker-compatible CLI).
    pub runtime_bin: String,
    /// Image extensions run in.
    pub image: String,
    /// CPU cap, cores.
    pub cpus: f64,
    /// Memory cap, MiB (hard).
    pub memory_mib: u64,
    /// Wall timeout, seconds.
    pub timeout_seconds: u64,
    /// tmpfs size for /tmp, MiB.
    pub tmpfs_mib: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime_bin: "docker".to_string(),
            image: "agentos-sandbox:latest".to_string(),
            cpus: 0.5,
            memory_mib: 256,
            timeout_seconds: 15,
            tmpfs_mib: 100,
        }
    }
}

// ─────────────────────────────────────────────
// MCP
// ─────────────────────────────────────────────

/// MCP client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct McpConfig {
    /// Path to the server definitions file.
    pub servers_file: String,
    /// Per-call deadline, seconds.
    pub call_timeout_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers_file: "~/.agentos/mcp_servers.yaml".to_string(),
            call_timeout_seconds: 30,
        }
    }
}

// ─────────────────────────────────────────────
// Install
// ─────────────────────────────────────────────

/// Install engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallConfig {
    /// Download size cap, MiB.
    pub max_download_mib: u64,
    /// Default per-step timeout, seconds.
    pub step_timeout_seconds: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            max_download_mib: 200,
            step_timeout_seconds: 300,
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
