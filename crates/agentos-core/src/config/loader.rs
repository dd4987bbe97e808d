//! Config loader — reads `~/.agentos/config.json` and applies env
//! overrides.
//!
//! # Loading precedence
//! 1. Defaults (from `KernelConfig::default()`)
//! 2. JSON file at `~/.agentos/config.json`
//! 3. Environment variables (override JSON)

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::schema::KernelConfig;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from the default path + env vars.
///
/// Falls back to `KernelConfig::default()` if the file doesn't exist or
/// can't be parsed.
pub fn load_config(path: Option<&Path>) -> KernelConfig {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> KernelConfig {
    if !path.exists() {
        info!("no config file at {}, using defaults", path.display());
        return apply_env_overrides(KernelConfig::default());
    }

    debug!("loading config from {}", path.display());
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(KernelConfig::default());
        }
    };

    match serde_json::from_str::<KernelConfig>(&content) {
        Ok(config) => apply_env_overrides(config),
        Err(e) => {
            warn!("failed to parse config JSON: {}", e);
            apply_env_overrides(KernelConfig::default())
        }
    }
}

/// Persist the config as pretty JSON.
pub fn save_config(config: &KernelConfig, path: Option<&Path>) -> anyhow::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&config_path, json)?;
    info!("saved config to {}", config_path.display());
    Ok(())
}

/// Environment overrides for secrets and deploy-specific paths.
fn apply_env_overrides(mut config: KernelConfig) -> KernelConfig {
    if let Ok(path) = std::env::var("AGENTOS_DB_PATH") {
        if !path.is_empty() {
            config.store.path = path;
        }
    }
    if let Ok(dir) = std::env::var("AGENTOS_MANIFESTS_DIR") {
        if !dir.is_empty() {
            config.channels.manifests_dir = dir;
        }
    }
    if let Ok(bin) = std::env::var("AGENTOS_SANDBOX_RUNTIME") {
        if !bin.is_empty() {
            config.sandbox.runtime_bin = bin;
        }
    }
    config
}
