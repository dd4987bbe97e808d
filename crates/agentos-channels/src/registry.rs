//! Manifest registry — loads channel-type manifests from a directory.
//!
//! Invalid manifests are skipped and logged; the rest still load. Reload
//! publishes a fresh snapshot behind the RwLock, so readers never see a
//! half-loaded registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::manifest::ChannelManifest;

/// Registry of channel-type manifests, keyed by manifest id.
pub struct ManifestRegistry {
    dir: PathBuf,
    manifests: RwLock<HashMap<String, Arc<ChannelManifest>>>,
}

impl ManifestRegistry {
    /// Create a registry over `dir` and perform the initial load.
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let registry = ManifestRegistry {
            dir: dir.into(),
            manifests: RwLock::new(HashMap::new()),
        };
        registry.reload();
        registry
    }

    /// Re-scan the manifest directory and atomically replace the snapshot.
    ///
    /// Returns how many manifests loaded. A missing directory is an empty
    /// registry, not an error.
    pub fn reload(&self) -> usize {
        let mut loaded: HashMap<String, Arc<ChannelManifest>> = HashMap::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "manifest directory unreadable");
                return 0;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::load_one(&path) {
                Ok(manifest) => {
                    // Content-addressable identity: same (id, version) must
                    // mean same content; a conflicting duplicate is skipped.
                    if let Some(existing) = loaded.get(&manifest.id) {
                        if existing.version == manifest.version
                            && existing.content_hash() != manifest.content_hash()
                        {
                            warn!(
                                id = %manifest.id,
                                version = %manifest.version,
                                path = %path.display(),
                                "conflicting duplicate manifest skipped"
                            );
                            continue;
                        }
                    }
                    info!(id = %manifest.id, version = %manifest.version, "loaded channel manifest");
                    loaded.insert(manifest.id.clone(), Arc::new(manifest));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping invalid manifest");
                }
            }
        }

        let count = loaded.len();
        if let Ok(mut map) = self.manifests.write() {
            *map = loaded;
        }
        count
    }

    fn load_one(path: &Path) -> KernelResult<ChannelManifest> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        let manifest: ChannelManifest = serde_json::from_str(&content)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Ids of all loaded channel types, sorted.
    pub fn list_channels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .manifests
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Look up a manifest by channel type id.
    pub fn get_manifest(&self, channel_type_id: &str) -> Option<Arc<ChannelManifest>> {
        self.manifests
            .read()
            .ok()
            .and_then(|m| m.get(channel_type_id).cloned())
    }

    /// Validate a candidate config against the named channel type.
    pub fn validate_config(
        &self,
        channel_type_id: &str,
        config: &serde_json::Value,
    ) -> KernelResult<()> {
        let manifest = self.get_manifest(channel_type_id).ok_or_else(|| {
            KernelError::new(
                ErrorCode::ManifestInvalid,
                format!("unknown channel type {channel_type_id}"),
            )
        })?;
        manifest.validate_config(config)
    }

    /// All webhook paths exposed by loaded manifests, with their owner.
    pub fn webhook_paths(&self) -> Vec<(String, String)> {
        let mut paths = Vec::new();
        if let Ok(map) = self.manifests.read() {
            for manifest in map.values() {
                for path in &manifest.webhook_paths {
                    paths.push((manifest.id.clone(), path.clone()));
                }
            }
        }
        paths.sort();
        paths
    }
}
