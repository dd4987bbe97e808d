//! Extension store — `extensions`, `extension_installs`, and
//! `extension_configs` tables.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::store::Db;

use crate::manifest::ExtensionManifest;

/// Lifecycle status of an installed extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionStatus {
    Installing,
    Installed,
    Failed,
    Uninstalled,
}

impl ExtensionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExtensionStatus::Installing => "INSTALLING",
            ExtensionStatus::Installed => "INSTALLED",
            ExtensionStatus::Failed => "FAILED",
            ExtensionStatus::Uninstalled => "UNINSTALLED",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "INSTALLING" => ExtensionStatus::Installing,
            "INSTALLED" => ExtensionStatus::Installed,
            "FAILED" => ExtensionStatus::Failed,
            _ => ExtensionStatus::Uninstalled,
        }
    }
}

/// One row of `extensions`, manifest re-hydrated.
#[derive(Clone, Debug)]
pub struct ExtensionRecord {
    pub extension_id: String,
    pub manifest: ExtensionManifest,
    pub status: ExtensionStatus,
    pub enabled: bool,
    pub sha256: Option<String>,
    pub source: Option<String>,
    pub source_url: Option<String>,
}

/// One row of `extension_installs`.
#[derive(Clone, Debug)]
pub struct InstallRecord {
    pub install_id: String,
    pub extension_id: String,
    pub status: String,
    pub progress: u8,
    pub current_step: Option<String>,
    pub error: Option<String>,
}

/// Store over the extension tables.
#[derive(Clone)]
pub struct ExtensionStore {
    db: Db,
}

impl ExtensionStore {
    pub fn new(db: Db) -> Self {
        ExtensionStore { db }
    }

    /// Insert or replace an extension row from its manifest.
    pub fn upsert(
        &self,
        manifest: &ExtensionManifest,
        status: ExtensionStatus,
        sha256: Option<&str>,
        source: Option<&str>,
        source_url: Option<&str>,
    ) -> KernelResult<()> {
        let manifest_json = serde_json::to_string(manifest)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO extensions
                     (extension_id, name, version, status, enabled, sha256, source,
                      source_url, installed_at, manifest_json)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(extension_id) DO UPDATE SET
                     name = excluded.name,
                     version = excluded.version,
                     status = excluded.status,
                     sha256 = excluded.sha256,
                     source = excluded.source,
                     source_url = excluded.source_url,
                     manifest_json = excluded.manifest_json",
                rusqlite::params![
                    manifest.id,
                    manifest.name,
                    manifest.version.to_string(),
                    status.as_str(),
                    sha256,
                    source,
                    source_url,
                    now,
                    manifest_json,
                ],
            )
        })?;
        Ok(())
    }

    pub fn set_status(&self, extension_id: &str, status: ExtensionStatus) -> KernelResult<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE extensions SET status = ?2 WHERE extension_id = ?1",
                rusqlite::params![extension_id, status.as_str()],
            )
        })?;
        Ok(())
    }

    pub fn set_enabled(&self, extension_id: &str, enabled: bool) -> KernelResult<()> {
        let changed = self.db.with(|conn| {
            conn.execute(
                "UPDATE extensions SET enabled = ?2 WHERE extension_id = ?1",
                rusqlite::params![extension_id, enabled as i64],
            )
        })?;
        if changed == 0 {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                format!("unknown extension {extension_id}"),
            ));
        }
        Ok(())
    }

    pub fn get(&self, extension_id: &str) -> KernelResult<Option<ExtensionRecord>> {
        let row = self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT extension_id, status, enabled, sha256, source, source_url, manifest_json
                 FROM extensions WHERE extension_id = ?1",
            )?;
            let mut rows = stmt.query_map([extension_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;
            rows.next().transpose()
        })?;

        let Some((id, status, enabled, sha256, source, source_url, manifest_json)) = row else {
            return Ok(None);
        };
        let manifest: ExtensionManifest = serde_json::from_str(&manifest_json)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        Ok(Some(ExtensionRecord {
            extension_id: id,
            manifest,
            status: ExtensionStatus::parse(&status),
            enabled: enabled != 0,
            sha256,
            source,
            source_url,
        }))
    }

    /// All extensions, sorted by id.
    pub fn list(&self) -> KernelResult<Vec<ExtensionRecord>> {
        let ids: Vec<String> = self.db.with(|conn| {
            let mut stmt =
                conn.prepare("SELECT extension_id FROM extensions ORDER BY extension_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Enabled, installed extensions only.
    pub fn enabled(&self) -> KernelResult<Vec<ExtensionRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.enabled && r.status == ExtensionStatus::Installed)
            .collect())
    }

    pub fn remove(&self, extension_id: &str) -> KernelResult<()> {
        self.db.with(|conn| {
            conn.execute(
                "DELETE FROM extensions WHERE extension_id = ?1",
                [extension_id],
            )
        })?;
        Ok(())
    }

    // ── Install tracking ──

    /// Open a new install record; returns its id.
    pub fn begin_install(&self, extension_id: &str) -> KernelResult<String> {
        let install_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO extension_installs
                     (install_id, extension_id, status, progress, started_at)
                 VALUES (?1, ?2, 'RUNNING', 0, ?3)",
                rusqlite::params![install_id, extension_id, now],
            )
        })?;
        Ok(install_id)
    }

    pub fn update_install(
        &self,
        install_id: &str,
        progress: u8,
        current_step: Option<&str>,
    ) -> KernelResult<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE extension_installs SET progress = ?2, current_step = ?3
                 WHERE install_id = ?1",
                rusqlite::params![install_id, progress as i64, current_step],
            )
        })?;
        Ok(())
    }

    pub fn finish_install(
        &self,
        install_id: &str,
        success: bool,
        progress: u8,
        error: Option<&str>,
    ) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "UPDATE extension_installs
                 SET status = ?2, progress = ?3, completed_at = ?4, error = ?5
                 WHERE install_id = ?1",
                rusqlite::params![
                    install_id,
                    if success { "SUCCEEDED" } else { "FAILED" },
                    progress as i64,
                    now,
                    error
                ],
            )
        })?;
        Ok(())
    }

    pub fn get_install(&self, install_id: &str) -> KernelResult<Option<InstallRecord>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT install_id, extension_id, status, progress, current_step, error
                 FROM extension_installs WHERE install_id = ?1",
            )?;
            let mut rows = stmt.query_map([install_id], |row| {
                Ok(InstallRecord {
                    install_id: row.get(0)?,
                    extension_id: row.get(1)?,
                    status: row.get(2)?,
                    progress: row.get::<_, i64>(3)? as u8,
                    current_step: row.get(4)?,
                    error: row.get(5)?,
                })
            })?;
            rows.next().transpose()
        })
    }

    // ── Per-extension config ──

    pub fn set_config(&self, extension_id: &str, config: &serde_json::Value) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO extension_configs (extension_id, config_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(extension_id) DO UPDATE SET
                     config_json = excluded.config_json,
                     updated_at = excluded.updated_at",
                rusqlite::params![extension_id, config.to_string(), now],
            )
        })?;
        Ok(())
    }

    pub fn get_config(&self, extension_id: &str) -> KernelResult<Option<serde_json::Value>> {
        let raw: Option<String> = self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT config_json FROM extension_configs WHERE extension_id = ?1",
            )?;
            let mut rows = stmt.query_map([extension_id], |row| row.get(0))?;
            rows.next().transpose()
        })?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }
}
