//! Channel config store — instance state, secrets encrypted at rest, and
//! an immutable audit log.
//!
//! Tables: `channel_configs` (state), `channel_audit_log` (who changed
//! what), `channel_events` (message-level audit, owned by the core event
//! store). Every mutation appends an audit row with performer identity.

use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::store::Db;

use crate::manifest::ChannelManifest;

// ─────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────

/// Lifecycle status of a channel instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Disabled,
    Enabled,
    Error,
    NeedsSetup,
}

impl ChannelStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Disabled => "DISABLED",
            ChannelStatus::Enabled => "ENABLED",
            ChannelStatus::Error => "ERROR",
            ChannelStatus::NeedsSetup => "NEEDS_SETUP",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "DISABLED" => ChannelStatus::Disabled,
            "ENABLED" => ChannelStatus::Enabled,
            "ERROR" => ChannelStatus::Error,
            _ => ChannelStatus::NeedsSetup,
        }
    }
}

/// One row of `channel_configs`, with config decrypted.
#[derive(Clone, Debug)]
pub struct ChannelConfigRecord {
    pub channel_id: String,
    pub config: serde_json::Value,
    pub status: ChannelStatus,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────
// Secret cipher
// ─────────────────────────────────────────────

/// Encrypted-value marker. Values are stored as
/// `enc:v1:<nonce_hex>:<ciphertext_hex>`.
const ENC_PREFIX: &str = "enc:v1:";

/// AES-256-GCM cipher for secret config fields.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl SecretCipher {
    /// Build from raw key bytes (tests).
    pub fn from_key(key: [u8; 32]) -> Self {
        SecretCipher { key }
    }

    /// Load the key file, generating one on first use.
    pub fn load_or_create(path: &Path) -> KernelResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
            let bytes = hex::decode(content.trim())
                .map_err(|e| KernelError::new(ErrorCode::ConfigInvalid, format!("bad key file: {e}")))?;
            let key: [u8; 32] = bytes.try_into().map_err(|_| {
                KernelError::new(ErrorCode::ConfigInvalid, "key file must hold 32 bytes")
            })?;
            return Ok(SecretCipher { key });
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
        }
        let key = Aes256Gcm::generate_key(&mut OsRng);
        std::fs::write(path, hex::encode(key))
            .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
        info!(path = %path.display(), "generated channel secret key");
        Ok(SecretCipher { key: key.into() })
    }

    pub fn encrypt(&self, plaintext: &str) -> KernelResult<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| KernelError::new(ErrorCode::StoreWriteFailed, "encryption failed"))?;
        Ok(format!(
            "{ENC_PREFIX}{}:{}",
            hex::encode(nonce),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> KernelResult<String> {
        let Some(rest) = stored.strip_prefix(ENC_PREFIX) else {
            // Plaintext passthrough for values written before encryption.
            return Ok(stored.to_string());
        };
        let (nonce_hex, ct_hex) = rest.split_once(':').ok_or_else(|| {
            KernelError::new(ErrorCode::ConfigInvalid, "malformed encrypted value")
        })?;
        let nonce_bytes = hex::decode(nonce_hex)
            .map_err(|_| KernelError::new(ErrorCode::ConfigInvalid, "malformed nonce"))?;
        let ciphertext = hex::decode(ct_hex)
            .map_err(|_| KernelError::new(ErrorCode::ConfigInvalid, "malformed ciphertext"))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| KernelError::new(ErrorCode::ConfigInvalid, "decryption failed"))?;
        String::from_utf8(plaintext)
            .map_err(|_| KernelError::new(ErrorCode::ConfigInvalid, "secret is not utf-8"))
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }
}

// ─────────────────────────────────────────────
// Config store
// ─────────────────────────────────────────────

/// Transactional store over `channel_configs` + `channel_audit_log`.
pub struct ChannelConfigStore {
    db: Db,
    cipher: SecretCipher,
}

impl ChannelConfigStore {
    pub fn new(db: Db, cipher: SecretCipher) -> Self {
        ChannelConfigStore { db, cipher }
    }

    /// Validate, encrypt secret fields, and upsert the channel config.
    /// Appends an audit row. Invalid config leaves stored state unchanged.
    pub fn save_config(
        &self,
        manifest: &ChannelManifest,
        channel_id: &str,
        config: &serde_json::Value,
        performed_by: &str,
    ) -> KernelResult<()> {
        manifest.validate_config(config)?;

        let mut stored = config.clone();
        if let Some(obj) = stored.as_object_mut() {
            for field in manifest.secret_fields() {
                if let Some(serde_json::Value::String(plain)) = obj.get(field) {
                    if !SecretCipher::is_encrypted(plain) {
                        let encrypted = self.cipher.encrypt(plain)?;
                        obj.insert(field.to_string(), serde_json::Value::String(encrypted));
                    }
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let config_json = stored.to_string();
        self.db.with(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO channel_configs
                     (channel_id, config_json, status, enabled, created_at, updated_at)
                 VALUES (?1, ?2, 'NEEDS_SETUP', 0, ?3, ?3)
                 ON CONFLICT(channel_id) DO UPDATE SET
                     config_json = excluded.config_json,
                     updated_at = excluded.updated_at",
                rusqlite::params![channel_id, config_json, now],
            )?;
            tx.execute(
                "INSERT INTO channel_audit_log
                     (channel_id, action, details, performed_by, created_at)
                 VALUES (?1, 'config_saved', ?2, ?3, ?4)",
                rusqlite::params![
                    channel_id,
                    format!("{} field(s)", config.as_object().map(|o| o.len()).unwrap_or(0)),
                    performed_by,
                    now
                ],
            )?;
            tx.commit()
        })?;
        info!(channel = %channel_id, by = %performed_by, "channel config saved");
        Ok(())
    }

    /// Flip the enabled flag; status follows. Appends an audit row.
    pub fn set_enabled(
        &self,
        channel_id: &str,
        enabled: bool,
        performed_by: &str,
    ) -> KernelResult<()> {
        let status = if enabled {
            ChannelStatus::Enabled
        } else {
            ChannelStatus::Disabled
        };
        let now = Utc::now().to_rfc3339();
        let changed = self.db.with(|conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE channel_configs
                 SET enabled = ?2, status = ?3, updated_at = ?4
                 WHERE channel_id = ?1",
                rusqlite::params![channel_id, enabled as i64, status.as_str(), now],
            )?;
            if changed > 0 {
                tx.execute(
                    "INSERT INTO channel_audit_log
                         (channel_id, action, details, performed_by, created_at)
                     VALUES (?1, ?2, NULL, ?3, ?4)",
                    rusqlite::params![
                        channel_id,
                        if enabled { "enabled" } else { "disabled" },
                        performed_by,
                        now
                    ],
                )?;
            }
            tx.commit()?;
            Ok(changed)
        })?;
        if changed == 0 {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                format!("unknown channel {channel_id}"),
            ));
        }
        Ok(())
    }

    /// Fetch a channel's record with secrets decrypted.
    pub fn get(&self, channel_id: &str) -> KernelResult<Option<ChannelConfigRecord>> {
        let row = self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id, config_json, status, enabled, last_error,
                        last_heartbeat_at, created_at, updated_at
                 FROM channel_configs WHERE channel_id = ?1",
            )?;
            let mut rows = stmt.query_map([channel_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?;
            rows.next().transpose()
        })?;

        let Some((id, config_json, status, enabled, last_error, hb, created, updated)) = row else {
            return Ok(None);
        };

        let mut config: serde_json::Value = serde_json::from_str(&config_json)
            .map_err(|e| KernelError::new(ErrorCode::ConfigInvalid, e.to_string()))?;
        if let Some(obj) = config.as_object_mut() {
            for (_, value) in obj.iter_mut() {
                if let serde_json::Value::String(s) = value {
                    if SecretCipher::is_encrypted(s) {
                        *s = self.cipher.decrypt(s)?;
                    }
                }
            }
        }

        Ok(Some(ChannelConfigRecord {
            channel_id: id,
            config,
            status: ChannelStatus::parse(&status),
            enabled: enabled != 0,
            last_error,
            last_heartbeat_at: hb.and_then(|s| s.parse().ok()),
            created_at: created.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Current lifecycle status, if the channel exists.
    pub fn get_status(&self, channel_id: &str) -> KernelResult<Option<ChannelStatus>> {
        Ok(self.get(channel_id)?.map(|r| r.status))
    }

    /// Record a heartbeat; clears a previous ERROR status.
    pub fn heartbeat(&self, channel_id: &str) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "UPDATE channel_configs
                 SET last_heartbeat_at = ?2,
                     status = CASE WHEN status = 'ERROR' AND enabled = 1
                                   THEN 'ENABLED' ELSE status END,
                     updated_at = ?2
                 WHERE channel_id = ?1",
                rusqlite::params![channel_id, now],
            )
        })?;
        Ok(())
    }

    /// Mark a channel ERROR (advisory; the channel stays enabled).
    pub fn mark_error(&self, channel_id: &str, error: &str) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        self.db.with(|conn| {
            conn.execute(
                "UPDATE channel_configs
                 SET status = 'ERROR', last_error = ?2, updated_at = ?3
                 WHERE channel_id = ?1",
                rusqlite::params![channel_id, error, now],
            )
        })?;
        Ok(())
    }

    /// Enabled channels whose heartbeat is older than `stale_after`.
    pub fn stale_channels(&self, stale_after: Duration) -> KernelResult<Vec<String>> {
        let cutoff = (Utc::now() - stale_after).to_rfc3339();
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT channel_id FROM channel_configs
                 WHERE enabled = 1
                   AND status != 'ERROR'
                   AND last_heartbeat_at IS NOT NULL
                   AND last_heartbeat_at < ?1",
            )?;
            let rows = stmt.query_map([cutoff], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Audit rows for a channel, newest first: `(action, performed_by)`.
    pub fn audit_log(&self, channel_id: &str) -> KernelResult<Vec<(String, String)>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT action, performed_by FROM channel_audit_log
                 WHERE channel_id = ?1 ORDER BY id DESC",
            )?;
            let rows = stmt.query_map([channel_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}
