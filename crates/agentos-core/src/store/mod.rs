//! SQLite persistence layer.
//!
//! One [`Db`] handle wraps the connection behind a mutex, which keeps the
//! store `Send + Sync` while satisfying SQLite's single-writer requirement;
//! all writes through one handle are serialized and therefore monotonic.
//! Every store type takes a cloned handle, and every store can be opened
//! `in_memory()` for tests.

pub mod dedupe;
pub mod events;
pub mod rate_limit;
pub mod syslog;
pub mod task_audit;
pub mod violations;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{ErrorCode, KernelError, KernelResult};

pub use dedupe::DedupeStore;
pub use events::{ChannelEvent, EventStore};
pub use rate_limit::RateLimitStore;
pub use syslog::SystemLogStore;
pub use task_audit::TaskAuditStore;
pub use violations::ViolationStore;

// ─────────────────────────────────────────────
// Migrations
// ─────────────────────────────────────────────

/// Ordered, append-only migration list. The version of a database is the
/// highest entry applied; `migrate` runs everything above it.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS channel_configs (
    channel_id        TEXT PRIMARY KEY,
    config_json       TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'NEEDS_SETUP',
    enabled           INTEGER NOT NULL DEFAULT 0,
    last_error        TEXT,
    last_heartbeat_at TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channel_audit_log (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id   TEXT NOT NULL,
    action       TEXT NOT NULL,
    details      TEXT,
    performed_by TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS channel_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    message_id TEXT,
    status     TEXT NOT NULL,
    error      TEXT,
    metadata   TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_channel_events_msg
    ON channel_events (channel_id, message_id);

CREATE TABLE IF NOT EXISTS extensions (
    extension_id  TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    version       TEXT NOT NULL,
    status        TEXT NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 0,
    sha256        TEXT,
    source        TEXT,
    source_url    TEXT,
    installed_at  TEXT,
    manifest_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS extension_installs (
    install_id   TEXT PRIMARY KEY,
    extension_id TEXT NOT NULL,
    status       TEXT NOT NULL,
    progress     INTEGER NOT NULL DEFAULT 0,
    current_step TEXT,
    started_at   TEXT NOT NULL,
    completed_at TEXT,
    error        TEXT
);

CREATE TABLE IF NOT EXISTS extension_configs (
    extension_id TEXT PRIMARY KEY,
    config_json  TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lead_findings (
    fingerprint    TEXT PRIMARY KEY,
    code           TEXT NOT NULL,
    severity       TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT,
    window_kind    TEXT NOT NULL,
    first_seen_at  TEXT NOT NULL,
    last_seen_at   TEXT NOT NULL,
    count          INTEGER NOT NULL DEFAULT 1,
    evidence_json  TEXT,
    linked_task_id TEXT
);

CREATE TABLE IF NOT EXISTS evolution_decisions (
    decision_id  TEXT PRIMARY KEY,
    extension_id TEXT NOT NULL,
    action       TEXT NOT NULL,
    risk_score   INTEGER NOT NULL,
    trajectory   TEXT NOT NULL,
    review_level TEXT NOT NULL,
    explanation  TEXT NOT NULL,
    status       TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evolution_ext
    ON evolution_decisions (extension_id, created_at);

CREATE TABLE IF NOT EXISTS task_audits (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id      TEXT NOT NULL,
    event_type   TEXT NOT NULL,
    payload_json TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_task_audits_task ON task_audits (task_id);

CREATE TABLE IF NOT EXISTS system_logs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    level        TEXT NOT NULL,
    message      TEXT NOT NULL,
    context_json TEXT,
    timestamp    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message_dedupe (
    channel_id    TEXT NOT NULL,
    message_id    TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    PRIMARY KEY (channel_id, message_id)
);

CREATE TABLE IF NOT EXISTS rate_events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id TEXT NOT NULL,
    user_key   TEXT NOT NULL,
    ts_ms      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rate_events_key
    ON rate_events (channel_id, user_key, ts_ms);
"#,
)];

// ─────────────────────────────────────────────
// Db
// ─────────────────────────────────────────────

/// Shared database handle. Cheap to clone; all clones serialize through the
/// same connection mutex.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database at `path` with WAL enabled.
    ///
    /// Migrations are NOT applied automatically; call [`Db::migrate`]
    /// (the `agentos migrate` command does).
    pub fn open(path: &Path) -> KernelResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        // journal_mode returns a row, so query_row rather than execute.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Db {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database with migrations applied — for tests.
    pub fn in_memory() -> KernelResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Apply pending migrations; returns how many ran.
    pub fn migrate(&self) -> KernelResult<usize> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                 version    INTEGER PRIMARY KEY,
                 applied_at TEXT NOT NULL
             );",
        )?;
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        let mut applied = 0;
        for (version, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            debug!(version, "applying migration");
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
            )?;
            applied += 1;
        }
        if applied > 0 {
            info!(applied, "migrations applied");
        }
        Ok(applied)
    }

    /// Current schema version (0 = never migrated).
    pub fn schema_version(&self) -> KernelResult<i64> {
        let conn = self.lock()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_migrations'",
            [],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(0);
        }
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?)
    }

    /// Run `f` with the locked connection.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> KernelResult<T> {
        let conn = self.lock()?;
        f(&conn).map_err(KernelError::from)
    }

    fn lock(&self) -> KernelResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KernelError::new(ErrorCode::StoreWriteFailed, format!("db lock: {e}")))
    }
}
