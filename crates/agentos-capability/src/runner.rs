//! Capability runner — executes an extension's declared command.
//!
//! `exec.<tool>` runs a subprocess with a strictly limited PATH (extension
//! tool dirs plus the system minimum), an env filtered to the context's
//! whitelist, and a working directory that must live under the data dir.
//! `analyze.response` and `analyze.schema` are in-process helpers over the
//! per-session response store. Every execution leaves an audit row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::process::Command;
use tracing::{debug, warn};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::store::TaskAuditStore;

use crate::response_store::ResponseStore;

/// Maximum bytes of stdout/stderr retained.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Stderr tail length kept in audit rows.
const STDERR_TAIL_CHARS: usize = 500;

/// System fallback directories appended to the restricted PATH.
const SYSTEM_PATH_MIN: &[&str] = &["/usr/bin", "/bin"];

// ─────────────────────────────────────────────
// Route & context
// ─────────────────────────────────────────────

/// A parsed capability route.
#[derive(Clone, Debug)]
pub struct CapabilityRoute {
    pub command_name: String,
    pub extension_id: String,
    pub action_id: String,
    /// Sub-executor selector: `exec.<tool>`, `analyze.response`,
    /// `analyze.schema`.
    pub runner: String,
    pub args: Vec<String>,
    pub flags: HashMap<String, String>,
}

/// Execution context for one capability run.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_id: String,
    pub extension_id: String,
    /// Must exist and live under the data dir.
    pub work_dir: PathBuf,
    pub usage_doc: Option<String>,
    pub timeout: Duration,
    /// Environment variables passed through to subprocesses.
    pub env_whitelist: Vec<String>,
}

/// Captured outcome of a run (also the sandbox result shape).
#[derive(Clone, Debug)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub wall_time_ms: u64,
}

// ─────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────

/// Executes capability routes for installed extensions.
pub struct CapabilityRunner {
    data_dir: PathBuf,
    responses: Arc<ResponseStore>,
    audit: TaskAuditStore,
}

impl CapabilityRunner {
    pub fn new(data_dir: PathBuf, responses: Arc<ResponseStore>, audit: TaskAuditStore) -> Self {
        CapabilityRunner {
            data_dir,
            responses,
            audit,
        }
    }

    /// Run one route and audit the outcome.
    pub async fn run(
        &self,
        route: &CapabilityRoute,
        ctx: &ExecutionContext,
    ) -> KernelResult<RunResult> {
        let started = Instant::now();
        let outcome = self.dispatch(route, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let payload = match &outcome {
            Ok(result) => json!({
                "extension_id": route.extension_id,
                "command": route.command_name,
                "action": route.action_id,
                "user": ctx.user_id,
                "session": ctx.session_id,
                "success": result.exit_code == 0,
                "duration_ms": duration_ms,
                "stderr_tail": tail(&result.stderr),
            }),
            Err(err) => json!({
                "extension_id": route.extension_id,
                "command": route.command_name,
                "action": route.action_id,
                "user": ctx.user_id,
                "session": ctx.session_id,
                "success": false,
                "duration_ms": duration_ms,
                "error": err.code.as_str(),
            }),
        };
        self.audit.append(
            &format!("cap:{}:{}", route.extension_id, route.command_name),
            "capability_executed",
            &payload,
        )?;
        outcome
    }

    async fn dispatch(
        &self,
        route: &CapabilityRoute,
        ctx: &ExecutionContext,
    ) -> KernelResult<RunResult> {
        if let Some(tool) = route.runner.strip_prefix("exec.") {
            return self.exec_tool(tool, route, ctx).await;
        }
        match route.runner.as_str() {
            "analyze.response" => self.analyze_response(ctx),
            "analyze.schema" => self.analyze_schema(ctx),
            other => Err(KernelError::new(
                ErrorCode::CommandFailed,
                format!("unknown runner {other:?}"),
            )),
        }
    }

    // ── exec.<tool> ──

    async fn exec_tool(
        &self,
        tool: &str,
        route: &CapabilityRoute,
        ctx: &ExecutionContext,
    ) -> KernelResult<RunResult> {
        self.check_work_dir(&ctx.work_dir)?;
        let binary = self.resolve_tool(tool)?;
        debug!(tool = %tool, binary = %binary.display(), "spawning capability subprocess");

        let mut command = Command::new(&binary);
        command
            .args(&route.args)
            .current_dir(&ctx.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env_clear()
            .env("PATH", self.restricted_path());
        for var in &ctx.env_whitelist {
            if let Ok(value) = std::env::var(var) {
                command.env(var, value);
            }
        }

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| KernelError::new(ErrorCode::CommandFailed, format!("spawn failed: {e}")))?;

        let output = match tokio::time::timeout(ctx.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(KernelError::new(ErrorCode::CommandFailed, e.to_string()));
            }
            Err(_) => {
                // kill_on_drop reaps the subprocess tree.
                warn!(tool = %tool, timeout = ?ctx.timeout, "capability subprocess timed out");
                return Err(KernelError::new(
                    ErrorCode::Timeout,
                    format!("{tool} exceeded {}s", ctx.timeout.as_secs()),
                ));
            }
        };

        Ok(RunResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: capture(&output.stdout),
            stderr: capture(&output.stderr),
            wall_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// The work dir must exist and live under the data dir.
    fn check_work_dir(&self, work_dir: &Path) -> KernelResult<()> {
        let canonical = work_dir.canonicalize().map_err(|_| {
            KernelError::new(
                ErrorCode::PermissionDenied,
                format!("work dir {} does not exist", work_dir.display()),
            )
        })?;
        let data_root = self
            .data_dir
            .canonicalize()
            .unwrap_or_else(|_| self.data_dir.clone());
        if !canonical.starts_with(&data_root) {
            return Err(KernelError::new(
                ErrorCode::PermissionDenied,
                format!("work dir {} escapes the data dir", work_dir.display()),
            ));
        }
        Ok(())
    }

    /// Resolve a tool to an absolute path within the restricted PATH.
    fn resolve_tool(&self, tool: &str) -> KernelResult<PathBuf> {
        if tool.contains('/') || tool.contains("..") {
            return Err(KernelError::new(
                ErrorCode::PermissionDenied,
                "tool names may not carry paths",
            ));
        }
        for dir in self.path_entries() {
            let candidate = dir.join(tool);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(KernelError::new(
            ErrorCode::CommandFailed,
            format!("tool {tool:?} not found on the restricted PATH"),
        ))
    }

    fn path_entries(&self) -> Vec<PathBuf> {
        let mut entries = vec![self.data_dir.join("tools"), self.data_dir.join("bin")];
        entries.extend(SYSTEM_PATH_MIN.iter().map(PathBuf::from));
        entries
    }

    fn restricted_path(&self) -> String {
        self.path_entries()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(":")
    }

    // ── analyze.* ──

    fn analyze_response(&self, ctx: &ExecutionContext) -> KernelResult<RunResult> {
        let Some(response) = self.responses.get(&ctx.session_id) else {
            return Err(KernelError::new(
                ErrorCode::CommandFailed,
                "no captured response for this session",
            ));
        };
        let summary = json!({
            "chars": response.chars().count(),
            "lines": response.lines().count(),
            "words": response.split_whitespace().count(),
            "head": agentos_core::utils::truncate_string(&response, 200),
        });
        Ok(RunResult {
            exit_code: 0,
            stdout: summary.to_string(),
            stderr: String::new(),
            wall_time_ms: 0,
        })
    }

    /// Summarize the JSON shape of the session's last response.
    fn analyze_schema(&self, ctx: &ExecutionContext) -> KernelResult<RunResult> {
        let Some(response) = self.responses.get(&ctx.session_id) else {
            return Err(KernelError::new(
                ErrorCode::CommandFailed,
                "no captured response for this session",
            ));
        };
        let value: serde_json::Value = serde_json::from_str(&response).map_err(|e| {
            KernelError::new(
                ErrorCode::CommandFailed,
                format!("last response is not JSON: {e}"),
            )
        })?;
        Ok(RunResult {
            exit_code: 0,
            stdout: summarize_shape(&value, 0).to_string(),
            stderr: String::new(),
            wall_time_ms: 0,
        })
    }
}

fn summarize_shape(value: &serde_json::Value, depth: usize) -> serde_json::Value {
    if depth >= 3 {
        return json!("…");
    }
    match value {
        serde_json::Value::Object(map) => {
            let fields: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), summarize_shape(v, depth + 1)))
                .collect();
            serde_json::Value::Object(fields)
        }
        serde_json::Value::Array(items) => match items.first() {
            Some(first) => json!([summarize_shape(first, depth + 1), format!("×{}", items.len())]),
            None => json!([]),
        },
        serde_json::Value::String(_) => json!("string"),
        serde_json::Value::Number(_) => json!("number"),
        serde_json::Value::Bool(_) => json!("boolean"),
        serde_json::Value::Null => json!("null"),
    }
}

fn capture(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    agentos_core::utils::truncate_string(&text, MAX_CAPTURE_BYTES)
}

fn tail(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= STDERR_TAIL_CHARS {
        s.to_string()
    } else {
        chars[chars.len() - STDERR_TAIL_CHARS..].iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentos_core::store::Db;

    fn route(runner: &str, args: &[&str]) -> CapabilityRoute {
        CapabilityRoute {
            command_name: "notes".into(),
            extension_id: "notes.sync".into(),
            action_id: "run".into(),
            runner: runner.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            flags: HashMap::new(),
        }
    }

    struct Fixture {
        runner: CapabilityRunner,
        ctx: ExecutionContext,
        db: Db,
        responses: Arc<ResponseStore>,
        data_dir: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_path_buf();
        let work_dir = data_dir.join("work").join("notes.sync");
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::create_dir_all(data_dir.join("tools")).unwrap();

        let db = Db::in_memory().unwrap();
        let responses = Arc::new(ResponseStore::new());
        let runner = CapabilityRunner::new(
            data_dir.clone(),
            responses.clone(),
            TaskAuditStore::new(db.clone()),
        );
        let ctx = ExecutionContext {
            session_id: "S1".into(),
            user_id: "U1".into(),
            extension_id: "notes.sync".into(),
            work_dir,
            usage_doc: None,
            timeout: Duration::from_secs(10),
            env_whitelist: vec!["LANG".into()],
        };
        Fixture {
            runner,
            ctx,
            db,
            responses,
            data_dir,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_exec_system_tool() {
        let f = fixture();
        let result = f
            .runner
            .run(&route("exec.echo", &["hello", "kernel"]), &f.ctx)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "hello kernel");
    }

    #[tokio::test]
    async fn test_exec_audits() {
        let f = fixture();
        f.runner
            .run(&route("exec.echo", &["hi"]), &f.ctx)
            .await
            .unwrap();

        let rows = TaskAuditStore::new(f.db.clone())
            .for_task("cap:notes.sync:notes")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "capability_executed");
        assert_eq!(rows[0].1["success"], true);
        assert_eq!(rows[0].1["session"], "S1");
    }

    #[tokio::test]
    async fn test_unknown_tool_fails() {
        let f = fixture();
        let err = f
            .runner
            .run(&route("exec.definitely_not_installed", &[]), &f.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn test_tool_with_path_rejected() {
        let f = fixture();
        let err = f
            .runner
            .run(&route("exec../../bin/echo", &[]), &f.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_extension_tool_dir_preferred() {
        let f = fixture();
        // A marker script in the extension tools dir shadows nothing but
        // must resolve.
        let tool = f.data_dir.join("tools").join("marker");
        std::fs::write(&tool, "#!/bin/sh\necho from-tools\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let result = f.runner.run(&route("exec.marker", &[]), &f.ctx).await.unwrap();
        assert_eq!(result.stdout.trim(), "from-tools");
    }

    #[tokio::test]
    async fn test_work_dir_must_exist_under_data_dir() {
        let f = fixture();
        let mut ctx = f.ctx.clone();
        ctx.work_dir = PathBuf::from("/tmp");
        let err = f
            .runner
            .run(&route("exec.echo", &["x"]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_timeout_kills_subprocess() {
        let f = fixture();
        let mut ctx = f.ctx.clone();
        ctx.timeout = Duration::from_millis(100);
        let err = f
            .runner
            .run(&route("exec.sleep", &["5"]), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_analyze_response() {
        let f = fixture();
        f.responses.store("S1", "line one\nline two three");
        let result = f
            .runner
            .run(&route("analyze.response", &[]), &f.ctx)
            .await
            .unwrap();
        let summary: serde_json::Value = serde_json::from_str(&result.stdout).unwrap();
        assert_eq!(summary["lines"], 2);
        assert_eq!(summary["words"], 5);
    }

    #[tokio::test]
    async fn test_analyze_response_without_capture() {
        let f = fixture();
        let err = f
            .runner
            .run(&route("analyze.response", &[]), &f.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn test_analyze_schema() {
        let f = fixture();
        f.responses.store(
            "S1",
            r#"{"items": [{"id": 1, "name": "a"}], "total": 2, "ok": true}"#,
        );
        let result = f
            .runner
            .run(&route("analyze.schema", &[]), &f.ctx)
            .await
            .unwrap();
        let shape: serde_json::Value = serde_json::from_str(&result.stdout).unwrap();
        assert_eq!(shape["total"], "number");
        assert_eq!(shape["ok"], "boolean");
        assert_eq!(shape["items"][0]["id"], "number");
    }

    #[tokio::test]
    async fn test_unknown_runner() {
        let f = fixture();
        let err = f
            .runner
            .run(&route("summon.demons", &[]), &f.ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }
}
