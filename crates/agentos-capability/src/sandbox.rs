//! Sandbox — container-backed isolation for HIGH/CRITICAL-risk tools.
//!
//! Deny-by-default is the red line: when the container runtime is
//! unreachable, high-risk invocations are rejected with exit code 451 and
//! no process is spawned. There is no unsandboxed fallback.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, warn};

use agentos_core::config::schema::SandboxConfig;
use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::runner::RunResult;

/// Exit code reported when execution is blocked by sandbox unavailability.
pub const EXIT_SANDBOX_BLOCKED: i32 = 451;

/// Where extension code is mounted inside the container.
const EXTENSION_MOUNT: &str = "/extension";

/// Health snapshot returned by [`Sandbox::health_check`].
#[derive(Clone, Debug)]
pub struct SandboxHealth {
    pub status: String,
    pub details: serde_json::Value,
}

/// The sandbox contract.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Whether the container runtime is reachable.
    async fn is_available(&self) -> bool;

    /// Run a command inside the isolation profile.
    async fn execute(&self, command: &[String], timeout: Duration) -> KernelResult<RunResult>;

    async fn health_check(&self) -> SandboxHealth;
}

// ─────────────────────────────────────────────
// Container sandbox
// ─────────────────────────────────────────────

/// Shells out to a docker-compatible CLI with the hardening profile:
/// no network, capped cpu/memory, read-only rootfs, noexec tmpfs, all
/// capabilities dropped, no-new-privileges, non-root UID.
pub struct ContainerSandbox {
    config: SandboxConfig,
    /// Host directory holding the extension's code, mounted read-only.
    extension_root: PathBuf,
}

impl ContainerSandbox {
    pub fn new(config: SandboxConfig, extension_root: PathBuf) -> Self {
        ContainerSandbox {
            config,
            extension_root,
        }
    }

    fn profile_args(&self) -> Vec<String> {
        vec![
            "run".into(),
            "--rm".into(),
            "--network".into(),
            "none".into(),
            format!("--cpus={}", self.config.cpus),
            format!("--memory={}m", self.config.memory_mib),
            "--read-only".into(),
            format!(
                "--tmpfs=/tmp:rw,noexec,nosuid,size={}m",
                self.config.tmpfs_mib
            ),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--user".into(),
            "65534:65534".into(),
            "-v".into(),
            format!("{}:{EXTENSION_MOUNT}:ro", self.extension_root.display()),
            self.config.image.clone(),
        ]
    }
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    async fn is_available(&self) -> bool {
        let probe = Command::new(&self.config.runtime_bin)
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        matches!(
            tokio::time::timeout(Duration::from_secs(5), probe).await,
            Ok(Ok(status)) if status.success()
        )
    }

    async fn execute(&self, command: &[String], timeout: Duration) -> KernelResult<RunResult> {
        if !self.is_available().await {
            return Err(KernelError::new(
                ErrorCode::SandboxUnavailable,
                "container runtime unreachable",
            ));
        }

        let mut args = self.profile_args();
        args.extend(command.iter().cloned());
        debug!(runtime = %self.config.runtime_bin, "sandbox execute");

        let started = Instant::now();
        let child = Command::new(&self.config.runtime_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| KernelError::new(ErrorCode::SandboxUnavailable, e.to_string()))?;

        let wall_timeout = timeout.min(Duration::from_secs(self.config.timeout_seconds));
        let output = match tokio::time::timeout(wall_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(KernelError::new(ErrorCode::CommandFailed, e.to_string())),
            Err(_) => {
                warn!("sandbox container exceeded wall timeout, tearing down");
                return Err(KernelError::new(
                    ErrorCode::Timeout,
                    format!("sandboxed execution exceeded {}s", wall_timeout.as_secs()),
                ));
            }
        };

        Ok(RunResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            wall_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn health_check(&self) -> SandboxHealth {
        if self.is_available().await {
            SandboxHealth {
                status: "ok".into(),
                details: json!({
                    "runtime": self.config.runtime_bin,
                    "image": self.config.image,
                }),
            }
        } else {
            SandboxHealth {
                status: "unreachable".into(),
                details: json!({ "runtime": self.config.runtime_bin }),
            }
        }
    }
}

// ─────────────────────────────────────────────
// Test double
// ─────────────────────────────────────────────
