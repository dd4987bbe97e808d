//! The install engine — a declarative step executor.
//!
//! Plans are authored by third parties; execution must not grant them code
//! execution on the host beyond the whitelisted steps under the runner
//! restrictions. The whole plan validates before step 0 runs. A failed
//! step halts the plan, skips the remainder, and maps to a closed error
//! code with a remediation hint.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info, warn};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::manifest::Permission;
use crate::plan::{Condition, InstallPlan, InstallStep};

/// Restricted PATH for plan-spawned shells.
const PLAN_SHELL_PATH: &str = "/usr/bin:/bin";

// ─────────────────────────────────────────────
// Events & outcome
// ─────────────────────────────────────────────

/// Emitted around every step; progress is integer percent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    StepStarted { id: String, index: usize, total: usize },
    StepFinished { id: String, progress: u8 },
    StepSkipped { id: String, progress: u8 },
    PlanFinished { success: bool, progress: u8 },
}

/// Final result of a plan run.
#[derive(Clone, Debug)]
pub struct InstallOutcome {
    pub success: bool,
    pub progress: u8,
    pub failed_step: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub hint: Option<String>,
}

impl InstallOutcome {
    fn ok() -> Self {
        InstallOutcome {
            success: true,
            progress: 100,
            failed_step: None,
            error_code: None,
            hint: None,
        }
    }

    fn failed(step: Option<String>, code: ErrorCode, progress: u8) -> Self {
        InstallOutcome {
            success: false,
            progress,
            failed_step: step,
            error_code: Some(code),
            hint: code.hint().map(str::to_string),
        }
    }
}

// ─────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────

/// Executes install and uninstall plans.
pub struct InstallEngine {
    max_download_bytes: u64,
    /// Extensions with a plan currently running.
    running: Mutex<HashSet<String>>,
}

impl InstallEngine {
    pub fn new(max_download_mib: u64) -> Self {
        InstallEngine {
            max_download_bytes: max_download_mib * 1024 * 1024,
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Run a plan's install steps.
    pub async fn run_install(
        &self,
        extension_id: &str,
        plan: &InstallPlan,
        work_dir: &Path,
        permissions: &[Permission],
        on_event: &mut dyn FnMut(&ProgressEvent),
    ) -> InstallOutcome {
        self.run_steps(extension_id, &plan.steps, plan, work_dir, permissions, on_event)
            .await
    }

    /// Run the plan's `uninstall.steps` block.
    pub async fn run_uninstall(
        &self,
        extension_id: &str,
        plan: &InstallPlan,
        work_dir: &Path,
        permissions: &[Permission],
        on_event: &mut dyn FnMut(&ProgressEvent),
    ) -> InstallOutcome {
        let steps = plan
            .uninstall
            .as_ref()
            .map(|u| u.steps.as_slice())
            .unwrap_or_default();
        self.run_steps(extension_id, steps, plan, work_dir, permissions, on_event)
            .await
    }

    async fn run_steps(
        &self,
        extension_id: &str,
        steps: &[InstallStep],
        plan: &InstallPlan,
        work_dir: &Path,
        permissions: &[Permission],
        on_event: &mut dyn FnMut(&ProgressEvent),
    ) -> InstallOutcome {
        // Whole-plan validation before the first step runs.
        if let Err(err) = plan.validate() {
            warn!(extension = %extension_id, error = %err, "plan rejected");
            return InstallOutcome::failed(None, ErrorCode::PlanInvalid, 0);
        }

        // One plan per extension at a time.
        {
            let mut running = match self.running.lock() {
                Ok(guard) => guard,
                Err(_) => return InstallOutcome::failed(None, ErrorCode::Unknown, 0),
            };
            if !running.insert(extension_id.to_string()) {
                return InstallOutcome::failed(None, ErrorCode::InstallInProgress, 0);
            }
        }

        let outcome = self
            .execute_steps(steps, work_dir, permissions, on_event)
            .await;

        if let Ok(mut running) = self.running.lock() {
            running.remove(extension_id);
        }
        outcome
    }

    async fn execute_steps(
        &self,
        steps: &[InstallStep],
        work_dir: &Path,
        permissions: &[Permission],
        on_event: &mut dyn FnMut(&ProgressEvent),
    ) -> InstallOutcome {
        if std::fs::create_dir_all(work_dir).is_err() {
            return InstallOutcome::failed(None, ErrorCode::Unknown, 0);
        }

        let total = steps.len();
        let mut vars: HashMap<String, String> = HashMap::new();
        let mut completed = 0usize;

        for (index, step) in steps.iter().enumerate() {
            on_event(&ProgressEvent::StepStarted {
                id: step.id.clone(),
                index,
                total,
            });

            // `when` guard: parse errors halt; a false guard skips the step
            // and still counts toward progress.
            if let Some(guard) = &step.when {
                let applies = Condition::parse(guard).and_then(|c| c.eval(&vars));
                match applies {
                    Ok(true) => {}
                    Ok(false) => {
                        completed += 1;
                        on_event(&ProgressEvent::StepSkipped {
                            id: step.id.clone(),
                            progress: percent(completed, total),
                        });
                        continue;
                    }
                    Err(err) => {
                        warn!(step = %step.id, error = %err, "condition error");
                        let progress = percent(completed, total);
                        on_event(&ProgressEvent::PlanFinished { success: false, progress });
                        return InstallOutcome::failed(
                            Some(step.id.clone()),
                            ErrorCode::ConditionError,
                            progress,
                        );
                    }
                }
            }

            // Permission gate.
            if let Some(missing) = step
                .requires_permissions
                .iter()
                .find(|p| !permissions.contains(p))
            {
                warn!(step = %step.id, permission = missing.as_str(), "permission missing");
                let progress = percent(completed, total);
                on_event(&ProgressEvent::PlanFinished { success: false, progress });
                return InstallOutcome::failed(
                    Some(step.id.clone()),
                    ErrorCode::PermissionDenied,
                    progress,
                );
            }

            let execution =
                tokio::time::timeout(step.timeout(), self.execute_step(step, work_dir, &mut vars))
                    .await;
            let result = match execution {
                Ok(result) => result,
                Err(_) => Err(KernelError::new(
                    ErrorCode::Timeout,
                    format!("step {} timed out", step.id),
                )),
            };

            match result {
                Ok(()) => {
                    completed += 1;
                    debug!(step = %step.id, "step finished");
                    on_event(&ProgressEvent::StepFinished {
                        id: step.id.clone(),
                        progress: percent(completed, total),
                    });
                }
                Err(err) => {
                    warn!(step = %step.id, code = %err.code, "step failed, halting plan");
                    let progress = percent(completed, total);
                    on_event(&ProgressEvent::PlanFinished { success: false, progress });
                    return InstallOutcome::failed(Some(step.id.clone()), err.code, progress);
                }
            }
        }

        info!(steps = total, "plan completed");
        on_event(&ProgressEvent::PlanFinished {
            success: true,
            progress: 100,
        });
        InstallOutcome::ok()
    }

    async fn execute_step(
        &self,
        step: &InstallStep,
        work_dir: &Path,
        vars: &mut HashMap<String, String>,
    ) -> KernelResult<()> {
        match step.step_type.as_str() {
            "detect.platform" => {
                let (os, arch) = detect_platform();
                vars.insert("platform.os".into(), os);
                vars.insert("platform.arch".into(), arch);
                Ok(())
            }
            "download.http" => self.download_http(step, work_dir).await,
            "extract.zip" => extract_zip_step(step, work_dir),
            "exec.shell" => exec_shell(step, work_dir, "sh", "-c").await,
            "exec.powershell" => exec_shell(step, work_dir, "powershell", "-Command").await,
            "verify.command_exists" => verify_command_exists(step),
            "verify.http" => verify_http(step).await,
            "write.config" => write_config(step, work_dir),
            // Unreachable after validation; fail closed anyway.
            other => Err(KernelError::new(
                ErrorCode::PlanInvalid,
                format!("unknown step type {other:?}"),
            )),
        }
    }

    async fn download_http(&self, step: &InstallStep, work_dir: &Path) -> KernelResult<()> {
        let url = step.url.as_deref().unwrap_or_default();
        let target = step.target.as_deref().unwrap_or_default();

        // Redirects may not change scheme (https → http downgrade).
        let policy = reqwest::redirect::Policy::custom(|attempt| {
            let same_scheme = attempt
                .previous()
                .last()
                .map(|prev| prev.scheme() == attempt.url().scheme())
                .unwrap_or(true);
            if !same_scheme {
                attempt.error("redirect changed scheme")
            } else if attempt.previous().len() > 5 {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        });
        let client = reqwest::Client::builder()
            .redirect(policy)
            .build()
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;
        if !response.status().is_success() {
            return Err(KernelError::new(
                ErrorCode::DownloadFailed,
                format!("download returned {}", response.status()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;
        if bytes.len() as u64 > self.max_download_bytes {
            return Err(KernelError::new(
                ErrorCode::DownloadFailed,
                format!("artifact exceeds the {} byte cap", self.max_download_bytes),
            ));
        }

        if let Some(expected) = &step.sha256 {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(KernelError::new(
                    ErrorCode::VerificationFailed,
                    "artifact sha256 does not match the declared digest",
                ));
            }
        }

        std::fs::write(work_dir.join(target), &bytes)
            .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;
        Ok(())
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((completed * 100) / total) as u8
}

fn detect_platform() -> (String, String) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

fn extract_zip_step(step: &InstallStep, work_dir: &Path) -> KernelResult<()> {
    let source = work_dir.join(step.source.as_deref().unwrap_or_default());
    let target = work_dir.join(step.target.as_deref().unwrap_or_default());

    let file = std::fs::File::open(&source)
        .map_err(|e| KernelError::new(ErrorCode::VerificationFailed, format!("open zip: {e}")))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| KernelError::new(ErrorCode::VerificationFailed, format!("bad zip: {e}")))?;

    std::fs::create_dir_all(&target)
        .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| KernelError::new(ErrorCode::VerificationFailed, e.to_string()))?;
        let raw_name = entry.name().to_string();

        if raw_name.contains("..") || raw_name.starts_with('/') || entry.enclosed_name().is_none() {
            return Err(KernelError::new(
                ErrorCode::PermissionDenied,
                format!("zip entry {raw_name:?} escapes the work dir"),
            ));
        }
        if let Some(mode) = entry.unix_mode() {
            if mode & 0o170000 == 0o120000 {
                return Err(KernelError::new(
                    ErrorCode::PermissionDenied,
                    format!("zip entry {raw_name:?} is a symlink"),
                ));
            }
        }

        let out_path = target.join(entry.enclosed_name().unwrap_or_default());
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;
        }
        let mut content = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut content)
            .map_err(|e| KernelError::new(ErrorCode::VerificationFailed, e.to_string()))?;
        std::fs::write(&out_path, content)
            .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;
    }
    Ok(())
}

async fn exec_shell(
    step: &InstallStep,
    work_dir: &Path,
    shell: &str,
    flag: &str,
) -> KernelResult<()> {
    let command = step.command.as_deref().unwrap_or_default();
    let output = Command::new(shell)
        .arg(flag)
        .arg(command)
        .current_dir(work_dir)
        .env_clear()
        .env("PATH", PLAN_SHELL_PATH)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| KernelError::new(ErrorCode::CommandFailed, format!("spawn {shell}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(KernelError::new(
            ErrorCode::CommandFailed,
            format!(
                "command exited {}: {}",
                output.status.code().unwrap_or(-1),
                agentos_core::utils::truncate_string(&stderr, 200)
            ),
        ));
    }
    Ok(())
}

/// Probe the restricted PATH for a command without executing it.
fn verify_command_exists(step: &InstallStep) -> KernelResult<()> {
    let command = step.command.as_deref().unwrap_or_default();
    let found = PLAN_SHELL_PATH
        .split(':')
        .map(PathBuf::from)
        .any(|dir| dir.join(command).is_file());
    if found {
        Ok(())
    } else {
        Err(KernelError::new(
            ErrorCode::VerificationFailed,
            format!("command {command:?} not found on PATH"),
        ))
    }
}

async fn verify_http(step: &InstallStep) -> KernelResult<()> {
    let url = step.url.as_deref().unwrap_or_default();
    let response = reqwest::get(url)
        .await
        .map_err(|e| KernelError::new(ErrorCode::VerificationFailed, e.to_string()))?;
    if !response.status().is_success() {
        return Err(KernelError::new(
            ErrorCode::VerificationFailed,
            format!("probe returned {}", response.status()),
        ));
    }
    Ok(())
}

/// Append a key/value to `work_dir/config.json`.
fn write_config(step: &InstallStep, work_dir: &Path) -> KernelResult<()> {
    let path = work_dir.join("config.json");
    let mut config: serde_json::Value = match std::fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content)
            .unwrap_or_else(|_| serde_json::json!({})),
        Err(_) => serde_json::json!({}),
    };
    if let Some(obj) = config.as_object_mut() {
        obj.insert(
            step.key.clone().unwrap_or_default(),
            serde_json::Value::String(step.value.clone().unwrap_or_default()),
        );
    }
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap_or_default())
        .map_err(|e| KernelError::new(ErrorCode::Unknown, e.to_string()))?;
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::fixtures::happy_plan_yaml;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn run(
        plan: &InstallPlan,
        permissions: &[Permission],
    ) -> (InstallOutcome, Vec<ProgressEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = InstallEngine::new(10);
        let mut events = Vec::new();
        let outcome = engine
            .run_install("notes.sync", plan, dir.path(), permissions, &mut |e| {
                events.push(e.clone())
            })
            .await;
        (outcome, events, dir)
    }

    #[tokio::test]
    async fn test_happy_plan_reaches_100() {
        let plan = InstallPlan::parse(happy_plan_yaml()).unwrap();
        let (outcome, events, dir) = run(&plan, &[]).await;

        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.progress, 100);

        // Side effects landed in the work dir.
        let marker = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(marker.trim(), "hi");
        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("config.json")).unwrap())
                .unwrap();
        assert_eq!(config["k"], "v");

        // Start/finish events for every step plus the plan event.
        let starts = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::StepStarted { .. }))
            .count();
        assert_eq!(starts, 4);
        assert!(matches!(
            events.last().unwrap(),
            ProgressEvent::PlanFinished { success: true, progress: 100 }
        ));
    }

    #[tokio::test]
    async fn test_unknown_step_type_fails_before_step_zero() {
        let yaml = r#"
steps:
  - id: touch
    type: exec.shell
    command: "echo ran > ran.txt"
  - id: evil
    type: exec.native
    command: "whatever"
"#;
        // Parsing rejects it; a hand-built plan hits the engine's own
        // validation instead. Either way nothing runs.
        assert!(InstallPlan::parse(yaml).is_err());

        let plan = InstallPlan {
            steps: vec![
                InstallStep {
                    id: "touch".into(),
                    step_type: "exec.shell".into(),
                    command: Some("echo ran > ran.txt".into()),
                    ..Default::default()
                },
                InstallStep {
                    id: "evil".into(),
                    step_type: "exec.native".into(),
                    command: Some("whatever".into()),
                    ..Default::default()
                },
            ],
            uninstall: None,
        };
        let (outcome, events, dir) = run(&plan, &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code, Some(ErrorCode::PlanInvalid));
        assert_eq!(outcome.progress, 0);
        // Step 0 never ran.
        assert!(events.is_empty());
        assert!(!dir.path().join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_platform_guard_skips_without_failing() {
        let yaml = r#"
steps:
  - id: detect
    type: detect.platform
  - id: never-here
    type: exec.shell
    command: "echo windows > win.txt"
    when: platform.os == win32
  - id: always
    type: exec.shell
    command: "echo yes > yes.txt"
"#;
        let plan = InstallPlan::parse(yaml).unwrap();
        let (outcome, events, dir) = run(&plan, &[]).await;

        assert!(outcome.success);
        assert_eq!(outcome.progress, 100);
        assert!(!dir.path().join("win.txt").exists());
        assert!(dir.path().join("yes.txt").exists());
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::StepSkipped { id, .. } if id == "never-here")));
    }

    #[tokio::test]
    async fn test_matching_platform_guard_executes() {
        let (os, _) = detect_platform();
        let yaml = format!(
            r#"
steps:
  - id: detect
    type: detect.platform
  - id: here
    type: exec.shell
    command: "echo native > native.txt"
    when: platform.os == {os}
"#
        );
        let plan = InstallPlan::parse(&yaml).unwrap();
        let (outcome, _, dir) = run(&plan, &[]).await;
        assert!(outcome.success);
        assert!(dir.path().join("native.txt").exists());
    }

    #[tokio::test]
    async fn test_condition_error_halts() {
        let yaml = r#"
steps:
  - id: guarded
    type: exec.shell
    command: "echo x"
    when: platform.os == linux
"#;
        // detect.platform never ran, so platform.os is undefined.
        let plan = InstallPlan::parse(yaml).unwrap();
        let (outcome, _, _) = run(&plan, &[]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_code, Some(ErrorCode::ConditionError));
        assert_eq!(outcome.failed_step.as_deref(), Some("guarded"));
    }

    #[tokio::test]
    async fn test_failed_step_halts_and_skips_rest() {
        let yaml = r#"
steps:
  - id: boom
    type: exec.shell
    command: "exit 3"
  - id: after
    type: exec.shell
    command: "echo after > after.txt"
"#;
        let plan = InstallPlan::parse(yaml).unwrap();
        let (outcome, _, dir) = run(&plan, &[]).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failed_step.as_deref(), Some("boom"));
        assert_eq!(outcome.error_code, Some(ErrorCode::CommandFailed));
        assert_eq!(outcome.progress, 0);
        assert!(!dir.path().join("after.txt").exists());
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let yaml = r#"
steps:
  - id: slow
    type: exec.shell
    command: "sleep 10"
    timeout_seconds: 1
"#;
        let plan = InstallPlan::parse(yaml).unwrap();
        let (outcome, _, _) = run(&plan, &[]).await;
        assert_eq!(outcome.error_code, Some(ErrorCode::Timeout));
        assert!(outcome.hint.is_some());
    }

    #[tokio::test]
    async fn test_permission_gate() {
        let yaml = r#"
steps:
  - id: needs-net
    type: exec.shell
    command: "echo fetch"
    requires_permissions: ["network"]
"#;
        let plan = InstallPlan::parse(yaml).unwrap();

        let (outcome, _, _) = run(&plan, &[]).await;
        assert_eq!(outcome.error_code, Some(ErrorCode::PermissionDenied));

        let (outcome, _, _) = run(&plan, &[Permission::Network]).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_concurrent_install_rejected() {
        let engine = std::sync::Arc::new(InstallEngine::new(10));
        let plan = InstallPlan {
            steps: vec![InstallStep {
                id: "slow".into(),
                step_type: "exec.shell".into(),
                command: Some("sleep 1".into()),
                ..Default::default()
            }],
            uninstall: None,
        };
        let dir = tempfile::tempdir().unwrap();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let first = {
                    let engine = engine.clone();
                    let plan = plan.clone();
                    let work = dir.path().to_path_buf();
                    tokio::task::spawn_local(async move {
                        engine
                            .run_install("notes.sync", &plan, &work, &[], &mut |_| {})
                            .await
                    })
                };
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;

                let second = engine
                    .run_install("notes.sync", &plan, dir.path(), &[], &mut |_| {})
                    .await;
                assert_eq!(second.error_code, Some(ErrorCode::InstallInProgress));

                let first = first.await.unwrap();
                assert!(first.success);

                // After completion the extension can install again.
                let third = engine
                    .run_install("notes.sync", &plan, dir.path(), &[], &mut |_| {})
                    .await;
                assert!(third.success);
            })
            .await;
    }

    #[tokio::test]
    async fn test_uninstall_uses_uninstall_block() {
        let plan = InstallPlan::parse(happy_plan_yaml()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "hi").unwrap();

        let engine = InstallEngine::new(10);
        let outcome = engine
            .run_uninstall("notes.sync", &plan, dir.path(), &[], &mut |_| {})
            .await;
        assert!(outcome.success);
        assert!(!dir.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn test_download_sha_verification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tool.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tool-bytes".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = InstallEngine::new(10);
        let good_sha = hex::encode(Sha256::digest(b"tool-bytes"));

        let mut step = InstallStep {
            id: "get".into(),
            step_type: "download.http".into(),
            url: Some(format!("{}/tool.bin", server.uri())),
            target: Some("tool.bin".into()),
            sha256: Some(good_sha),
            ..Default::default()
        };
        let mut vars = HashMap::new();
        engine
            .execute_step(&step, dir.path(), &mut vars)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("tool.bin")).unwrap(),
            b"tool-bytes"
        );

        step.sha256 = Some("deadbeef".repeat(8));
        let err = engine
            .execute_step(&step, dir.path(), &mut vars)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationFailed);
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let engine = InstallEngine::new(10);
        let step = InstallStep {
            id: "get".into(),
            step_type: "download.http".into(),
            url: Some(format!("{}/missing", server.uri())),
            target: Some("out.bin".into()),
            ..Default::default()
        };
        let err = engine
            .execute_step(&step, dir.path(), &mut HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DownloadFailed);
    }

    #[tokio::test]
    async fn test_verify_http_step() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let engine = InstallEngine::new(10);
        let dir = tempfile::tempdir().unwrap();
        let step = InstallStep {
            id: "probe".into(),
            step_type: "verify.http".into(),
            url: Some(format!("{}/health", server.uri())),
            ..Default::default()
        };
        engine
            .execute_step(&step, dir.path(), &mut HashMap::new())
            .await
            .unwrap();

        let bad = InstallStep {
            url: Some(format!("{}/nope", server.uri())),
            ..step
        };
        let err = engine
            .execute_step(&bad, dir.path(), &mut HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationFailed);
    }

    #[tokio::test]
    async fn test_extract_zip_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        crate::package::fixtures::build_zip(
            &dir.path().join("evil.zip"),
            &[("../escape.txt", "gotcha")],
        );

        let engine = InstallEngine::new(10);
        let step = InstallStep {
            id: "unzip".into(),
            step_type: "extract.zip".into(),
            source: Some("evil.zip".into()),
            target: Some("out".into()),
            ..Default::default()
        };
        let err = engine
            .execute_step(&step, dir.path(), &mut HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_extract_zip_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        crate::package::fixtures::build_zip(
            &dir.path().join("bundle.zip"),
            &[("inner/file.txt", "payload")],
        );

        let engine = InstallEngine::new(10);
        let step = InstallStep {
            id: "unzip".into(),
            step_type: "extract.zip".into(),
            source: Some("bundle.zip".into()),
            target: Some("out".into()),
            ..Default::default()
        };
        engine
            .execute_step(&step, dir.path(), &mut HashMap::new())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/inner/file.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_detect_platform_values() {
        let (os, arch) = detect_platform();
        assert!(["linux", "darwin", "win32"].contains(&os.as_str()), "{os}");
        assert!(["x64", "arm64"].contains(&arch.as_str()) || !arch.is_empty());
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(percent(0, 4), 0);
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(4, 4), 100);
        assert_eq!(percent(0, 0), 100);
    }
}
