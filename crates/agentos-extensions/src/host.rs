//! Extension host — installs packages and exposes installed extensions to
//! the capability plane.
//!
//! Implements [`ToolSource`] (enabled extensions become `ext:` tool
//! descriptors with inferred risk) and [`ToolExecutor`] (dispatch through
//! the capability runner).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use agentos_capability::descriptor::{
    infer_risk, infer_side_effects, RiskLevel, ToolDescriptor, ToolInvocation, ToolSourceType,
};
use agentos_capability::registry::ToolSource;
use agentos_capability::router::ToolExecutor;
use agentos_capability::runner::{CapabilityRoute, CapabilityRunner, ExecutionContext};
use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::engine::{InstallEngine, InstallOutcome, ProgressEvent};
use crate::manifest::ExtensionManifest;
use crate::package::extract_package;
use crate::plan::InstallPlan;
use crate::store::{ExtensionStatus, ExtensionStore};

/// Default per-capability execution timeout.
const CAPABILITY_TIMEOUT: Duration = Duration::from_secs(60);

/// The host owning extension installs and execution glue.
pub struct ExtensionHost {
    store: ExtensionStore,
    engine: Arc<InstallEngine>,
    runner: Arc<CapabilityRunner>,
    data_dir: PathBuf,
}

impl ExtensionHost {
    pub fn new(
        store: ExtensionStore,
        engine: Arc<InstallEngine>,
        runner: Arc<CapabilityRunner>,
        data_dir: PathBuf,
    ) -> Self {
        ExtensionHost {
            store,
            engine,
            runner,
            data_dir,
        }
    }

    fn extensions_dir(&self) -> PathBuf {
        self.data_dir.join("extensions")
    }

    fn work_dir(&self, extension_id: &str) -> PathBuf {
        self.data_dir
            .join("work")
            .join(agentos_core::utils::safe_filename(extension_id))
    }

    /// Install an extension from a local package zip.
    ///
    /// Flow: validate + extract the package, parse manifest and plan,
    /// run the install plan with progress persisted, record the final
    /// status. Returns the extension id and the engine outcome.
    pub async fn install_package(
        &self,
        package_path: &std::path::Path,
        source_url: Option<&str>,
        expected_sha256: Option<&str>,
    ) -> KernelResult<(String, InstallOutcome)> {
        let package_bytes = std::fs::read(package_path)
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        let package_sha = agentos_core::utils::sha256_hex(&package_bytes);
        if let Some(expected) = expected_sha256 {
            if !package_sha.eq_ignore_ascii_case(expected) {
                return Err(KernelError::new(
                    ErrorCode::VerificationFailed,
                    "package sha256 does not match the expected digest",
                ));
            }
        }

        let root = extract_package(package_path, &self.extensions_dir())?;
        let manifest_content = std::fs::read_to_string(root.join("manifest.json"))
            .map_err(|e| KernelError::new(ErrorCode::ManifestInvalid, e.to_string()))?;
        let manifest = ExtensionManifest::parse(&manifest_content)?;

        let (os, _) = current_platform();
        if !manifest.supports_platform(&os) {
            return Err(KernelError::new(
                ErrorCode::PlatformNotSupported,
                format!("{} does not support {os}", manifest.id),
            ));
        }

        let plan_content = std::fs::read_to_string(root.join(&manifest.install.plan))
            .map_err(|e| KernelError::new(ErrorCode::PlanInvalid, e.to_string()))?;
        let plan = InstallPlan::parse(&plan_content)?;

        self.store.upsert(
            &manifest,
            ExtensionStatus::Installing,
            Some(&package_sha),
            Some("package"),
            source_url,
        )?;
        let install_id = self.store.begin_install(&manifest.id)?;

        let work_dir = self.work_dir(&manifest.id);
        let store = self.store.clone();
        let install_id_for_events = install_id.clone();
        let mut last_progress: u8 = 0;
        let mut on_event = move |event: &ProgressEvent| {
            let result = match event {
                ProgressEvent::StepStarted { id, .. } => {
                    store.update_install(&install_id_for_events, last_progress, Some(id))
                }
                ProgressEvent::StepFinished { id, progress }
                | ProgressEvent::StepSkipped { id, progress } => {
                    last_progress = *progress;
                    store.update_install(&install_id_for_events, *progress, Some(id))
                }
                ProgressEvent::PlanFinished { .. } => Ok(()),
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to persist install progress");
            }
        };

        let outcome = self
            .engine
            .run_install(
                &manifest.id,
                &plan,
                &work_dir,
                &manifest.permissions_required,
                &mut on_event,
            )
            .await;

        self.store.finish_install(
            &install_id,
            outcome.success,
            outcome.progress,
            outcome.error_code.map(|c| c.as_str()),
        )?;
        self.store.set_status(
            &manifest.id,
            if outcome.success {
                ExtensionStatus::Installed
            } else {
                ExtensionStatus::Failed
            },
        )?;

        if outcome.success {
            info!(extension = %manifest.id, "extension installed");
        } else {
            warn!(
                extension = %manifest.id,
                step = outcome.failed_step.as_deref().unwrap_or("-"),
                code = outcome.error_code.map(|c| c.as_str()).unwrap_or("-"),
                "extension install failed"
            );
        }
        Ok((manifest.id.clone(), outcome))
    }

    /// Uninstall: run the plan's uninstall block, disable, mark removed.
    pub async fn uninstall(&self, extension_id: &str) -> KernelResult<InstallOutcome> {
        let record = self.store.get(extension_id)?.ok_or_else(|| {
            KernelError::new(
                ErrorCode::ConfigInvalid,
                format!("unknown extension {extension_id}"),
            )
        })?;

        let root = self
            .extensions_dir()
            .join(extension_root_name(&record.manifest.id, &self.extensions_dir()));
        let plan = match std::fs::read_to_string(root.join(&record.manifest.install.plan)) {
            Ok(content) => InstallPlan::parse(&content)?,
            // Package gone from disk: nothing to unwind.
            Err(_) => InstallPlan::default(),
        };

        let outcome = self
            .engine
            .run_uninstall(
                extension_id,
                &plan,
                &self.work_dir(extension_id),
                &record.manifest.permissions_required,
                &mut |_| {},
            )
            .await;

        let _ = self.store.set_enabled(extension_id, false);
        self.store
            .set_status(extension_id, ExtensionStatus::Uninstalled)?;
        info!(extension = %extension_id, "extension uninstalled");
        Ok(outcome)
    }

    pub fn store(&self) -> &ExtensionStore {
        &self.store
    }
}

/// Find the extracted directory for an extension id. Packages use a free
/// top-level name, so fall back to scanning for a matching manifest.
fn extension_root_name(extension_id: &str, extensions_dir: &std::path::Path) -> String {
    if let Ok(entries) = std::fs::read_dir(extensions_dir) {
        for entry in entries.flatten() {
            let manifest_path = entry.path().join("manifest.json");
            if let Ok(content) = std::fs::read_to_string(&manifest_path) {
                if let Ok(manifest) = ExtensionManifest::parse(&content) {
                    if manifest.id == extension_id {
                        return entry.file_name().to_string_lossy().into_owned();
                    }
                }
            }
        }
    }
    extension_id.to_string()
}

fn current_platform() -> (String, String) {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    (os.to_string(), std::env::consts::ARCH.to_string())
}

// ─────────────────────────────────────────────
// Capability plane glue
// ─────────────────────────────────────────────

#[async_trait]
impl ToolSource for ExtensionHost {
    fn source_kind(&self) -> &'static str {
        "ext"
    }

    fn source_name(&self) -> String {
        "extensions".to_string()
    }

    // One source serves every installed extension.
    fn retention_prefix(&self) -> String {
        "ext:".to_string()
    }

    async fn list_tools(&self) -> KernelResult<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        for record in self.store.enabled()? {
            let permissions = record.manifest.permission_names();
            for capability in &record.manifest.capabilities {
                let side_effects = infer_side_effects(&permissions, &capability.command);
                let declared = capability.risk_level.as_deref().and_then(parse_risk);
                let risk = infer_risk(
                    &capability.command,
                    &capability.description,
                    &side_effects,
                    declared,
                );
                tools.push(ToolDescriptor {
                    tool_id: format!("ext:{}:{}", record.manifest.id, capability.command),
                    name: capability.command.clone(),
                    description: capability.description.clone(),
                    input_schema: capability.input_schema.clone(),
                    output_schema: serde_json::Value::Null,
                    risk_level: risk,
                    side_effect_tags: side_effects,
                    source_type: ToolSourceType::Extension,
                    source_id: record.manifest.id.clone(),
                    enabled: true,
                });
            }
        }
        Ok(tools)
    }
}

#[async_trait]
impl ToolExecutor for ExtensionHost {
    async fn execute(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ToolInvocation,
    ) -> KernelResult<serde_json::Value> {
        let record = self.store.get(&descriptor.source_id)?.ok_or_else(|| {
            KernelError::new(
                ErrorCode::UnknownTool,
                format!("extension {} is not installed", descriptor.source_id),
            )
        })?;
        let capability = record
            .manifest
            .capabilities
            .iter()
            .find(|c| c.command == descriptor.name)
            .ok_or_else(|| {
                KernelError::new(
                    ErrorCode::UnknownTool,
                    format!("no capability {:?} in {}", descriptor.name, descriptor.source_id),
                )
            })?;

        let work_dir = self.work_dir(&descriptor.source_id);
        std::fs::create_dir_all(&work_dir)
            .map_err(|e| KernelError::new(ErrorCode::PermissionDenied, e.to_string()))?;

        let route = CapabilityRoute {
            command_name: capability.command.clone(),
            extension_id: descriptor.source_id.clone(),
            action_id: capability.id.clone(),
            runner: capability.runner.clone(),
            args: vec![invocation.inputs.to_string()],
            flags: Default::default(),
        };
        let ctx = ExecutionContext {
            session_id: invocation.project_id.clone(),
            user_id: invocation.actor.clone(),
            extension_id: descriptor.source_id.clone(),
            work_dir,
            usage_doc: None,
            timeout: CAPABILITY_TIMEOUT,
            env_whitelist: Vec::new(),
        };

        let result = self.runner.run(&route, &ctx).await?;
        if result.exit_code != 0 {
            return Err(KernelError::new(
                ErrorCode::CommandFailed,
                format!("capability exited {}", result.exit_code),
            ));
        }
        Ok(json!({
            "stdout": result.stdout,
            "exit_code": result.exit_code,
            "wall_time_ms": result.wall_time_ms,
        }))
    }
}

fn parse_risk(s: &str) -> Option<RiskLevel> {
    match s.to_ascii_uppercase().as_str() {
        "LOW" => Some(RiskLevel::Low),
        "MED" | "MEDIUM" => Some(RiskLevel::Med),
        "HIGH" => Some(RiskLevel::High),
        "CRITICAL" => Some(RiskLevel::Critical),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::fixtures::{build_zip, valid_entries};
    use agentos_capability::response_store::ResponseStore;
    use agentos_core::store::{Db, TaskAuditStore};

    struct Fixture {
        host: ExtensionHost,
        package: PathBuf,
        data_dir: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();

        let package = dir.path().join("notes-sync.zip");
        let entries = valid_entries();
        let borrowed: Vec<(&str, &str)> =
            entries.iter().map(|(n, c)| (*n, c.as_str())).collect();
        build_zip(&package, &borrowed);

        let db = Db::in_memory().unwrap();
        let host = ExtensionHost::new(
            ExtensionStore::new(db.clone()),
            Arc::new(InstallEngine::new(10)),
            Arc::new(CapabilityRunner::new(
                data_dir.clone(),
                Arc::new(ResponseStore::new()),
                TaskAuditStore::new(db),
            )),
            data_dir.clone(),
        );
        Fixture {
            host,
            package,
            data_dir,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_install_happy_path() {
        let f = fixture();
        let (extension_id, outcome) =
            f.host.install_package(&f.package, None, None).await.unwrap();

        assert_eq!(extension_id, "notes.sync");
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(outcome.progress, 100);

        // Plan side effects landed in the work dir.
        let work = f.data_dir.join("work").join("notes.sync");
        assert_eq!(
            std::fs::read_to_string(work.join("marker.txt")).unwrap().trim(),
            "hi"
        );
        let config: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(work.join("config.json")).unwrap())
                .unwrap();
        assert_eq!(config["k"], "v");

        // Store reflects the install.
        let record = f.host.store().get("notes.sync").unwrap().unwrap();
        assert_eq!(record.status, ExtensionStatus::Installed);
        assert!(record.sha256.is_some());
    }

    #[tokio::test]
    async fn test_install_sha_mismatch() {
        let f = fixture();
        let err = f
            .host
            .install_package(&f.package, None, Some("0000"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::VerificationFailed);
    }

    #[tokio::test]
    async fn test_failed_plan_marks_failed() {
        let f = fixture();
        let package = f.data_dir.join("broken.zip");
        let manifest = crate::manifest::fixtures::manifest_json().to_string();
        build_zip(
            &package,
            &[
                ("notes-sync/manifest.json", manifest.as_str()),
                (
                    "notes-sync/install/plan.yaml",
                    "steps:\n  - id: boom\n    type: exec.shell\n    command: \"exit 7\"\n",
                ),
            ],
        );

        let (extension_id, outcome) =
            f.host.install_package(&package, None, None).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_code, Some(ErrorCode::CommandFailed));

        let record = f.host.store().get(&extension_id).unwrap().unwrap();
        assert_eq!(record.status, ExtensionStatus::Failed);
    }

    #[tokio::test]
    async fn test_enabled_extensions_expose_tools() {
        let f = fixture();
        f.host.install_package(&f.package, None, None).await.unwrap();

        // Not enabled yet: no tools.
        assert!(f.host.list_tools().await.unwrap().is_empty());

        f.host.store().set_enabled("notes.sync", true).unwrap();
        let tools = f.host.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);

        let pull = tools
            .iter()
            .find(|t| t.tool_id == "ext:notes.sync:pull")
            .unwrap();
        assert_eq!(pull.source_type, ToolSourceType::Extension);
        // network + filesystem.write permissions feed side effects.
        assert!(pull.side_effect_tags.contains("network.http"));
        assert!(pull.side_effect_tags.contains("fs.write"));
        pull.validate().unwrap();
    }

    #[tokio::test]
    async fn test_execute_capability_via_runner() {
        let f = fixture();
        f.host.install_package(&f.package, None, None).await.unwrap();
        f.host.store().set_enabled("notes.sync", true).unwrap();

        // The summary capability runs analyze.response over the session's
        // captured output; without one it fails cleanly.
        let tools = f.host.list_tools().await.unwrap();
        let summary = tools
            .iter()
            .find(|t| t.tool_id == "ext:notes.sync:notes")
            .unwrap();
        let invocation = ToolInvocation::execution(summary.tool_id.clone(), json!({}));
        let err = f.host.execute(summary, &invocation).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn test_uninstall() {
        let f = fixture();
        f.host.install_package(&f.package, None, None).await.unwrap();
        f.host.store().set_enabled("notes.sync", true).unwrap();

        let work = f.data_dir.join("work").join("notes.sync");
        assert!(work.join("marker.txt").exists());

        let outcome = f.host.uninstall("notes.sync").await.unwrap();
        assert!(outcome.success);
        // The uninstall block removed the marker.
        assert!(!work.join("marker.txt").exists());

        let record = f.host.store().get("notes.sync").unwrap().unwrap();
        assert_eq!(record.status, ExtensionStatus::Uninstalled);
        assert!(!record.enabled);
    }

    #[tokio::test]
    async fn test_uninstall_unknown_extension() {
        let f = fixture();
        let err = f.host.uninstall("ghost.ext").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }
}
