//! Capability router — the policy gate in front of every tool execution.
//!
//! The invocation flow is fixed: lookup, input-schema validation,
//! spec-freeze and approval gates, side-effect deny list, then dispatch.
//! HIGH/CRITICAL risk is delegated to the sandbox; with the sandbox
//! unavailable such invocations fail with exit code 451 and nothing is
//! spawned. Start and end of every invocation land in the task audit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::policy::verify_token_hash;
use agentos_core::store::TaskAuditStore;

use crate::descriptor::{
    validate_inputs, RiskLevel, ToolDescriptor, ToolInvocation, ToolResult, ToolSourceType,
};
use crate::registry::CapabilityRegistry;
use crate::sandbox::{Sandbox, EXIT_SANDBOX_BLOCKED};

/// Executes a tool after the router's gates have passed.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ToolInvocation,
    ) -> KernelResult<serde_json::Value>;
}

/// Router configuration.
pub struct RouterOptions {
    /// Side-effect tags denied per source kind ("ext" / "mcp").
    pub denied_side_effects: HashMap<String, Vec<String>>,
    /// `salt$hex` hash an approval token must match; `None` means no
    /// approval can be granted and CRITICAL tools are always rejected.
    pub approval_token_hash: Option<String>,
    /// Per-invocation execution deadline.
    pub execution_timeout: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        RouterOptions {
            denied_side_effects: HashMap::new(),
            approval_token_hash: None,
            execution_timeout: Duration::from_secs(60),
        }
    }
}

/// The router itself.
pub struct CapabilityRouter {
    registry: Arc<CapabilityRegistry>,
    ext_executor: Arc<dyn ToolExecutor>,
    mcp_executor: Arc<dyn ToolExecutor>,
    sandbox: Arc<dyn Sandbox>,
    audit: TaskAuditStore,
    options: RouterOptions,
}

impl CapabilityRouter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        ext_executor: Arc<dyn ToolExecutor>,
        mcp_executor: Arc<dyn ToolExecutor>,
        sandbox: Arc<dyn Sandbox>,
        audit: TaskAuditStore,
        options: RouterOptions,
    ) -> Self {
        CapabilityRouter {
            registry,
            ext_executor,
            mcp_executor,
            sandbox,
            audit,
            options,
        }
    }

    /// Route one invocation through the full gate sequence.
    pub async fn invoke_tool(&self, invocation: &ToolInvocation) -> KernelResult<ToolResult> {
        self.registry.refresh_if_stale().await;
        let started = Instant::now();

        match self.gate(invocation).await {
            Ok(descriptor) => {
                self.audit_event(invocation, "invocation_started", json!({
                    "tool_id": invocation.tool_id,
                    "inputs_hash": invocation.inputs_hash(),
                    "mode": invocation.mode,
                    "risk": descriptor.risk_level,
                }))?;
                let result = self.dispatch(&descriptor, invocation, started).await;
                self.audit_outcome(invocation, &result, started)?;
                Ok(result)
            }
            Err(err) => {
                warn!(tool = %invocation.tool_id, code = %err.code, "invocation rejected");
                self.audit_event(invocation, "invocation_rejected", json!({
                    "tool_id": invocation.tool_id,
                    "inputs_hash": invocation.inputs_hash(),
                    "code": err.code.as_str(),
                    "reason": err.reason,
                }))?;
                Err(err)
            }
        }
    }

    /// Steps 1–4 of the flow; returns the descriptor when all gates pass.
    async fn gate(&self, invocation: &ToolInvocation) -> KernelResult<ToolDescriptor> {
        let descriptor = self.registry.get(&invocation.tool_id).ok_or_else(|| {
            KernelError::new(
                ErrorCode::UnknownTool,
                format!("no tool {:?}", invocation.tool_id),
            )
        })?;
        if !descriptor.enabled {
            return Err(KernelError::new(
                ErrorCode::UnknownTool,
                format!("tool {:?} is disabled", invocation.tool_id),
            ));
        }

        validate_inputs(&descriptor.input_schema, &invocation.inputs)?;

        if matches!(descriptor.risk_level, RiskLevel::High | RiskLevel::Critical)
            && !invocation.spec_frozen
        {
            return Err(KernelError::new(
                ErrorCode::SpecNotFrozen,
                "high-risk tools require a frozen invocation spec",
            ));
        }

        if descriptor.risk_level == RiskLevel::Critical {
            let approved = match (&invocation.approval_token, &self.options.approval_token_hash) {
                (Some(token), Some(hash)) => verify_token_hash(hash, token),
                _ => false,
            };
            if !approved {
                return Err(KernelError::new(
                    ErrorCode::ApprovalRequired,
                    "critical-risk tools require admin approval",
                ));
            }
        }

        let source_kind = descriptor.source_type.prefix();
        if let Some(denied) = self.options.denied_side_effects.get(source_kind) {
            for tag in &descriptor.side_effect_tags {
                if denied.iter().any(|d| d == tag) {
                    return Err(KernelError::new(
                        ErrorCode::SideEffectDenied,
                        format!("side effect {tag:?} is denied for {source_kind} tools"),
                    ));
                }
            }
        }

        Ok(descriptor)
    }

    async fn dispatch(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ToolInvocation,
        started: Instant,
    ) -> ToolResult {
        // HIGH/CRITICAL runs only inside the sandbox. Unavailable sandbox
        // means a 451 rejection, never an unsandboxed fallback.
        if matches!(descriptor.risk_level, RiskLevel::High | RiskLevel::Critical)
            && !self.sandbox.is_available().await
        {
            let duration = started.elapsed().as_millis() as u64;
            return ToolResult::fail(
                invocation.invocation_id,
                KernelError::new(ErrorCode::SandboxUnavailable, "container runtime unreachable"),
                duration,
            )
            .with_exit_code(EXIT_SANDBOX_BLOCKED);
        }

        let executor = match descriptor.source_type {
            ToolSourceType::Extension => &self.ext_executor,
            ToolSourceType::Mcp => &self.mcp_executor,
        };

        debug!(tool = %descriptor.tool_id, risk = ?descriptor.risk_level, "dispatching tool");
        let execution =
            tokio::time::timeout(self.options.execution_timeout, executor.execute(descriptor, invocation))
                .await;
        let duration = started.elapsed().as_millis() as u64;

        match execution {
            Ok(Ok(payload)) => {
                let mut result = ToolResult::ok(invocation.invocation_id, payload, duration);
                result.declared_side_effects = descriptor.side_effect_tags.clone();
                result
            }
            Ok(Err(err)) => ToolResult::fail(invocation.invocation_id, err, duration),
            Err(_) => ToolResult::fail(
                invocation.invocation_id,
                KernelError::new(
                    ErrorCode::Timeout,
                    format!(
                        "execution exceeded {}s",
                        self.options.execution_timeout.as_secs()
                    ),
                ),
                duration,
            ),
        }
    }

    fn audit_outcome(
        &self,
        invocation: &ToolInvocation,
        result: &ToolResult,
        started: Instant,
    ) -> KernelResult<()> {
        self.audit_event(invocation, "invocation_finished", json!({
            "tool_id": invocation.tool_id,
            "inputs_hash": invocation.inputs_hash(),
            "success": result.success,
            "exit_code": result.exit_code,
            "error": result.error.as_ref().map(|e| e.code.as_str()),
            "duration_ms": started.elapsed().as_millis() as u64,
        }))
    }

    fn audit_event(
        &self,
        invocation: &ToolInvocation,
        event: &str,
        payload: serde_json::Value,
    ) -> KernelResult<()> {
        self.audit
            .append(&invocation.invocation_id.to_string(), event, &payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::fixtures::descriptor;
    use crate::registry::testing::StaticSource;
    use crate::registry::ToolSource;
    use crate::sandbox::testing::StubSandbox;
    use agentos_core::policy::SecurityPolicy;
    use agentos_core::store::Db;

    struct EchoExecutor(&'static str);

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn execute(
            &self,
            _descriptor: &ToolDescriptor,
            invocation: &ToolInvocation,
        ) -> KernelResult<serde_json::Value> {
            Ok(json!({ "via": self.0, "inputs": invocation.inputs }))
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(
            &self,
            _descriptor: &ToolDescriptor,
            _invocation: &ToolInvocation,
        ) -> KernelResult<serde_json::Value> {
            Err(KernelError::new(ErrorCode::CommandFailed, "boom"))
        }
    }

    struct Fixture {
        router: CapabilityRouter,
        db: Db,
    }

    async fn fixture_with(
        tools: Vec<(&str, RiskLevel)>,
        sandbox: StubSandbox,
        options: RouterOptions,
    ) -> Fixture {
        let ext_tools: Vec<(&str, RiskLevel)> = tools
            .iter()
            .filter(|(id, _)| id.starts_with("ext:"))
            .cloned()
            .collect();
        let mcp_tools: Vec<(&str, RiskLevel)> = tools
            .iter()
            .filter(|(id, _)| id.starts_with("mcp:"))
            .cloned()
            .collect();

        let mut sources: Vec<Arc<dyn ToolSource>> = Vec::new();
        if !ext_tools.is_empty() {
            let name = ext_tools[0].0.split(':').nth(1).unwrap();
            sources.push(Arc::new(StaticSource::ext(name, &ext_tools)));
        }
        if !mcp_tools.is_empty() {
            let name = mcp_tools[0].0.split(':').nth(1).unwrap();
            sources.push(Arc::new(StaticSource::mcp(name, &mcp_tools)));
        }

        let registry = Arc::new(CapabilityRegistry::new(sources, Duration::from_secs(3600)));
        registry.refresh().await;

        let db = Db::in_memory().unwrap();
        let router = CapabilityRouter::new(
            registry,
            Arc::new(EchoExecutor("ext")),
            Arc::new(EchoExecutor("mcp")),
            Arc::new(sandbox),
            TaskAuditStore::new(db.clone()),
            options,
        );
        Fixture { router, db }
    }

    fn audit_rows(db: &Db, invocation: &ToolInvocation) -> Vec<(String, serde_json::Value)> {
        TaskAuditStore::new(db.clone())
            .for_task(&invocation.invocation_id.to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_low_risk_dispatch_and_audit() {
        let f = fixture_with(
            vec![("ext:notes.sync:pull", RiskLevel::Low)],
            StubSandbox::unavailable(),
            RouterOptions::default(),
        )
        .await;

        let inv = ToolInvocation::execution("ext:notes.sync:pull", json!({"query": "x"}));
        let result = f.router.invoke_tool(&inv).await.unwrap();
        assert!(result.success);
        assert_eq!(result.payload["via"], "ext");

        let rows = audit_rows(&f.db, &inv);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "invocation_started");
        assert_eq!(rows[1].0, "invocation_finished");
        assert_eq!(rows[1].1["success"], true);
        assert_eq!(rows[0].1["inputs_hash"], inv.inputs_hash());
    }

    #[tokio::test]
    async fn test_mcp_routes_to_mcp_executor() {
        let f = fixture_with(
            vec![("mcp:files:read_file", RiskLevel::Low)],
            StubSandbox::unavailable(),
            RouterOptions::default(),
        )
        .await;
        let inv = ToolInvocation::execution("mcp:files:read_file", json!({"query": "x"}));
        let result = f.router.invoke_tool(&inv).await.unwrap();
        assert_eq!(result.payload["via"], "mcp");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let f = fixture_with(vec![], StubSandbox::available(), RouterOptions::default()).await;
        let inv = ToolInvocation::execution("ext:ghost:run", json!({}));
        let err = f.router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownTool);

        let rows = audit_rows(&f.db, &inv);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "invocation_rejected");
    }

    #[tokio::test]
    async fn test_schema_violation() {
        let f = fixture_with(
            vec![("ext:notes.sync:pull", RiskLevel::Low)],
            StubSandbox::available(),
            RouterOptions::default(),
        )
        .await;
        let inv = ToolInvocation::execution("ext:notes.sync:pull", json!({}));
        let err = f.router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InputSchemaViolation);
    }

    #[tokio::test]
    async fn test_high_risk_requires_frozen_spec() {
        let f = fixture_with(
            vec![("ext:deploy.kit:wipe", RiskLevel::High)],
            StubSandbox::available(),
            RouterOptions::default(),
        )
        .await;
        let inv = ToolInvocation::planning("ext:deploy.kit:wipe", json!({"query": "x"}));
        let err = f.router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SpecNotFrozen);
    }

    #[tokio::test]
    async fn test_critical_requires_approval() {
        let hash = SecurityPolicy::hash_admin_token("approve-me", "s1");
        let f = fixture_with(
            vec![("ext:shop.billing:charge", RiskLevel::Critical)],
            StubSandbox::available(),
            RouterOptions {
                approval_token_hash: Some(hash),
                ..Default::default()
            },
        )
        .await;

        let inv = ToolInvocation::execution("ext:shop.billing:charge", json!({"query": "x"}));
        let err = f.router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);

        let approved = ToolInvocation::execution("ext:shop.billing:charge", json!({"query": "x"}))
            .with_approval("approve-me");
        assert!(f.router.invoke_tool(&approved).await.unwrap().success);

        let wrong = ToolInvocation::execution("ext:shop.billing:charge", json!({"query": "x"}))
            .with_approval("wrong");
        let err = f.router.invoke_tool(&wrong).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApprovalRequired);
    }

    #[tokio::test]
    async fn test_side_effect_deny_list() {
        let mut options = RouterOptions::default();
        options
            .denied_side_effects
            .insert("ext".into(), vec!["fs.write".into()]);

        let mut tool = descriptor("ext:notes.sync:save", RiskLevel::Med);
        tool.side_effect_tags.insert("fs.write".into());
        let source = Arc::new(StaticSource {
            kind: "ext",
            name: "notes.sync".into(),
            tools: vec![tool],
            failing: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(CapabilityRegistry::new(vec![source], Duration::from_secs(3600)));
        registry.refresh().await;
        let db = Db::in_memory().unwrap();
        let router = CapabilityRouter::new(
            registry,
            Arc::new(EchoExecutor("ext")),
            Arc::new(EchoExecutor("mcp")),
            Arc::new(StubSandbox::available()),
            TaskAuditStore::new(db),
            options,
        );

        let inv = ToolInvocation::execution("ext:notes.sync:save", json!({"query": "x"}));
        let err = router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SideEffectDenied);
    }

    #[tokio::test]
    async fn test_sandbox_unavailable_blocks_high_risk_with_451() {
        let f = fixture_with(
            vec![("ext:deploy.kit:wipe", RiskLevel::High)],
            StubSandbox::unavailable(),
            RouterOptions::default(),
        )
        .await;
        let inv = ToolInvocation::execution("ext:deploy.kit:wipe", json!({"query": "x"}));
        let result = f.router.invoke_tool(&inv).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(EXIT_SANDBOX_BLOCKED));
        assert_eq!(
            result.error.as_ref().unwrap().code,
            ErrorCode::SandboxUnavailable
        );

        let rows = audit_rows(&f.db, &inv);
        assert_eq!(rows[1].1["exit_code"], 451);
    }

    #[tokio::test]
    async fn test_low_risk_unaffected_by_sandbox_outage() {
        let f = fixture_with(
            vec![("ext:notes.sync:pull", RiskLevel::Low)],
            StubSandbox::unavailable(),
            RouterOptions::default(),
        )
        .await;
        let inv = ToolInvocation::execution("ext:notes.sync:pull", json!({"query": "x"}));
        assert!(f.router.invoke_tool(&inv).await.unwrap().success);
    }

    #[tokio::test]
    async fn test_executor_failure_is_failed_result() {
        let registry = Arc::new(CapabilityRegistry::new(
            vec![Arc::new(StaticSource::ext(
                "notes.sync",
                &[("ext:notes.sync:pull", RiskLevel::Low)],
            ))],
            Duration::from_secs(3600),
        ));
        registry.refresh().await;
        let db = Db::in_memory().unwrap();
        let router = CapabilityRouter::new(
            registry,
            Arc::new(FailingExecutor),
            Arc::new(EchoExecutor("mcp")),
            Arc::new(StubSandbox::available()),
            TaskAuditStore::new(db.clone()),
            RouterOptions::default(),
        );

        let inv = ToolInvocation::execution("ext:notes.sync:pull", json!({"query": "x"}));
        let result = router.invoke_tool(&inv).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn test_disabled_tool_is_unknown() {
        let mut tool = descriptor("ext:notes.sync:pull", RiskLevel::Low);
        tool.enabled = false;
        let source = Arc::new(StaticSource {
            kind: "ext",
            name: "notes.sync".into(),
            tools: vec![tool],
            failing: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(CapabilityRegistry::new(vec![source], Duration::from_secs(3600)));
        registry.refresh().await;
        let router = CapabilityRouter::new(
            registry,
            Arc::new(EchoExecutor("ext")),
            Arc::new(EchoExecutor("mcp")),
            Arc::new(StubSandbox::available()),
            TaskAuditStore::new(Db::in_memory().unwrap()),
            RouterOptions::default(),
        );

        let inv = ToolInvocation::execution("ext:notes.sync:pull", json!({"query": "x"}));
        let err = router.invoke_tool(&inv).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownTool);
    }
}
