//! MCP-backed tool source and executor.
//!
//! Each configured server is spawned on demand: discovery spawns, lists,
//! and shuts down; execution spawns, initializes, calls, and shuts down.
//! Short-lived processes keep the failure domain per call — a wedged
//! server cannot hold the registry hostage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agentos_core::error::{KernelError, KernelResult};

use super::client::{McpClient, McpServerSpec};
use super::transport::StdioTransport;
use crate::descriptor::{infer_risk, RiskLevel, ToolDescriptor, ToolInvocation, ToolSourceType};
use crate::registry::ToolSource;
use crate::router::ToolExecutor;

/// Tool source over one MCP server spec.
pub struct McpToolSource {
    spec: McpServerSpec,
    call_timeout: Duration,
}

impl McpToolSource {
    pub fn new(spec: McpServerSpec, call_timeout: Duration) -> Self {
        McpToolSource { spec, call_timeout }
    }
}

#[async_trait]
impl ToolSource for McpToolSource {
    fn source_kind(&self) -> &'static str {
        "mcp"
    }

    fn source_name(&self) -> String {
        self.spec.id.clone()
    }

    async fn list_tools(&self) -> KernelResult<Vec<ToolDescriptor>> {
        let mut transport =
            StdioTransport::spawn(&self.spec.command, &self.spec.args, &self.spec.env)?;
        let client = McpClient::new(self.call_timeout);
        client.initialize(&mut transport).await?;
        let tools = client.list_tools(&mut transport).await;
        transport.shutdown().await;
        let tools = tools?;

        Ok(tools
            .into_iter()
            .map(|tool| {
                let declared = tool.risk_level.as_deref().and_then(parse_risk);
                let side_effects = std::collections::BTreeSet::new();
                let risk = infer_risk(&tool.name, &tool.description, &side_effects, declared);
                ToolDescriptor {
                    tool_id: format!("mcp:{}:{}", self.spec.id, tool.name),
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    output_schema: serde_json::Value::Null,
                    risk_level: risk,
                    side_effect_tags: side_effects,
                    source_type: ToolSourceType::Mcp,
                    source_id: self.spec.id.clone(),
                    enabled: true,
                }
            })
            .collect())
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

/// Executor dispatching `mcp:` tools via `tools/call`.
pub struct McpExecutor {
    specs: Vec<Arc<McpServerSpec>>,
    call_timeout: Duration,
}

impl McpExecutor {
    pub fn new(specs: Vec<McpServerSpec>, call_timeout: Duration) -> Self {
        McpExecutor {
            specs: specs.into_iter().map(Arc::new).collect(),
            call_timeout,
        }
    }

    fn spec_for(&self, server_id: &str) -> KernelResult<&McpServerSpec> {
        self.specs
            .iter()
            .find(|s| s.id == server_id)
            .map(|s| s.as_ref())
            .ok_or_else(|| {
                KernelError::new(
                    agentos_core::error::ErrorCode::McpConnectionError,
                    format!("no configured MCP server {server_id:?}"),
                )
            })
    }
}

#[async_trait]
impl ToolExecutor for McpExecutor {
    async fn execute(
        &self,
        descriptor: &ToolDescriptor,
        invocation: &ToolInvocation,
    ) -> KernelResult<serde_json::Value> {
        let spec = self.spec_for(&descriptor.source_id)?;
        let mut transport = StdioTransport::spawn(&spec.command, &spec.args, &spec.env)?;
        let client = McpClient::new(self.call_timeout);
        client.initialize(&mut transport).await?;
        let result = client
            .call_tool(&mut transport, &descriptor.name, &invocation.inputs)
            .await;
        transport.shutdown().await;
        result
    }
}
