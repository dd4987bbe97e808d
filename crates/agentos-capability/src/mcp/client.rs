//! MCP client and server-spec loading.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use super::protocol::{JsonRpcRequest, JsonRpcResponse, McpTool, RequestId, MCP_PROTOCOL_VERSION};
use super::transport::Transport;

// ─────────────────────────────────────────────
// Server specs (mcp_servers.yaml)
// ─────────────────────────────────────────────

/// One configured MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct McpServerSpec {
    #[serde(skip)]
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, McpServerSpec>,
}

/// Load server specs from `mcp_servers.yaml`, sorted by id.
pub fn load_server_specs(path: &Path) -> KernelResult<Vec<McpServerSpec>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| KernelError::new(ErrorCode::ConfigInvalid, e.to_string()))?;
    let parsed: ServersFile = serde_yaml::from_str(&content)
        .map_err(|e| KernelError::new(ErrorCode::ConfigInvalid, format!("bad servers file: {e}")))?;

    let mut specs: Vec<McpServerSpec> = parsed
        .servers
        .into_iter()
        .filter(|(_, spec)| spec.enabled.unwrap_or(true))
        .map(|(id, mut spec)| {
            spec.id = id;
            spec
        })
        .collect();
    specs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(specs)
}

// ─────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────

/// Information reported by the server during `initialize`.
#[derive(Clone, Debug)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

/// JSON-RPC client over any [`Transport`].
pub struct McpClient {
    next_id: AtomicI64,
    call_timeout: Duration,
}

impl McpClient {
    pub fn new(call_timeout: Duration) -> Self {
        McpClient {
            next_id: AtomicI64::new(1),
            call_timeout,
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn round_trip<T: Transport>(
        &self,
        transport: &mut T,
        method: &str,
        params: Option<Value>,
    ) -> KernelResult<Value> {
        let id = self.next_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);
        let encoded = serde_json::to_value(&request).map_err(|e| {
            KernelError::new(ErrorCode::McpProtocolError, format!("encode request: {e}"))
        })?;
        transport.send(&encoded).await?;

        let raw = tokio::time::timeout(self.call_timeout, transport.receive())
            .await
            .map_err(|_| {
                KernelError::new(
                    ErrorCode::McpConnectionError,
                    format!("{method} timed out after {}s", self.call_timeout.as_secs()),
                )
            })??;

        let response: JsonRpcResponse = serde_json::from_value(raw).map_err(|e| {
            KernelError::new(ErrorCode::McpProtocolError, format!("bad response: {e}"))
        })?;
        if response.id != id {
            return Err(KernelError::new(
                ErrorCode::McpProtocolError,
                "response id does not match request",
            ));
        }
        if let Some(error) = response.error {
            return Err(KernelError::new(
                ErrorCode::McpProtocolError,
                format!("server error {}: {}", error.code, error.message),
            ));
        }
        response.result.ok_or_else(|| {
            KernelError::new(ErrorCode::McpProtocolError, "response carries no result")
        })
    }

    /// Perform the initialization handshake.
    pub async fn initialize<T: Transport>(&self, transport: &mut T) -> KernelResult<ServerInfo> {
        let result = self
            .round_trip(
                transport,
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "agentos",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                })),
            )
            .await?;

        let info = ServerInfo {
            name: result["serverInfo"]["name"].as_str().unwrap_or("unknown").to_string(),
            version: result["serverInfo"]["version"].as_str().unwrap_or("0").to_string(),
            protocol_version: result["protocolVersion"]
                .as_str()
                .unwrap_or(MCP_PROTOCOL_VERSION)
                .to_string(),
        };
        info!(server = %info.name, version = %info.version, "MCP server initialized");
        Ok(info)
    }

    /// Discover the server's tools.
    pub async fn list_tools<T: Transport>(&self, transport: &mut T) -> KernelResult<Vec<McpTool>> {
        let result = self.round_trip(transport, "tools/list", None).await?;
        let tools = result["tools"].clone();
        serde_json::from_value(tools).map_err(|e| {
            KernelError::new(ErrorCode::McpProtocolError, format!("bad tools list: {e}"))
        })
    }

    /// Execute one tool. `isError: true` in the result is surfaced as a
    /// failed call, distinct from a protocol error.
    pub async fn call_tool<T: Transport>(
        &self,
        transport: &mut T,
        name: &str,
        arguments: &Value,
    ) -> KernelResult<Value> {
        debug!(tool = %name, "MCP tools/call");
        let result = self
            .round_trip(
                transport,
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await?;
        if result["isError"].as_bool().unwrap_or(false) {
            return Err(KernelError::new(
                ErrorCode::CommandFailed,
                format!("tool {name} reported an error"),
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::transport::testing::ScriptedTransport;

    fn client() -> McpClient {
        McpClient::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "protocolVersion": "2024-11-05",
                "serverInfo": {"name": "files", "version": "1.2.0"}
            }
        })]);

        let info = client().initialize(&mut transport).await.unwrap();
        assert_eq!(info.name, "files");
        assert_eq!(info.version, "1.2.0");

        let sent = &transport.sent[0];
        assert_eq!(sent["method"], "initialize");
        assert_eq!(sent["params"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(sent["params"]["clientInfo"]["name"], "agentos");
    }

    #[tokio::test]
    async fn test_list_tools() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "tools": [
                    {"name": "read_file", "description": "Read", "inputSchema": {"type": "object"}},
                    {"name": "write_file", "description": "Write", "inputSchema": {"type": "object"}}
                ]
            }
        })]);

        let tools = client().list_tools(&mut transport).await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "read_file");
    }

    #[tokio::test]
    async fn test_call_tool_success() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"content": [{"type": "text", "text": "done"}]}
        })]);

        let result = client()
            .call_tool(&mut transport, "read_file", &json!({"path": "/x"}))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "done");
        assert_eq!(transport.sent[0]["params"]["name"], "read_file");
    }

    #[tokio::test]
    async fn test_call_tool_is_error_flag() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"isError": true, "content": []}
        })]);

        let err = client()
            .call_tool(&mut transport, "read_file", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandFailed);
    }

    #[tokio::test]
    async fn test_server_error_is_protocol_error() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "no such method"}
        })]);

        let err = client().list_tools(&mut transport).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::McpProtocolError);
    }

    #[tokio::test]
    async fn test_mismatched_id_rejected() {
        let mut transport = ScriptedTransport::new(vec![json!({
            "jsonrpc": "2.0",
            "id": 999,
            "result": {}
        })]);

        let err = client().list_tools(&mut transport).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::McpProtocolError);
    }

    #[test]
    fn test_load_server_specs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.yaml");
        std::fs::write(
            &path,
            r#"
servers:
  files:
    command: mcp-files
    args: ["--root", "/srv"]
    env:
      LOG_LEVEL: info
  disabled-one:
    command: mcp-other
    enabled: false
"#,
        )
        .unwrap();

        let specs = load_server_specs(&path).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "files");
        assert_eq!(specs[0].command, "mcp-files");
        assert_eq!(specs[0].args, vec!["--root", "/srv"]);
        assert_eq!(specs[0].env["LOG_LEVEL"], "info");
    }

    #[test]
    fn test_missing_specs_file_is_empty() {
        let specs = load_server_specs(Path::new("/nope/mcp_servers.yaml")).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn test_malformed_specs_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_servers.yaml");
        std::fs::write(&path, "servers: [not, a, map]").unwrap();
        let err = load_server_specs(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }
}
