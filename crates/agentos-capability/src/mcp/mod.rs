//! MCP client — JSON-RPC 2.0 over child-process stdio.
//!
//! Servers are external processes declared in `mcp_servers.yaml`. The
//! client drives the `initialize` handshake, discovers tools via
//! `tools/list`, and executes them via `tools/call`; a response with
//! `isError: true` surfaces as a failed tool result, not a protocol error.

pub mod client;
pub mod protocol;
pub mod source;
pub mod transport;

pub use client::{load_server_specs, McpClient, McpServerSpec};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpTool, RequestId};
pub use source::{McpExecutor, McpToolSource};
pub use transport::{StdioTransport, Transport};
