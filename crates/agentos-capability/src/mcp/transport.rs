//! Stdio transport — newline-delimited JSON to a child process.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

/// Message transport the client drives.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: &Value) -> KernelResult<()>;
    async fn receive(&mut self) -> KernelResult<Value>;
}

/// Child process speaking newline-delimited JSON-RPC on stdio.
#[derive(Debug)]
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl StdioTransport {
    /// Spawn the server process with a clean environment plus the declared
    /// variables.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> KernelResult<Self> {
        debug!(command = %command, "spawning MCP server");
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                KernelError::new(
                    ErrorCode::McpConnectionError,
                    format!("failed to spawn {command}: {e}"),
                )
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            KernelError::new(ErrorCode::McpConnectionError, "server stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            KernelError::new(ErrorCode::McpConnectionError, "server stdout unavailable")
        })?;

        Ok(StdioTransport {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Terminate the server process.
    pub async fn shutdown(mut self) {
        let _ = self.child.kill().await;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &Value) -> KernelResult<()> {
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await.map_err(|e| {
            KernelError::new(ErrorCode::McpConnectionError, format!("write failed: {e}"))
        })?;
        self.stdin.flush().await.map_err(|e| {
            KernelError::new(ErrorCode::McpConnectionError, format!("flush failed: {e}"))
        })
    }

    async fn receive(&mut self) -> KernelResult<Value> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await.map_err(|e| {
            KernelError::new(ErrorCode::McpConnectionError, format!("read failed: {e}"))
        })?;
        if read == 0 {
            return Err(KernelError::new(
                ErrorCode::McpConnectionError,
                "server closed its stdout",
            ));
        }
        serde_json::from_str(&line).map_err(|e| {
            KernelError::new(
                ErrorCode::McpProtocolError,
                format!("server sent invalid JSON: {e}"),
            )
        })
    }
}
