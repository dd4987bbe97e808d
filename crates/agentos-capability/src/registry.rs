//! Capability registry — one tool table over many sources.
//!
//! Sources (the extension host, each MCP server) are polled on a TTL;
//! every refresh publishes a new immutable snapshot behind the RwLock.
//! A failing source keeps its previous tools — one source's outage never
//! empties another's entries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use agentos_core::error::KernelResult;

use crate::descriptor::ToolDescriptor;

/// Default refresh TTL.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(60);

/// A provider of tool descriptors.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Source kind: `"ext"` or `"mcp"`. Matches the tool_id prefix.
    fn source_kind(&self) -> &'static str;

    /// A stable name for logging (extension host, server id).
    fn source_name(&self) -> String;

    /// Tool-id prefix owned by this source; on a failed refresh, previous
    /// entries under this prefix are retained. Sources that own a whole
    /// kind (the extension host) override this with the bare kind prefix.
    fn retention_prefix(&self) -> String {
        format!("{}:{}:", self.source_kind(), self.source_name())
    }

    async fn list_tools(&self) -> KernelResult<Vec<ToolDescriptor>>;
}

/// The aggregated, snapshot-published tool table.
pub struct CapabilityRegistry {
    sources: Vec<Arc<dyn ToolSource>>,
    snapshot: RwLock<Arc<HashMap<String, ToolDescriptor>>>,
    refreshed_at: RwLock<Option<Instant>>,
    ttl: Duration,
    shutdown: Arc<Notify>,
}

impl CapabilityRegistry {
    pub fn new(sources: Vec<Arc<dyn ToolSource>>, ttl: Duration) -> Self {
        CapabilityRegistry {
            sources,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
            refreshed_at: RwLock::new(None),
            ttl,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Rebuild the table from all sources; returns the table size.
    ///
    /// A source that fails keeps its previous entries (failure isolation);
    /// a descriptor that fails validation is skipped.
    pub async fn refresh(&self) -> usize {
        let previous = self.current();
        let mut next: HashMap<String, ToolDescriptor> = HashMap::new();

        for source in &self.sources {
            let name = source.source_name();
            match source.list_tools().await {
                Ok(tools) => {
                    for tool in tools {
                        if let Err(e) = tool.validate() {
                            warn!(tool = %tool.tool_id, error = %e, "skipping invalid descriptor");
                            continue;
                        }
                        next.insert(tool.tool_id.clone(), tool);
                    }
                }
                Err(e) => {
                    warn!(source = %name, error = %e, "tool source failed, keeping previous entries");
                    let prefix = source.retention_prefix();
                    for (tool_id, tool) in previous.iter() {
                        if tool_id.starts_with(&prefix) {
                            next.insert(tool_id.clone(), tool.clone());
                        }
                    }
                }
            }
        }

        let size = next.len();
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = Arc::new(next);
        }
        if let Ok(mut at) = self.refreshed_at.write() {
            *at = Some(Instant::now());
        }
        debug!(tools = size, "capability table refreshed");
        size
    }

    /// Refresh only if the snapshot is older than the TTL.
    pub async fn refresh_if_stale(&self) {
        let stale = self
            .refreshed_at
            .read()
            .ok()
            .and_then(|at| *at)
            .map(|at| at.elapsed() >= self.ttl)
            .unwrap_or(true);
        if stale {
            self.refresh().await;
        }
    }

    fn current(&self) -> Arc<HashMap<String, ToolDescriptor>> {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| Arc::new(HashMap::new()))
    }

    /// Look up one tool.
    pub fn get(&self, tool_id: &str) -> Option<ToolDescriptor> {
        self.current().get(tool_id).cloned()
    }

    /// All tools, sorted by id.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = self.current().values().cloned().collect();
        tools.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        tools
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Background refresh loop until shutdown.
    pub async fn run(&self) {
        info!(ttl = ?self.ttl, "capability refresh loop started");
        let mut tick = tokio::time::interval(self.ttl);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.refresh().await;
                }
                _ = self.shutdown.notified() => {
                    info!("capability refresh loop stopping");
                    break;
                }
            }
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
