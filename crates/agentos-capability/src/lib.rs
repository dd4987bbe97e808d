//! Capability governance — every agent-initiated operation passes here.
//!
//! Tools from two sources (installed extensions, MCP servers) are unified
//! behind one descriptor with a risk classification. The router enforces
//! spec-freeze and approval gates before dispatch; HIGH/CRITICAL risk runs
//! only inside the sandbox, and the chat guards (phase gate, attribution,
//! content fence) police the agent ↔ external boundary.

pub mod descriptor;
pub mod guards;
pub mod mcp;
pub mod net;
pub mod registry;
pub mod response_store;
pub mod router;
pub mod runner;
pub mod sandbox;

pub use descriptor::{RiskLevel, ToolDescriptor, ToolInvocation, ToolResult};
pub use registry::CapabilityRegistry;
pub use router::CapabilityRouter;
