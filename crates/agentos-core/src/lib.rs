//! AgentOS core — the governance and routing kernel.
//!
//! Everything externally visible flows through this crate: inbound channel
//! events pass the middleware chain (dedupe → rate limit → policy → audit →
//! dispatch), outbound messages pass the outbound gate before an adapter
//! may deliver them. The closed error taxonomy, the canonical event model,
//! and the SQLite-backed stores live here so that every other crate speaks
//! the same types.

pub mod bus;
pub mod config;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod store;
pub mod types;
pub mod utils;
