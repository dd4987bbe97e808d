//! Outward-facing network primitives — SSRF defense lives below the
//! guards, in the fetch/search plumbing itself.

pub mod fetch;
pub mod ssrf;

pub use fetch::{SearchClient, WebFetcher};
pub use ssrf::{is_blocked_ip, resolve_pinned};
