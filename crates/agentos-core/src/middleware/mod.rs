//! Inbound middleware chain.
//!
//! An ordered pipeline of interceptors; each returns one of three outcomes
//! (continue, rewrite, reject). Rejection short-circuits the remaining
//! stages except those marked `always_runs` — audit always sees the final
//! disposition.

pub mod audit;
pub mod dedupe;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::KernelError;
use crate::types::InboundMessage;

pub use audit::AuditMiddleware;
pub use dedupe::DedupeMiddleware;
pub use rate_limit::RateLimitMiddleware;

// ─────────────────────────────────────────────
// Outcome & context
// ─────────────────────────────────────────────

/// The three-valued outcome of one middleware stage.
#[derive(Debug)]
pub enum Outcome {
    /// Pass the message through unchanged.
    Continue,
    /// Replace the message for the remaining stages.
    Rewrite(InboundMessage),
    /// Stop processing with a structured reason.
    Reject(KernelError),
}

/// Mutable state threaded through the chain.
#[derive(Debug, Default)]
pub struct ChainContext {
    /// Free-form annotations middleware attach for the audit record.
    pub annotations: Map<String, Value>,
    /// Set by dedupe: the message is a replay, suppress as success.
    pub duplicate: bool,
    /// The first rejection, if any.
    pub rejection: Option<KernelError>,
}

impl ChainContext {
    pub fn annotate(&mut self, key: &str, value: impl Into<Value>) {
        self.annotations.insert(key.to_string(), value.into());
    }
}

/// How the chain disposed of a message.
#[derive(Debug)]
pub enum Disposition {
    /// Accepted; hand to the dispatcher.
    Dispatch,
    /// Replay of an already-processed message; report success, do not dispatch.
    Duplicate,
    /// Rejected with a reason; do not dispatch.
    Rejected(KernelError),
}

/// The chain's final verdict for one message.
#[derive(Debug)]
pub struct Verdict {
    /// The (possibly rewritten) message.
    pub message: InboundMessage,
    pub disposition: Disposition,
    pub annotations: Map<String, Value>,
}

impl Verdict {
    pub fn accepted(&self) -> bool {
        matches!(self.disposition, Disposition::Dispatch)
    }
}

// ─────────────────────────────────────────────
// Middleware trait & chain
// ─────────────────────────────────────────────

/// One interceptor in the inbound pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name, used in annotations and logs.
    fn name(&self) -> &'static str;

    /// Whether this stage runs even after an earlier rejection (audit does).
    fn always_runs(&self) -> bool {
        false
    }

    async fn handle(&self, msg: &InboundMessage, ctx: &mut ChainContext) -> Outcome;
}

/// The ordered chain.
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        MiddlewareChain { stages }
    }

    /// Run a message through every stage and produce the final verdict.
    pub async fn run(&self, msg: InboundMessage) -> Verdict {
        let mut ctx = ChainContext::default();
        let mut current = msg;

        for stage in &self.stages {
            if ctx.rejection.is_some() && !stage.always_runs() {
                continue;
            }
            match stage.handle(&current, &mut ctx).await {
                Outcome::Continue => {}
                Outcome::Rewrite(next) => {
                    debug!(stage = stage.name(), "message rewritten");
                    ctx.annotate(&format!("{}.rewrote", stage.name()), true);
                    current = next;
                }
                Outcome::Reject(err) => {
                    debug!(stage = stage.name(), code = %err.code, "message rejected");
                    if ctx.rejection.is_none() {
                        ctx.rejection = Some(err);
                    }
                }
            }
        }

        let disposition = if ctx.duplicate {
            Disposition::Duplicate
        } else if let Some(err) = ctx.rejection.take() {
            Disposition::Rejected(err)
        } else {
            Disposition::Dispatch
        };

        Verdict {
            message: current,
            disposition,
            annotations: ctx.annotations,
        }
    }
}
