//! Dedupe middleware — suppress provider retries as success.

use async_trait::async_trait;
use tracing::debug;

use super::{ChainContext, Middleware, Outcome};
use crate::error::{ErrorCode, KernelError};
use crate::store::DedupeStore;
use crate::types::InboundMessage;

/// First stage of the chain: `(channel_id, message_id)` first writer wins.
pub struct DedupeMiddleware {
    store: DedupeStore,
}

impl DedupeMiddleware {
    pub fn new(store: DedupeStore) -> Self {
        DedupeMiddleware { store }
    }
}

#[async_trait]
impl Middleware for DedupeMiddleware {
    fn name(&self) -> &'static str {
        "dedupe"
    }

    async fn handle(&self, msg: &InboundMessage, ctx: &mut ChainContext) -> Outcome {
        match self.store.check_and_record(&msg.channel_id, &msg.message_id) {
            Ok(true) => Outcome::Continue,
            Ok(false) => {
                debug!(
                    channel = %msg.channel_id,
                    message_id = %msg.message_id,
                    "duplicate delivery suppressed"
                );
                ctx.duplicate = true;
                ctx.annotate("dedupe.duplicate", true);
                Outcome::Reject(KernelError::new(
                    ErrorCode::Unknown,
                    "duplicate delivery suppressed as success",
                ))
            }
            // A store failure means we cannot prove first-delivery; the
            // audit-trail invariant wins and the message is rejected.
            Err(err) => Outcome::Reject(err),
        }
    }
}
