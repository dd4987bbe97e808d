//! Audit middleware — always runs, records the final disposition.

use async_trait::async_trait;
use tracing::error;

use super::{ChainContext, Middleware, Outcome};
use crate::store::{ChannelEvent, EventStore};
use crate::types::InboundMessage;

/// Last stage before dispatch. Runs even for rejected messages so that
/// every inbound message leaves a row keyed by `(channel_id, message_id)`.
pub struct AuditMiddleware {
    events: EventStore,
}

impl AuditMiddleware {
    pub fn new(events: EventStore) -> Self {
        AuditMiddleware { events }
    }
}

#[async_trait]
impl Middleware for AuditMiddleware {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn always_runs(&self) -> bool {
        true
    }

    async fn handle(&self, msg: &InboundMessage, ctx: &mut ChainContext) -> Outcome {
        let status = if ctx.duplicate {
            "duplicate"
        } else if ctx.rejection.is_some() {
            "rejected"
        } else {
            "accepted"
        };

        let mut event = ChannelEvent::inbound(&msg.channel_id, &msg.message_id, status)
            .with_metadata(serde_json::Value::Object(ctx.annotations.clone()));
        if let Some(rejection) = &ctx.rejection {
            if !ctx.duplicate {
                event = event.with_error(rejection.code.as_str());
            }
        }

        if let Err(err) = self.events.append(&event) {
            // The audit-trail invariant is not negotiable: a message we
            // cannot audit is a message we reject.
            error!(code = %err.code, "audit append failed");
            return Outcome::Reject(err);
        }
        Outcome::Continue
    }
}
