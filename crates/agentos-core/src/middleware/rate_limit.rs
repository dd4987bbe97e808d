//! Rate-limit middleware — sliding window per `(channel_id, user_key)`.
//!
//! The per-minute limit comes from the channel's security policy. On
//! exceed the message is dropped at this stage (not queued) and a
//! RATE_LIMIT_EXCEEDED violation is recorded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{ChainContext, Middleware, Outcome};
use crate::error::{ErrorCode, KernelError};
use crate::policy::PolicyEnforcer;
use crate::store::RateLimitStore;
use crate::types::InboundMessage;

pub struct RateLimitMiddleware {
    store: RateLimitStore,
    enforcer: Arc<PolicyEnforcer>,
}

impl RateLimitMiddleware {
    pub fn new(store: RateLimitStore, enforcer: Arc<PolicyEnforcer>) -> Self {
        RateLimitMiddleware { store, enforcer }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, msg: &InboundMessage, ctx: &mut ChainContext) -> Outcome {
        let limit = self
            .enforcer
            .policy_for(&msg.channel_id)
            .rate_limit_per_minute;
        match self
            .store
            .check_and_record(&msg.channel_id, &msg.user_key, limit)
        {
            Ok(true) => Outcome::Continue,
            Ok(false) => {
                warn!(
                    channel = %msg.channel_id,
                    user = %msg.user_key,
                    limit,
                    "rate limit exceeded, dropping message"
                );
                ctx.annotate("rate_limit.exceeded", true);
                if let Err(err) = self.enforcer.record_rate_limit(msg) {
                    return Outcome::Reject(err);
                }
                Outcome::Reject(KernelError::new(
                    ErrorCode::RateLimitExceeded,
                    format!("more than {limit} messages in the last minute"),
                ))
            }
            Err(err) => Outcome::Reject(err),
        }
    }
}
