//! Adapter manager — owns adapter handles and the outbound path.
//!
//! Outbound messages pass a gate (validation, per-conversation rate limit,
//! audit) before the adapter may deliver them. Transient send failures are
//! retried with exponential backoff and jitter, at most K attempts; an
//! unknown channel_id is dropped (fail closed), never guessed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use agentos_core::bus::MessageBus;
use agentos_core::error::{ErrorCode, KernelError, KernelResult};
use agentos_core::policy::PolicyEnforcer;
use agentos_core::store::{ChannelEvent, EventStore, RateLimitStore};
use agentos_core::types::{MessageKind, OutboundMessage};

use crate::adapter::{Adapter, SendReceipt};

/// Base delay for send retries; attempt N waits `BASE << N` plus jitter.
const RETRY_BASE_MS: u64 = 200;

// ─────────────────────────────────────────────
// AdapterManager
// ─────────────────────────────────────────────

/// Holds `Arc<dyn Adapter>` keyed by channel_id for the process lifetime
/// and routes bus outbound traffic to the owning adapter.
pub struct AdapterManager {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    bus: Arc<MessageBus>,
    events: EventStore,
    rate_limit: RateLimitStore,
    enforcer: Arc<PolicyEnforcer>,
    max_attempts: u32,
    shutdown: Arc<Notify>,
}

impl AdapterManager {
    pub fn new(
        bus: Arc<MessageBus>,
        events: EventStore,
        rate_limit: RateLimitStore,
        enforcer: Arc<PolicyEnforcer>,
        max_attempts: u32,
    ) -> Self {
        AdapterManager {
            adapters: HashMap::new(),
            bus,
            events,
            rate_limit,
            enforcer,
            max_attempts: max_attempts.max(1),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register an adapter. Overwrites any previous adapter with the same id.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        let id = adapter.channel_id().to_string();
        info!(channel = %id, "registered adapter");
        self.adapters.insert(id, adapter);
    }

    /// Unregister an adapter by channel id.
    pub fn unregister(&mut self, channel_id: &str) -> Option<Arc<dyn Adapter>> {
        let removed = self.adapters.remove(channel_id);
        if removed.is_some() {
            info!(channel = %channel_id, "unregistered adapter");
        }
        removed
    }

    /// Get a registered adapter.
    pub fn get(&self, channel_id: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.get(channel_id)
    }

    /// Channel ids of all registered adapters, sorted.
    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Deliver one outbound message through the gate.
    pub async fn deliver(&self, msg: &OutboundMessage) -> KernelResult<SendReceipt> {
        let adapter = self.adapters.get(&msg.channel_id).ok_or_else(|| {
            warn!(channel = %msg.channel_id, "no adapter for outbound message, dropping");
            KernelError::new(
                ErrorCode::AdapterSendFailed,
                format!("unknown channel {}", msg.channel_id),
            )
        })?;

        // Outbound validation mirrors the inbound invariants.
        if msg.kind == MessageKind::Text && msg.text.as_deref().unwrap_or("").is_empty() {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                "outbound TEXT message with empty text",
            ));
        }

        // Outbound rate limit, keyed per conversation.
        let limit = self
            .enforcer
            .policy_for(&msg.channel_id)
            .rate_limit_per_minute;
        let admitted =
            self.rate_limit
                .check_and_record(&msg.channel_id, &msg.conversation_key, limit)?;
        if !admitted {
            self.audit(msg, "rate_limited", None)?;
            return Err(KernelError::new(
                ErrorCode::RateLimitExceeded,
                "outbound rate limit exceeded",
            ));
        }

        match self.send_with_retry(adapter, msg).await {
            Ok(receipt) => {
                self.audit(msg, "sent", receipt.provider_message_id.as_deref())?;
                Ok(receipt)
            }
            Err(err) => {
                self.events.append(
                    &ChannelEvent::outbound(&msg.channel_id, msg.reply_to_message_id.clone(), "send_failed")
                        .with_error(err.to_string()),
                )?;
                Err(err)
            }
        }
    }

    /// At most `max_attempts` tries with exponential backoff and jitter.
    /// Idempotency across retries is the adapter's responsibility via
    /// provider message-id dedupe.
    async fn send_with_retry(
        &self,
        adapter: &Arc<dyn Adapter>,
        msg: &OutboundMessage,
    ) -> KernelResult<SendReceipt> {
        let mut last_error = String::new();
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let backoff = RETRY_BASE_MS << (attempt - 1);
                let jitter = (std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.subsec_nanos())
                    .unwrap_or(0) as u64)
                    % (RETRY_BASE_MS / 2);
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            match adapter.send(msg).await {
                Ok(receipt) => {
                    debug!(
                        channel = %msg.channel_id,
                        attempt = attempt + 1,
                        "outbound message delivered"
                    );
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(
                        channel = %msg.channel_id,
                        attempt = attempt + 1,
                        error = %e,
                        "adapter send failed"
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(KernelError::new(
            ErrorCode::AdapterSendFailed,
            format!(
                "delivery failed after {} attempt(s): {last_error}",
                self.max_attempts
            ),
        ))
    }

    fn audit(
        &self,
        msg: &OutboundMessage,
        status: &str,
        provider_message_id: Option<&str>,
    ) -> KernelResult<()> {
        let mut event =
            ChannelEvent::outbound(&msg.channel_id, msg.reply_to_message_id.clone(), status);
        if let Some(id) = provider_message_id {
            event = event.with_metadata(serde_json::json!({ "provider_message_id": id }));
        }
        self.events.append(&event)?;
        Ok(())
    }

    /// Consume the bus outbound queue until shutdown.
    pub async fn run(&self) {
        info!("outbound dispatcher started");
        loop {
            tokio::select! {
                msg = self.bus.next_outbound() => {
                    match msg {
                        Some(outbound) => {
                            if let Err(e) = self.deliver(&outbound).await {
                                error!(
                                    channel = %outbound.channel_id,
                                    code = %e.code,
                                    "outbound delivery failed"
                                );
                            }
                        }
                        None => {
                            info!("outbound bus closed, dispatcher exiting");
                            break;
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("outbound dispatcher received shutdown signal");
                    break;
                }
            }
        }
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::MockAdapter;
    use agentos_core::policy::SecurityPolicy;
    use agentos_core::store::{Db, ViolationStore};

    fn manager_with(adapter: Arc<MockAdapter>, attempts: u32) -> (AdapterManager, Db) {
        let db = Db::in_memory().unwrap();
        let enforcer = Arc::new(
            PolicyEnforcer::new(
                SecurityPolicy::default(),
                Arc::new(ViolationStore::new(db.clone())),
            )
            .unwrap(),
        );
        let mut manager = AdapterManager::new(
            Arc::new(MessageBus::new(16)),
            EventStore::new(db.clone()),
            RateLimitStore::new(db.clone()),
            enforcer,
            attempts,
        );
        manager.register(adapter);
        (manager, db)
    }

    #[tokio::test]
    async fn test_deliver_success_audited() {
        let adapter = Arc::new(MockAdapter::new("mock-1"));
        let (manager, db) = manager_with(adapter.clone(), 3);

        let receipt = manager
            .deliver(&OutboundMessage::text("mock-1", "c-1", "hello"))
            .await
            .unwrap();
        assert!(receipt.provider_message_id.is_some());
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);

        let events = EventStore::new(db).recent("mock-1", 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "sent");
    }

    #[tokio::test]
    async fn test_unknown_channel_dropped() {
        let (manager, _) = manager_with(Arc::new(MockAdapter::new("mock-1")), 3);
        let err = manager
            .deliver(&OutboundMessage::text("ghost", "c-1", "hello"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterSendFailed);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let adapter = Arc::new(MockAdapter::failing_first("mock-1", 2));
        let (manager, _) = manager_with(adapter.clone(), 3);

        let receipt = manager
            .deliver(&OutboundMessage::text("mock-1", "c-1", "retry me"))
            .await
            .unwrap();
        assert!(receipt.provider_message_id.is_some());
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let adapter = Arc::new(MockAdapter::failing_first("mock-1", 10));
        let (manager, db) = manager_with(adapter, 2);

        let err = manager
            .deliver(&OutboundMessage::text("mock-1", "c-1", "doomed"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::AdapterSendFailed);

        let events = EventStore::new(db).recent("mock-1", 10).unwrap();
        assert_eq!(events[0].status, "send_failed");
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let (manager, _) = manager_with(Arc::new(MockAdapter::new("mock-1")), 3);
        let mut msg = OutboundMessage::text("mock-1", "c-1", "x");
        msg.text = Some(String::new());
        let err = manager.deliver(&msg).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalid);
    }

    #[tokio::test]
    async fn test_outbound_rate_limit() {
        let adapter = Arc::new(MockAdapter::new("mock-1"));
        let db = Db::in_memory().unwrap();
        let enforcer = Arc::new(
            PolicyEnforcer::new(
                SecurityPolicy {
                    rate_limit_per_minute: 1,
                    ..Default::default()
                },
                Arc::new(ViolationStore::new(db.clone())),
            )
            .unwrap(),
        );
        let mut manager = AdapterManager::new(
            Arc::new(MessageBus::new(16)),
            EventStore::new(db.clone()),
            RateLimitStore::new(db),
            enforcer,
            3,
        );
        manager.register(adapter);

        manager
            .deliver(&OutboundMessage::text("mock-1", "c-1", "first"))
            .await
            .unwrap();
        let err = manager
            .deliver(&OutboundMessage::text("mock-1", "c-1", "second"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn test_register_unregister() {
        let (mut manager, _) = manager_with(Arc::new(MockAdapter::new("mock-1")), 3);
        assert_eq!(manager.channel_ids(), vec!["mock-1"]);
        assert!(manager.unregister("mock-1").is_some());
        assert!(manager.is_empty());
        assert!(manager.unregister("mock-1").is_none());
    }
}
