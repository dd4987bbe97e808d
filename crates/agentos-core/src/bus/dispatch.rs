//! Inbound pipeline and per-conversation dispatch.
//!
//! Each inbound message is processed on one worker for the full middleware
//! chain. Accepted messages are routed to a per-`conversation_key` queue so
//! dialogue order is preserved within a conversation; across conversations
//! there is no ordering guarantee. Idle conversation queues are
//! garbage-collected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::queue::MessageBus;
use crate::error::KernelError;
use crate::middleware::{Disposition, MiddlewareChain};
use crate::types::InboundMessage;

/// How long a conversation queue may sit idle before collection.
pub const CONVERSATION_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

/// Queue depth per conversation.
const CONVERSATION_QUEUE_DEPTH: usize = 64;

// ─────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────

/// Business logic entry point for accepted messages.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()>;
}

/// What the pipeline did with one message; adapters map this to their
/// protocol status (e.g. RATE_LIMIT_EXCEEDED → 429-equivalent).
#[derive(Debug)]
pub enum InboundReceipt {
    Dispatched,
    Duplicate,
    Rejected(KernelError),
}

// ─────────────────────────────────────────────
// Conversation router
// ─────────────────────────────────────────────

struct ConversationQueue {
    tx: mpsc::Sender<InboundMessage>,
    last_used: Instant,
}

/// Routes accepted messages into per-conversation worker queues.
pub struct ConversationRouter {
    handler: Arc<dyn InboundHandler>,
    queues: Mutex<HashMap<String, ConversationQueue>>,
    idle_ttl: Duration,
}

impl ConversationRouter {
    pub fn new(handler: Arc<dyn InboundHandler>) -> Self {
        Self::with_idle_ttl(handler, CONVERSATION_IDLE_TTL)
    }

    pub fn with_idle_ttl(handler: Arc<dyn InboundHandler>, idle_ttl: Duration) -> Self {
        ConversationRouter {
            handler,
            queues: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Enqueue a message on its conversation's queue, creating the queue
    /// (and its worker task) on demand.
    pub async fn route(&self, msg: InboundMessage) {
        let key = msg.session_key();
        let mut queues = self.queues.lock().await;

        let queue = queues.entry(key.clone()).or_insert_with(|| {
            debug!(conversation = %key, "creating conversation queue");
            let (tx, mut rx) = mpsc::channel::<InboundMessage>(CONVERSATION_QUEUE_DEPTH);
            let handler = self.handler.clone();
            let worker_key = key.clone();
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if let Err(e) = handler.handle(msg).await {
                        error!(conversation = %worker_key, error = %e, "handler failed");
                    }
                }
                debug!(conversation = %worker_key, "conversation worker exiting");
            });
            ConversationQueue {
                tx,
                last_used: Instant::now(),
            }
        });

        queue.last_used = Instant::now();
        if queue.tx.send(msg).await.is_err() {
            // Worker died; drop the stale queue so the next message recreates it.
            warn!(conversation = %key, "conversation worker gone, dropping queue");
            queues.remove(&key);
        }
    }

    /// Drop queues idle for longer than the TTL. Returns how many were
    /// collected. Closing the sender ends the worker task.
    pub async fn collect_idle(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let before = queues.len();
        let ttl = self.idle_ttl;
        queues.retain(|key, q| {
            let keep = q.last_used.elapsed() < ttl;
            if !keep {
                debug!(conversation = %key, "collecting idle conversation queue");
            }
            keep
        });
        before - queues.len()
    }

    /// Number of live conversation queues.
    pub async fn len(&self) -> usize {
        self.queues.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.queues.lock().await.is_empty()
    }
}

// ─────────────────────────────────────────────
// Inbound pipeline
// ─────────────────────────────────────────────

/// Consumes the bus inbound queue, runs the chain, and dispatches.
pub struct InboundPipeline {
    bus: Arc<MessageBus>,
    chain: Arc<MiddlewareChain>,
    router: Arc<ConversationRouter>,
    shutdown: Arc<Notify>,
}

impl InboundPipeline {
    pub fn new(
        bus: Arc<MessageBus>,
        chain: Arc<MiddlewareChain>,
        router: Arc<ConversationRouter>,
    ) -> Self {
        InboundPipeline {
            bus,
            chain,
            router,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Process a single message synchronously and report the receipt.
    ///
    /// Adapters that need the disposition (webhook status codes) call this
    /// directly instead of publishing to the bus.
    pub async fn process(&self, msg: InboundMessage) -> InboundReceipt {
        if let Err(err) = msg.validate() {
            warn!(channel = %msg.channel_id, code = %err.code, "invalid inbound message");
            return InboundReceipt::Rejected(err);
        }

        let verdict = self.chain.run(msg).await;
        match verdict.disposition {
            Disposition::Dispatch => {
                self.router.route(verdict.message).await;
                InboundReceipt::Dispatched
            }
            Disposition::Duplicate => InboundReceipt::Duplicate,
            Disposition::Rejected(err) => InboundReceipt::Rejected(err),
        }
    }

    /// Run the pipeline until shutdown: consume from the bus, process,
    /// and periodically collect idle conversation queues.
    pub async fn run(&self) {
        info!("inbound pipeline started");
        let mut gc_tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                msg = self.bus.next_inbound() => {
                    match msg {
                        Some(msg) => {
                            let _ = self.process(msg).await;
                        }
                        None => {
                            info!("inbound bus closed, pipeline exiting");
                            break;
                        }
                    }
                }
                _ = gc_tick.tick() => {
                    let collected = self.router.collect_idle().await;
                    if collected > 0 {
                        debug!(collected, "collected idle conversation queues");
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("inbound pipeline received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Signal the pipeline to stop.
    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
