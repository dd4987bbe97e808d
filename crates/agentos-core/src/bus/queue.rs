//! Message bus — the kernel's admission boundary.
//!
//! Adapters and business logic do not get raw queue handles; they submit
//! through the bus, which enforces the event-model invariants before a
//! message may enter the kernel. Webhook handlers answering a provider
//! deadline use the non-blocking submit: a saturated queue drops the
//! message (backpressure, never unbounded buffering) and the drop is
//! counted for operators.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{ErrorCode, KernelError, KernelResult};
use crate::types::{InboundMessage, MessageKind, OutboundMessage};

/// Bounded queues between adapters, the inbound pipeline, and the
/// outbound dispatcher.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
    /// Inbound messages shed by `try_submit_inbound` on a full queue.
    inbound_dropped: AtomicU64,
}

impl MessageBus {
    /// Create a bus whose queues hold at most `buffer_size` messages.
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            inbound_dropped: AtomicU64::new(0),
        }
    }

    /// Submit a channel event into the kernel, waiting for queue space.
    ///
    /// The event-model invariants are enforced here: a malformed message
    /// never enters the queue, and the submitting adapter gets the
    /// structured rejection.
    pub async fn submit_inbound(&self, msg: InboundMessage) -> KernelResult<()> {
        msg.validate()?;
        self.inbound_tx.send(msg).await.map_err(|_| bus_closed())
    }

    /// Non-blocking submit for handlers on a provider deadline.
    ///
    /// A full queue sheds the message instead of stalling the webhook;
    /// the caller still answers the provider's expected success status
    /// and the drop shows up in [`MessageBus::inbound_dropped`].
    pub fn try_submit_inbound(&self, msg: InboundMessage) -> KernelResult<()> {
        msg.validate()?;
        match self.inbound_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.inbound_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = %dropped.channel_id,
                    message_id = %dropped.message_id,
                    "inbound queue full, shedding message"
                );
                Err(KernelError::new(
                    ErrorCode::Unknown,
                    "inbound queue is full, message shed",
                ))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(bus_closed()),
        }
    }

    /// Submit a reply from business logic toward a channel.
    ///
    /// Mirrors the inbound boundary: an empty TEXT reply is rejected
    /// before it can reach an adapter.
    pub async fn submit_outbound(&self, msg: OutboundMessage) -> KernelResult<()> {
        if msg.kind == MessageKind::Text && msg.text.as_deref().unwrap_or("").is_empty() {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                "outbound TEXT message with empty text",
            ));
        }
        self.outbound_tx.send(msg).await.map_err(|_| bus_closed())
    }

    /// Next admitted inbound message; `None` once the bus is closed.
    /// Consumed by the inbound pipeline only.
    pub async fn next_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// Next outbound message; `None` once the bus is closed.
    /// Consumed by the adapter manager only.
    pub async fn next_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// How many inbound messages have been shed on a full queue.
    pub fn inbound_dropped(&self) -> u64 {
        self.inbound_dropped.load(Ordering::Relaxed)
    }
}

fn bus_closed() -> KernelError {
    KernelError::new(ErrorCode::Unknown, "message bus is closed")
}
