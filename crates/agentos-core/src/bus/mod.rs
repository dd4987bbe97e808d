//! Message bus — queues between adapters, the kernel, and business logic.

pub mod dispatch;
pub mod queue;

pub use dispatch::{ConversationRouter, InboundHandler, InboundPipeline, InboundReceipt};
pub use queue::MessageBus;
