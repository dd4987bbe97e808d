//! Canonical event model — the records every channel event is normalized to.
//!
//! Adapters produce [`InboundMessage`]s, business logic produces
//! [`OutboundMessage`]s; both are immutable once created. The type-dependent
//! invariants (TEXT carries text, media types carry attachments, LOCATION
//! carries a point) are enforced by [`InboundMessage::validate`] before a
//! message may enter the middleware chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ErrorCode, KernelError, KernelResult};

// ─────────────────────────────────────────────
// Message kind
// ─────────────────────────────────────────────

/// What kind of payload a message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    File,
    Location,
    Interactive,
    System,
}

impl MessageKind {
    /// Kinds whose invariant requires at least one attachment.
    pub fn requires_attachments(&self) -> bool {
        matches!(
            self,
            MessageKind::Image | MessageKind::Audio | MessageKind::Video | MessageKind::File
        )
    }
}

// ─────────────────────────────────────────────
// Payload fragments
// ─────────────────────────────────────────────

/// A media attachment referenced by a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type (e.g. "image/jpeg", "audio/ogg").
    pub mime_type: String,
    /// Local file path or URL to the media.
    pub path: String,
    /// Optional filename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// File size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A geographic point attached to a LOCATION message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

// ─────────────────────────────────────────────
// InboundMessage
// ─────────────────────────────────────────────

/// An inbound event from a channel, normalized by its adapter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel instance the message arrived on.
    pub channel_id: String,
    /// Sender identity within the channel.
    pub user_key: String,
    /// Serializable unit of dialogue (user, chat, thread).
    pub conversation_key: String,
    /// Globally unique per channel; the dedupe key together with channel_id.
    pub message_id: String,
    /// Receipt time, UTC.
    pub timestamp: DateTime<Utc>,
    /// Payload kind.
    pub kind: MessageKind,
    /// Text content; required non-empty for TEXT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Media attachments; required non-empty for IMAGE/AUDIO/VIDEO/FILE.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Location; required for LOCATION.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Opaque platform payload, kept for audit.
    #[serde(default)]
    pub raw: serde_json::Value,
    /// Channel-specific metadata (provider ids, admin token, intent).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// Create a TEXT message with the minimal required fields.
    pub fn text(
        channel_id: impl Into<String>,
        user_key: impl Into<String>,
        conversation_key: impl Into<String>,
        message_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel_id: channel_id.into(),
            user_key: user_key.into(),
            conversation_key: conversation_key.into(),
            message_id: message_id.into(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            text: Some(text.into()),
            attachments: Vec::new(),
            location: None,
            raw: serde_json::Value::Null,
            metadata: HashMap::new(),
        }
    }

    /// Session key combining channel and conversation (e.g. "slack:C1:171.2").
    ///
    /// Used as the key for response-store lookup and dispatch ordering.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel_id, self.conversation_key)
    }

    /// The leading slash-command word, lowercased, if the text is a command.
    ///
    /// `"/Session new"` → `Some("/session")`.
    pub fn command_word(&self) -> Option<String> {
        let text = self.text.as_deref()?.trim_start();
        if !text.starts_with('/') {
            return None;
        }
        let word = text.split_whitespace().next().unwrap_or(text);
        Some(word.to_lowercase())
    }

    /// Enforce the type-dependent invariants.
    pub fn validate(&self) -> KernelResult<()> {
        if self.channel_id.is_empty() || self.message_id.is_empty() {
            return Err(KernelError::new(
                ErrorCode::ConfigInvalid,
                "message missing channel_id or message_id",
            ));
        }
        match self.kind {
            MessageKind::Text => {
                if self.text.as_deref().unwrap_or("").is_empty() {
                    return Err(KernelError::new(
                        ErrorCode::ConfigInvalid,
                        "TEXT message with empty text",
                    ));
                }
            }
            k if k.requires_attachments() => {
                if self.attachments.is_empty() {
                    return Err(KernelError::new(
                        ErrorCode::ConfigInvalid,
                        format!("{k:?} message without attachments"),
                    ));
                }
            }
            MessageKind::Location => {
                if self.location.is_none() {
                    return Err(KernelError::new(
                        ErrorCode::ConfigInvalid,
                        "LOCATION message without a location",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// OutboundMessage
// ─────────────────────────────────────────────

/// A reply or notification from business logic, consumed by an adapter once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target channel instance.
    pub channel_id: String,
    /// Target conversation.
    pub conversation_key: String,
    /// Payload kind.
    pub kind: MessageKind,
    /// Text content to send.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Media to send.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Inbound message this replies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    /// Delivery-option metadata (thread keys, silent flags).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Create a TEXT reply.
    pub fn text(
        channel_id: impl Into<String>,
        conversation_key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel_id: channel_id.into(),
            conversation_key: conversation_key.into(),
            kind: MessageKind::Text,
            text: Some(text.into()),
            attachments: Vec::new(),
            reply_to_message_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the message this replies to.
    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_message_id = Some(message_id.into());
        self
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
