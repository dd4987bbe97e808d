//! Adapter trait — the narrow contract every channel integration implements.
//!
//! The kernel consumes this trait; it never sees provider SDKs. An adapter:
//! - `verify()` — transport-specific signature/secret verification
//! - `parse()` — normalize a provider payload into an [`InboundMessage`];
//!   `None` is a benign drop (bot echo, edit, unsupported type)
//! - `send()` — deliver an outbound message, returning the provider id
//! - `handle_url_verification()` — optional challenge/response handshakes

use std::collections::HashMap;

use async_trait::async_trait;

use agentos_core::types::{InboundMessage, OutboundMessage};

/// Result of a successful adapter send.
#[derive(Clone, Debug, Default)]
pub struct SendReceipt {
    /// Provider-assigned message id, used for provider-side dedupe.
    pub provider_message_id: Option<String>,
}

/// Every channel integration implements this trait.
///
/// The [`crate::manager::AdapterManager`] holds `Arc<dyn Adapter>` keyed by
/// `channel_id` and owns the handles for the process lifetime.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The channel instance this adapter serves.
    ///
    /// Must match `InboundMessage.channel_id` / `OutboundMessage.channel_id`.
    fn channel_id(&self) -> &str;

    /// Transport-specific request authentication (signature, shared secret).
    fn verify(&self, headers: &HashMap<String, String>, body: &[u8]) -> bool;

    /// Normalize a provider payload.
    ///
    /// `Ok(None)` indicates a benign drop — bot echoes, edits, and event
    /// types the channel does not support produce no downstream records.
    fn parse(&self, body: &[u8]) -> anyhow::Result<Option<InboundMessage>>;

    /// Deliver an outbound message to the provider.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<SendReceipt>;

    /// Challenge/response handshake (Slack-style URL verification).
    /// Returns the challenge to echo, or `None` when the body is not one.
    fn handle_url_verification(&self, _body: &serde_json::Value) -> Option<String> {
        None
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scriptable adapter shared by the crate's tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub struct MockAdapter {
        pub id: String,
        pub secret: String,
        pub sent: Arc<Mutex<Vec<OutboundMessage>>>,
        /// Number of leading `send` calls that fail with a transient error.
        pub fail_first: AtomicUsize,
    }

    impl MockAdapter {
        pub fn new(id: &str) -> Self {
            MockAdapter {
                id: id.to_string(),
                secret: "mock-secret".to_string(),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_first: AtomicUsize::new(0),
            }
        }

        pub fn failing_first(id: &str, failures: usize) -> Self {
            let adapter = Self::new(id);
            adapter.fail_first.store(failures, Ordering::SeqCst);
            adapter
        }
    }

    #[async_trait]
    impl Adapter for MockAdapter {
        fn channel_id(&self) -> &str {
            &self.id
        }

        fn verify(&self, headers: &HashMap<String, String>, _body: &[u8]) -> bool {
            headers.get("x-mock-secret").map(String::as_str) == Some(self.secret.as_str())
        }

        fn parse(&self, body: &[u8]) -> anyhow::Result<Option<InboundMessage>> {
            let value: serde_json::Value = serde_json::from_slice(body)?;
            // Bot echoes are dropped silently.
            if value["from"]["is_bot"].as_bool().unwrap_or(false) {
                return Ok(None);
            }
            let text = value["text"].as_str().unwrap_or_default();
            if text.is_empty() {
                return Ok(None);
            }
            Ok(Some(InboundMessage::text(
                self.id.clone(),
                value["from"]["id"].as_str().unwrap_or("anon"),
                value["conversation"].as_str().unwrap_or("default"),
                value["message_id"].as_str().unwrap_or("m-0"),
                text,
            )))
        }

        async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<SendReceipt> {
            let remaining = self.fail_first.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_first.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("transient provider error");
            }
            self.sent.lock().unwrap().push(msg.clone());
            Ok(SendReceipt {
                provider_message_id: Some(format!("prov-{}", self.sent.lock().unwrap().len())),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockAdapter;
    use super::*;

    #[test]
    fn test_verify_checks_secret_header() {
        let adapter = MockAdapter::new("mock-1");
        let mut headers = HashMap::new();
        headers.insert("x-mock-secret".to_string(), "mock-secret".to_string());
        assert!(adapter.verify(&headers, b"{}"));

        headers.insert("x-mock-secret".to_string(), "wrong".to_string());
        assert!(!adapter.verify(&headers, b"{}"));
    }

    #[test]
    fn test_parse_normalizes() {
        let adapter = MockAdapter::new("mock-1");
        let body = serde_json::json!({
            "message_id": "m-7",
            "from": {"id": "u-1", "is_bot": false},
            "conversation": "c-9",
            "text": "hello"
        });
        let msg = adapter
            .parse(serde_json::to_vec(&body).unwrap().as_slice())
            .unwrap()
            .unwrap();
        assert_eq!(msg.channel_id, "mock-1");
        assert_eq!(msg.message_id, "m-7");
        assert_eq!(msg.conversation_key, "c-9");
    }

    #[test]
    fn test_bot_echo_dropped_silently() {
        let adapter = MockAdapter::new("mock-1");
        let body = serde_json::json!({
            "message_id": "m-8",
            "from": {"id": "bot", "is_bot": true},
            "conversation": "c-9",
            "text": "I am a bot"
        });
        let parsed = adapter
            .parse(serde_json::to_vec(&body).unwrap().as_slice())
            .unwrap();
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn test_send_records() {
        let adapter = MockAdapter::new("mock-1");
        let receipt = adapter
            .send(&OutboundMessage::text("mock-1", "c-9", "reply"))
            .await
            .unwrap();
        assert!(receipt.provider_message_id.is_some());
        assert_eq!(adapter.sent.lock().unwrap().len(), 1);
    }
}
