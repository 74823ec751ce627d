//! Message type carried through the registry.
//!
//! A published message is allocated once and shared as `Arc<Message>` by
//! every endpoint it is fanned out to.

use bytes::Bytes;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A message published to a topic.
#[derive(Debug, Clone)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// Topic the message was published to.
    pub topic: String,
    /// Uninterpreted payload.
    pub payload: Bytes,
    /// Milliseconds since the Unix epoch at creation.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            topic: topic.into(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get the payload size in bytes.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
