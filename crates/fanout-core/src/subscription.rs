//! Subscriber endpoints.
//!
//! Every subscription is a bounded single-producer/single-consumer queue.
//! The registry keeps the sending half as a fan-out target and hands the
//! receiving half to the caller as a [`Subscription`]. Dropping the
//! `Subscription` closes the queue, which is how the registry learns that
//! the reader is gone.

use crate::message::Message;
use futures_util::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

pub use tokio::sync::mpsc::error::TryRecvError;

/// A process-unique subscriber identifier.
pub type SubscriberId = u64;

static SUBSCRIBER_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_subscriber_id() -> SubscriberId {
    SUBSCRIBER_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Result of handing a message to a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handoff {
    /// Queued in the endpoint buffer.
    Delivered,
    /// Buffer full; the message was not queued.
    Full,
    /// The reader is gone.
    Closed,
}

/// Sending half of a subscriber endpoint, owned by the registry.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    id: SubscriberId,
    sender: mpsc::Sender<Arc<Message>>,
}

impl Endpoint {
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    /// Hand a message to this endpoint without waiting.
    pub(crate) fn offer(&self, message: &Arc<Message>) -> Handoff {
        match self.sender.try_send(Arc::clone(message)) {
            Ok(()) => Handoff::Delivered,
            Err(TrySendError::Full(_)) => Handoff::Full,
            Err(TrySendError::Closed(_)) => Handoff::Closed,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Create a connected endpoint/subscription pair.
///
/// `capacity` must be non-zero.
pub(crate) fn endpoint(topic: &str, capacity: usize) -> (Endpoint, Subscription) {
    let (sender, receiver) = mpsc::channel(capacity);
    let id = next_subscriber_id();
    (
        Endpoint { id, sender },
        Subscription {
            id,
            topic: topic.to_string(),
            receiver,
        },
    )
}

/// Receiving half of a subscriber endpoint.
///
/// Exactly one reader owns a subscription. Messages arrive in publish order
/// for its topic. The stream ends (`recv` returns `None`) once the registry
/// has let go of the endpoint and the buffer is drained.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    receiver: mpsc::Receiver<Arc<Message>>,
}

impl Subscription {
    /// Get the subscriber ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Get the topic this subscription is registered under.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.receiver.recv().await
    }

    /// Take the next message if one is already buffered.
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::Empty` if nothing is buffered and
    /// `TryRecvError::Disconnected` once the endpoint has been pruned.
    pub fn try_recv(&mut self) -> Result<Arc<Message>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Stop accepting new messages.
    ///
    /// Already buffered messages can still be received. The registry
    /// removes the endpoint the next time it touches it.
    pub fn close(&mut self) {
        trace!(topic = %self.topic, subscriber = self.id, "Subscription closed");
        self.receiver.close();
    }

    /// Convert into a stream of messages.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Message>> + Send + 'static {
        futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|msg| (msg, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[test]
    fn test_endpoint_ids_are_unique() {
        let (a, sub_a) = endpoint("t", 1);
        let (b, sub_b) = endpoint("t", 1);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), sub_a.id());
        assert_eq!(b.id(), sub_b.id());
        assert_eq!(sub_a.topic(), "t");
    }

    #[test]
    fn test_offer_full_and_closed() {
        let (ep, mut sub) = endpoint("t", 1);
        let msg = Arc::new(Message::new("t", "a"));

        assert_eq!(ep.offer(&msg), Handoff::Delivered);
        assert_eq!(ep.offer(&msg), Handoff::Full);
        assert_eq!(sub.try_recv().unwrap().text(), "a");

        drop(sub);
        assert!(ep.is_closed());
        assert_eq!(ep.offer(&msg), Handoff::Closed);
    }

    #[test]
    fn test_close_keeps_buffered_messages() {
        let (ep, mut sub) = endpoint("t", 4);
        let msg = Arc::new(Message::new("t", "kept"));
        assert_eq!(ep.offer(&msg), Handoff::Delivered);

        sub.close();
        assert!(ep.is_closed());
        assert_eq!(ep.offer(&msg), Handoff::Closed);
        assert_eq!(sub.try_recv().unwrap().text(), "kept");
    }

    #[tokio::test]
    async fn test_stream_ends_when_endpoint_dropped() {
        let (ep, sub) = endpoint("t", 4);
        ep.offer(&Arc::new(Message::new("t", "one")));
        ep.offer(&Arc::new(Message::new("t", "two")));
        drop(ep);

        let texts: Vec<String> = sub
            .into_stream()
            .map(|m| m.text().into_owned())
            .collect()
            .await;
        assert_eq!(texts, vec!["one", "two"]);
    }
}
