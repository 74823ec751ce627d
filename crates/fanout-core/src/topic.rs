//! Per-topic subscriber lists.
//!
//! A topic is any string. It comes into existence when the first subscriber
//! registers under it; there is no validation and no explicit creation.

use crate::subscription::{endpoint, Endpoint, SubscriberId, Subscription};
use tracing::debug;

/// A topic identifier.
pub type TopicId = String;

/// The ordered list of endpoints registered under one topic.
#[derive(Debug)]
pub struct Topic {
    name: TopicId,
    endpoints: Vec<Endpoint>,
}

impl Topic {
    /// Create an empty topic.
    #[must_use]
    pub fn new(name: impl Into<TopicId>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of registered endpoints, including ones whose reader
    /// is gone but which have not been pruned yet.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if no endpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Register a new endpoint with a buffer of `capacity` messages.
    pub fn subscribe(&mut self, capacity: usize) -> Subscription {
        let (endpoint, subscription) = endpoint(&self.name, capacity);
        debug!(topic = %self.name, subscriber = endpoint.id(), "Endpoint registered");
        self.endpoints.push(endpoint);
        subscription
    }

    /// Remove one endpoint.
    ///
    /// Returns `true` if it was registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.endpoints.len();
        self.endpoints.retain(|ep| ep.id() != id);
        self.endpoints.len() != before
    }

    /// Copy the current endpoint list for fan-out.
    pub(crate) fn snapshot(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }

    /// Remove the given endpoints. Returns how many were removed.
    pub(crate) fn remove_all(&mut self, ids: &[SubscriberId]) -> usize {
        let before = self.endpoints.len();
        self.endpoints.retain(|ep| !ids.contains(&ep.id()));
        before - self.endpoints.len()
    }

    /// Remove endpoints whose reader is gone. Returns how many were removed.
    pub fn prune_closed(&mut self) -> usize {
        let before = self.endpoints.len();
        self.endpoints.retain(|ep| !ep.is_closed());
        let removed = before - self.endpoints.len();
        if removed > 0 {
            debug!(topic = %self.name, removed, "Pruned closed endpoints");
        }
        removed
    }
}
