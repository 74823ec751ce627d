//! The broadcast registry.
//!
//! The registry maps topic names to the endpoints subscribed to them and
//! fans published messages out to every endpoint of a topic.

use crate::message::Message;
use crate::subscription::{Handoff, SubscriberId, Subscription};
use crate::topic::{Topic, TopicId};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Default number of messages buffered per endpoint.
pub const DEFAULT_ENDPOINT_CAPACITY: usize = 256;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid configuration value.
    #[error("Invalid registry configuration: {0}")]
    InvalidConfig(&'static str),
}

/// What happens when a subscriber's buffer is full at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the message being published for that subscriber only.
    #[default]
    DropNewest,
    /// Treat the subscriber as too slow and remove its endpoint.
    Disconnect,
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Messages buffered per endpoint before the overflow policy applies.
    pub endpoint_capacity: usize,
    /// Overflow policy for full endpoints.
    pub overflow: OverflowPolicy,
    /// Whether to discard a topic's list once its last endpoint is pruned.
    pub prune_empty_topics: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint_capacity: DEFAULT_ENDPOINT_CAPACITY,
            overflow: OverflowPolicy::default(),
            prune_empty_topics: true,
        }
    }
}

impl RegistryConfig {
    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoint_capacity` is zero.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.endpoint_capacity == 0 {
            return Err(RegistryError::InvalidConfig(
                "endpoint_capacity must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Endpoints the message was queued on.
    pub delivered: usize,
    /// Endpoints whose buffer was full.
    pub dropped: usize,
    /// Endpoints whose reader was gone.
    pub closed: usize,
    /// Endpoints removed from the topic during this publish.
    pub pruned: usize,
}

impl PublishReport {
    /// Number of endpoints in the fan-out snapshot.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// The broadcast registry.
///
/// Each topic's endpoint list sits behind one shard lock of the map, so a
/// subscribe and a publish on the same topic never interleave, while
/// unrelated topics do not contend. Publish holds the lock only while it
/// copies the list; delivery happens outside it and never waits on a reader.
pub struct Registry {
    topics: DashMap<TopicId, Topic>,
    config: RegistryConfig,
}

impl Registry {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    ///
    /// A zero `endpoint_capacity` is raised to one.
    #[must_use]
    pub fn with_config(mut config: RegistryConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Adjusting registry configuration");
            config.endpoint_capacity = 1;
        }
        info!("Creating registry with config: {:?}", config);
        Self {
            topics: DashMap::new(),
            config,
        }
    }

    /// Get the active configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Subscribe to a topic.
    ///
    /// Any string is a valid topic; the first subscriber creates it. The
    /// returned subscription receives every message published to `topic`
    /// after this call returns.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut entry = self.topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic = %topic, "Creating topic");
            Topic::new(topic)
        });

        let subscription = entry.subscribe(self.config.endpoint_capacity);

        debug!(
            topic = %topic,
            subscriber = subscription.id(),
            subscribers = entry.subscriber_count(),
            "Subscribed"
        );

        subscription
    }

    /// Remove one subscriber explicitly.
    ///
    /// Returns `true` if it was registered under `topic`. Dropping the
    /// [`Subscription`] has the same effect lazily.
    pub fn unsubscribe(&self, topic: &str, id: SubscriberId) -> bool {
        self.remove_from(topic, |t| usize::from(t.unsubscribe(id))) > 0
    }

    /// Publish a payload to a topic.
    ///
    /// Publishing to a topic without subscribers is a no-op. The call
    /// returns once the message has been offered to every subscriber; it
    /// never waits for one to read.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> PublishReport {
        self.publish_message(Message::new(topic, payload))
    }

    /// Publish a pre-built message to its topic.
    pub fn publish_message(&self, message: Message) -> PublishReport {
        let snapshot = match self.topics.get(message.topic.as_str()) {
            Some(entry) => entry.snapshot(),
            None => {
                trace!(topic = %message.topic, "Publish to topic without subscribers");
                return PublishReport::default();
            }
        };

        let message = Arc::new(message);
        let mut report = PublishReport::default();
        let mut dead = Vec::new();

        for endpoint in &snapshot {
            match endpoint.offer(&message) {
                Handoff::Delivered => report.delivered += 1,
                Handoff::Full => {
                    report.dropped += 1;
                    match self.config.overflow {
                        OverflowPolicy::DropNewest => {
                            debug!(
                                topic = %message.topic,
                                subscriber = endpoint.id(),
                                "Subscriber buffer full, message dropped"
                            );
                        }
                        OverflowPolicy::Disconnect => {
                            warn!(
                                topic = %message.topic,
                                subscriber = endpoint.id(),
                                "Subscriber buffer full, disconnecting"
                            );
                            dead.push(endpoint.id());
                        }
                    }
                }
                Handoff::Closed => {
                    report.closed += 1;
                    dead.push(endpoint.id());
                }
            }
        }

        if !dead.is_empty() {
            report.pruned = self.remove_from(&message.topic, |t| t.remove_all(&dead));
        }

        trace!(
            topic = %message.topic,
            id = message.id,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            pruned = report.pruned,
            "Published message"
        );

        report
    }

    /// Remove every endpoint whose reader is gone.
    ///
    /// Returns the number of endpoints removed.
    pub fn prune(&self) -> usize {
        let prune_empty = self.config.prune_empty_topics;
        let mut removed = 0;

        self.topics.retain(|_, topic| {
            removed += topic.prune_closed();
            let discard = prune_empty && topic.is_empty();
            if discard {
                debug!(topic = %topic.name(), "Removed empty topic");
            }
            !discard
        });

        if removed > 0 {
            debug!(removed, "Pruned closed endpoints");
        }
        removed
    }

    /// Apply `remove` to a topic's list under its lock, then discard the
    /// topic if that left it empty.
    fn remove_from(&self, topic: &str, remove: impl FnOnce(&mut Topic) -> usize) -> usize {
        let Some(mut entry) = self.topics.get_mut(topic) else {
            return 0;
        };
        let removed = remove(entry.value_mut());
        let empty = entry.is_empty();
        drop(entry);

        if empty && self.config.prune_empty_topics {
            // Re-checked under the lock: a subscriber may have arrived.
            if self.topics.remove_if(topic, |_, t| t.is_empty()).is_some() {
                debug!(topic = %topic, "Removed empty topic");
            }
        }

        removed
    }

    /// Check if a topic has a subscriber list.
    #[must_use]
    pub fn topic_exists(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get the number of endpoints registered under a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|t| t.subscriber_count())
            .unwrap_or(0)
    }

    /// Get all topic names.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            topic_count: self.topics.len(),
            subscriber_count: self.topics.iter().map(|t| t.subscriber_count()).sum(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of topics with a subscriber list.
    pub topic_count: usize,
    /// Number of registered endpoints across all topics.
    pub subscriber_count: usize,
}

/// Shortest period accepted by [`spawn_reaper`]; shorter ones are raised to it.
pub const MIN_REAP_PERIOD: Duration = Duration::from_millis(1);

/// Spawn a task that calls [`Registry::prune`] every `period`.
///
/// The task exits on its own once the registry is dropped. A `period`
/// below [`MIN_REAP_PERIOD`] is raised to it.
pub fn spawn_reaper(registry: &Arc<Registry>, period: Duration) -> JoinHandle<()> {
    spawn_reaper_with(registry, period, |_, _| {})
}

/// Like [`spawn_reaper`], but calls `on_sweep` after every sweep with the
/// number of endpoints removed and the registry statistics that remain.
pub fn spawn_reaper_with<F>(
    registry: &Arc<Registry>,
    period: Duration,
    mut on_sweep: F,
) -> JoinHandle<()>
where
    F: FnMut(usize, RegistryStats) + Send + 'static,
{
    let registry: Weak<Registry> = Arc::downgrade(registry);
    let period = period.max(MIN_REAP_PERIOD);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(live) = registry.upgrade() else {
                debug!("Registry dropped, stopping reaper");
                break;
            };
            let pruned = live.prune();
            on_sweep(pruned, live.stats());
        }
    })
}
