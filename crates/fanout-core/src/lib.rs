//! # fanout-core
//!
//! Topic-based broadcast registry for the Fanout pub/sub server.
//!
//! This crate provides the in-memory core:
//!
//! - **Registry** - Topic to subscriber mapping and publish fan-out
//! - **Topic** - Ordered endpoint list for one topic
//! - **Subscription** - Bounded receiving end of one subscriber endpoint
//! - **Message** - Shared message type
//!
//! Delivery is at-most-once and best-effort. Publishing never waits for a
//! subscriber: every endpoint has a bounded buffer, and a full buffer is
//! handled by the configured [`OverflowPolicy`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ publish ┌─────────────┐ try_send ┌──────────────┐
//! │  Publisher  │────────▶│  Registry   │─────────▶│ Subscription │──▶ transport
//! └─────────────┘         └─────────────┘   (×N)   └──────────────┘
//!                                │
//!                                ▼
//!                         ┌─────────────┐
//!                         │   Reaper    │
//!                         └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use fanout_core::Registry;
//!
//! let registry = Registry::new();
//! let mut sub = registry.subscribe("news");
//!
//! registry.publish("news", "hello");
//! assert_eq!(sub.try_recv().unwrap().text(), "hello");
//! ```

pub mod message;
pub mod registry;
pub mod subscription;
pub mod topic;

pub use message::{Message, MessageId};
pub use registry::{
    spawn_reaper, spawn_reaper_with, OverflowPolicy, PublishReport, Registry, RegistryConfig,
    RegistryError, RegistryStats,
};
pub use subscription::{SubscriberId, Subscription, TryRecvError};
pub use topic::{Topic, TopicId};
