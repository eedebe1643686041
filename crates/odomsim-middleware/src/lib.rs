//! `odomsim-middleware` – transport plumbing around the pose estimator.
//!
//! Routes velocity commands, reset requests and pose broadcasts without
//! caring about what they mean.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`service`] – request/response channels: a cloneable
//!   [`ServiceClient`] and a single [`ServiceServer`] that answers calls.
//! - [`sink`] – the [`TransformSink`] seam and the bus-backed
//!   [`TransformBroadcaster`].
//! - [`ros2_bridge`] – rosbridge-style WebSocket endpoint translating JSON
//!   `publish` / `call_service` frames onto the bus and service channels.

pub mod bus;
pub mod ros2_bridge;
pub mod service;
pub mod sink;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ros2_bridge::Ros2Bridge;
pub use service::{service_channel, ServiceCall, ServiceClient, ServiceServer};
pub use sink::{TransformBroadcaster, TransformSink};
