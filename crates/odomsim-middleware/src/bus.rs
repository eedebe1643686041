//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  A slow subscriber loses the oldest messages instead of
//! stalling publishers, which matches "latest wins" command semantics.
//!
//! # Topics
//!
//! | Topic | ROS name | Typical traffic |
//! |---|---|---|
//! | [`Topic::CmdVel`] | `/cmd_vel` | Body-frame velocity commands |
//! | [`Topic::Tf`] | `/tf` | `odom → base_link` pose broadcasts |
//! | [`Topic::SystemAlerts`] | `/alerts` | Shutdown notices, faults |

use odomsim_types::{Event, OdomError};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Velocity commands consumed by the pose estimator.
    CmdVel,
    /// Transform broadcasts produced by the pose estimator.
    Tf,
    /// Operational events that are not part of the data path.
    SystemAlerts,
}

impl Topic {
    /// The ROS-style topic name used on the WebSocket bridge.
    pub fn ros_name(self) -> &'static str {
        match self {
            Topic::CmdVel => "/cmd_vel",
            Topic::Tf => "/tf",
            Topic::SystemAlerts => "/alerts",
        }
    }

    /// Inverse of [`Topic::ros_name`].
    pub fn from_ros_name(name: &str) -> Option<Self> {
        match name {
            "/cmd_vel" | "cmd_vel" => Some(Topic::CmdVel),
            "/tf" | "tf" => Some(Topic::Tf),
            "/alerts" | "alerts" => Some(Topic::SystemAlerts),
            _ => None,
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    cmd_vel: broadcast::Sender<Event>,
    tf: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (cmd_vel, _) = broadcast::channel(capacity);
        let (tf, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            cmd_vel,
            tf,
            system_alerts,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event, or
    /// [`OdomError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, OdomError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| OdomError::Channel(format!("No subscribers for topic {:?}", topic)))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topic_sender(topic).receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::CmdVel => &self.cmd_vel,
            Topic::Tf => &self.tf,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.  The caller decides whether to
    ///   continue or abort.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`TopicReceiver::recv`].
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
