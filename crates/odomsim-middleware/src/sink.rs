//! Transform output seam.
//!
//! The pose estimator never talks to a transport directly.  Every successful
//! integration tick hands its [`TransformStamped`] to a [`TransformSink`];
//! what happens next (bus broadcast, WebSocket, a test recorder) is the
//! sink's business.

use std::sync::Arc;

use async_trait::async_trait;
use odomsim_types::{Event, EventPayload, OdomError, TransformStamped};
use tracing::trace;

use crate::bus::{EventBus, Topic};

/// Anything that accepts timestamped rigid transforms.
///
/// # Contract
///
/// * Called from the timer task after the estimator lock has been released,
///   so an implementation may block on I/O without stalling command
///   ingestion or resets.
/// * Errors are reported to the caller, which logs them; a failing sink never
///   stops the integrator.
#[async_trait]
pub trait TransformSink: Send + Sync {
    async fn send_transform(&self, transform: TransformStamped) -> Result<(), OdomError>;
}

/// Sink that broadcasts on [`Topic::Tf`].
///
/// Broadcasting with no listeners is normal for TF (nobody may be looking
/// yet), so that case is not an error.
#[derive(Clone, Debug)]
pub struct TransformBroadcaster {
    bus: Arc<EventBus>,
    source: String,
}

impl TransformBroadcaster {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            source: "odomsim-middleware::tf_broadcaster".to_string(),
        }
    }

    /// Override the `source` tag stamped on every published event.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

#[async_trait]
impl TransformSink for TransformBroadcaster {
    async fn send_transform(&self, transform: TransformStamped) -> Result<(), OdomError> {
        if self.bus.subscriber_count(Topic::Tf) == 0 {
            trace!(child = %transform.child_frame_id, "no /tf listeners, dropping transform");
            return Ok(());
        }
        let event = Event::new(self.source.clone(), EventPayload::Transform(transform));
        match self.bus.publish_to(Topic::Tf, event) {
            Ok(_) => Ok(()),
            // The last listener left between the count and the send.
            Err(OdomError::Channel(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
