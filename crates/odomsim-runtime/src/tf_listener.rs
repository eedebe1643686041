//! [`TransformListener`] – a `/tf` subscriber feeding a shared [`TfEngine`].

use std::sync::{Arc, PoisonError, RwLock};

use odomsim_middleware::{EventBus, Topic, TopicReceiver};
use odomsim_perception::{TfEngine, Transform3D};
use odomsim_types::{EventPayload, Stamp};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Keeps the latest transform for every frame pair seen on [`Topic::Tf`].
///
/// Dropping the listener stops its background task.
pub struct TransformListener {
    buffer: Arc<RwLock<TfEngine>>,
    task: JoinHandle<()>,
}

impl TransformListener {
    /// Subscribe to `/tf` and start filling the buffer.  Must be called
    /// inside a Tokio runtime.
    pub fn spawn(bus: &EventBus) -> Self {
        let buffer = Arc::new(RwLock::new(TfEngine::new()));
        let rx = bus.subscribe_to(Topic::Tf);
        let task = tokio::spawn(listen(rx, Arc::clone(&buffer)));
        Self { buffer, task }
    }

    /// Composed transform from `source_frame` to `target_frame`, if the
    /// frames are connected.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Transform3D> {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(source_frame, target_frame)
    }

    /// Stamp of the newest transform on a direct edge.
    pub fn latest_stamp(&self, parent_frame: &str, child_frame: &str) -> Option<Stamp> {
        self.buffer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest_stamp(parent_frame, child_frame)
    }
}

impl Drop for TransformListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn listen(mut rx: TopicReceiver, buffer: Arc<RwLock<TfEngine>>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let EventPayload::Transform(tf) = &event.payload {
                    buffer
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .apply(tf);
                }
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "/tf listener lagged"),
            Err(RecvError::Closed) => {
                debug!("/tf closed, listener exiting");
                break;
            }
        }
    }
}
