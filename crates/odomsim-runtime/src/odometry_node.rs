//! [`OdometryNode`] – the estimator's three triggers as Tokio tasks.
//!
//! | Task | Source | Calls |
//! |---|---|---|
//! | command subscription | [`Topic::CmdVel`] | [`PoseEstimator::ingest_command`] |
//! | reset service | `ResetPosition` [`ServiceServer`] | [`PoseEstimator::reset_pose_at`] |
//! | timer | `tokio::time::interval` | [`PoseEstimator::tick_at`] → [`TransformSink`] |
//!
//! The tasks run concurrently on whatever runtime spawned them and share one
//! `Arc<PoseEstimator>`; the estimator's lock is what serializes them.  Both
//! clock-driven tasks read the time under that lock, so stamps never go
//! backwards relative to lock order.

use std::sync::Arc;
use std::time::Duration;

use odomsim_middleware::{EventBus, ServiceServer, Topic, TopicReceiver, TransformSink};
use odomsim_types::{Event, EventPayload, ResetPositionRequest, ResetPositionResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::estimator::{PoseEstimator, DEFAULT_CHILD_FRAME, DEFAULT_PARENT_FRAME};

pub type ResetServer = ServiceServer<ResetPositionRequest, ResetPositionResponse>;

/// Node settings; every field has a default so a partial config file works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Integration period in milliseconds.
    #[serde(default = "default_tick_period_ms")]
    pub tick_period_ms: u64,

    #[serde(default = "default_parent_frame")]
    pub parent_frame: String,

    #[serde(default = "default_child_frame")]
    pub child_frame: String,

    /// Name the reset service is registered under.
    #[serde(default = "default_reset_service")]
    pub reset_service: String,
}

fn default_tick_period_ms() -> u64 {
    20
}
fn default_parent_frame() -> String {
    DEFAULT_PARENT_FRAME.to_string()
}
fn default_child_frame() -> String {
    DEFAULT_CHILD_FRAME.to_string()
}
fn default_reset_service() -> String {
    "ResetPosition".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period_ms(),
            parent_frame: default_parent_frame(),
            child_frame: default_child_frame(),
            reset_service: default_reset_service(),
        }
    }
}

impl NodeConfig {
    /// Timer period, never shorter than 1 ms.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OdometryNode
// ────────────────────────────────────────────────────────────────────────────

/// Everything the node needs before it starts.
pub struct OdometryNode {
    config: NodeConfig,
    estimator: Arc<PoseEstimator>,
    bus: Arc<EventBus>,
    sink: Arc<dyn TransformSink>,
    clock: Arc<dyn Clock>,
}

impl OdometryNode {
    /// Build a node whose estimator starts at the origin at `clock.now()`.
    pub fn new(
        config: NodeConfig,
        bus: Arc<EventBus>,
        sink: Arc<dyn TransformSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let estimator = Arc::new(PoseEstimator::with_frames(
            clock.now(),
            config.parent_frame.clone(),
            config.child_frame.clone(),
        ));
        Self {
            config,
            estimator,
            bus,
            sink,
            clock,
        }
    }

    pub fn estimator(&self) -> Arc<PoseEstimator> {
        Arc::clone(&self.estimator)
    }

    /// Start the three tasks.  Must be called inside a Tokio runtime.
    ///
    /// The `/cmd_vel` subscription is opened before this returns, so commands
    /// published afterwards are never missed.
    pub fn spawn(self, reset_server: ResetServer) -> NodeHandle {
        let commands = self.bus.subscribe_to(Topic::CmdVel);
        let tasks = vec![
            tokio::spawn(command_loop(commands, Arc::clone(&self.estimator))),
            tokio::spawn(reset_loop(
                reset_server,
                Arc::clone(&self.estimator),
                Arc::clone(&self.clock),
            )),
            tokio::spawn(timer_loop(
                self.config.tick_period(),
                Arc::clone(&self.estimator),
                Arc::clone(&self.clock),
                Arc::clone(&self.sink),
            )),
        ];
        info!(
            period_ms = self.config.tick_period_ms,
            parent = %self.config.parent_frame,
            child = %self.config.child_frame,
            service = %self.config.reset_service,
            "odometry node up"
        );
        NodeHandle {
            estimator: self.estimator,
            tasks,
        }
    }
}

/// Handle to a running node.
pub struct NodeHandle {
    estimator: Arc<PoseEstimator>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn estimator(&self) -> Arc<PoseEstimator> {
        Arc::clone(&self.estimator)
    }

    /// `true` while every task is still alive.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished())
    }

    /// Stop all tasks and wait for them to unwind.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            // Aborted tasks resolve to a cancellation error; nothing to report.
            let _ = task.await;
        }
        let s = self.estimator.snapshot();
        info!(x = s.x, y = s.y, theta = s.theta, "odometry node stopped");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tasks
// ────────────────────────────────────────────────────────────────────────────

async fn command_loop(mut commands: TopicReceiver, estimator: Arc<PoseEstimator>) {
    loop {
        match commands.recv().await {
            Ok(Event {
                payload: EventPayload::CmdVel(twist),
                ..
            }) => estimator.ingest_command(twist.into()),
            Ok(other) => debug!(source = %other.source, "non-command event on /cmd_vel"),
            // Only the newest command matters, so skipped ones are harmless.
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "/cmd_vel subscriber lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn reset_loop(mut server: ResetServer, estimator: Arc<PoseEstimator>, clock: Arc<dyn Clock>) {
    while let Some(call) = server.next_call().await {
        let (request, responder) = call.into_parts();
        let response = estimator.reset_pose_at(&request.target_pose, clock.as_ref());
        responder.respond(response);
    }
    debug!(service = %server.name(), "all reset clients gone");
}

async fn timer_loop(
    period: Duration,
    estimator: Arc<PoseEstimator>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TransformSink>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(transform) = estimator.tick_at(clock.as_ref()) else {
            continue;
        };
        if let Err(e) = sink.send_transform(transform).await {
            warn!(error = %e, "transform sink rejected pose");
        }
    }
}
