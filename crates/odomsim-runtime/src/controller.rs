//! [`SquareController`] – closed-loop demo driver.
//!
//! Reads the robot pose back from `/tf` and publishes `/cmd_vel` at a fixed
//! rate so the robot traces a square: drive one side, turn +90°, repeat four
//! times, stop.  The decision logic lives in [`SquareController::step`] and
//! is free of I/O; [`SquareController::run`] is the timer loop around it.

use std::f64::consts::FRAC_PI_2;
use std::sync::Arc;
use std::time::{Duration, Instant};

use odomsim_middleware::{EventBus, Topic};
use odomsim_perception::normalize_angle;
use odomsim_types::{Event, EventPayload, Twist};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::tf_listener::TransformListener;

const SOURCE: &str = "odomsim-runtime::square_controller";
const TF_WARN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Start the controller alongside the odometry node.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Square side in metres.
    #[serde(default = "default_side_length")]
    pub side_length: f64,

    /// Forward speed while driving, m/s.
    #[serde(default = "default_linear_speed")]
    pub linear_speed: f64,

    /// Yaw rate while turning, rad/s.
    #[serde(default = "default_angular_speed")]
    pub angular_speed: f64,

    #[serde(default = "default_dist_tol")]
    pub dist_tol: f64,

    /// Turn tolerance in degrees.
    #[serde(default = "default_yaw_tol_deg")]
    pub yaw_tol_deg: f64,

    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Edges to drive before stopping.
    #[serde(default = "default_edges")]
    pub edges: u32,
}

fn default_enabled() -> bool {
    false
}
fn default_side_length() -> f64 {
    2.0
}
fn default_linear_speed() -> f64 {
    0.3
}
fn default_angular_speed() -> f64 {
    0.6
}
fn default_dist_tol() -> f64 {
    0.02
}
fn default_yaw_tol_deg() -> f64 {
    2.0
}
fn default_period_ms() -> u64 {
    50
}
fn default_edges() -> u32 {
    4
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            side_length: default_side_length(),
            linear_speed: default_linear_speed(),
            angular_speed: default_angular_speed(),
            dist_tol: default_dist_tol(),
            yaw_tol_deg: default_yaw_tol_deg(),
            period_ms: default_period_ms(),
            edges: default_edges(),
        }
    }
}

impl ControllerConfig {
    pub fn yaw_tol(&self) -> f64 {
        self.yaw_tol_deg.to_radians()
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Driving forward from `start`; `None` until the first pose of the edge.
    Drive { start: Option<(f64, f64)> },
    /// Rotating in place towards `target_yaw`.
    Turn { target_yaw: f64 },
}

#[derive(Debug)]
pub struct SquareController {
    config: ControllerConfig,
    mode: Mode,
    edge_count: u32,
}

impl SquareController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            mode: Mode::Drive { start: None },
            edge_count: 0,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn edge_count(&self) -> u32 {
        self.edge_count
    }

    pub fn is_finished(&self) -> bool {
        self.edge_count >= self.config.edges
    }

    /// Decide the next command from the current planar pose `(x, y, yaw)`.
    ///
    /// `None` (pose unknown) and every mode transition yield a zero twist.
    pub fn step(&mut self, pose: Option<(f64, f64, f64)>) -> Twist {
        let Some((x, y, yaw)) = pose else {
            return Twist::zero();
        };
        if self.is_finished() {
            return Twist::zero();
        }

        match self.mode {
            Mode::Drive { start } => {
                let (sx, sy) = start.unwrap_or((x, y));
                self.mode = Mode::Drive {
                    start: Some((sx, sy)),
                };
                let travelled = (x - sx).hypot(y - sy);
                if travelled >= self.config.side_length - self.config.dist_tol {
                    let target_yaw = normalize_angle(yaw + FRAC_PI_2);
                    debug!(edge = self.edge_count, travelled, target_yaw, "edge done, turning");
                    self.mode = Mode::Turn { target_yaw };
                    return Twist::zero();
                }
                Twist::planar(self.config.linear_speed, 0.0, 0.0)
            }
            Mode::Turn { target_yaw } => {
                let err = normalize_angle(target_yaw - yaw);
                if err.abs() <= self.config.yaw_tol() {
                    self.edge_count += 1;
                    self.mode = Mode::Drive { start: None };
                    debug!(edges = self.edge_count, "turn done");
                    return Twist::zero();
                }
                let direction = if err > 0.0 { 1.0 } else { -1.0 };
                Twist::planar(0.0, 0.0, self.config.angular_speed * direction)
            }
        }
    }

    /// Drive the square until finished or until `shutdown` flips to `true`.
    ///
    /// Publishes on [`Topic::CmdVel`] every period and always finishes with a
    /// zero twist.
    pub async fn run(
        mut self,
        listener: Arc<TransformListener>,
        bus: Arc<EventBus>,
        parent_frame: String,
        child_frame: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            side = self.config.side_length,
            parent = %parent_frame,
            child = %child_frame,
            "square controller up"
        );
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tf_warn: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("square controller interrupted");
                        break;
                    }
                    continue;
                }
            }

            let pose = listener
                .lookup(&parent_frame, &child_frame)
                .map(|t| t.planar());
            if pose.is_none() && last_tf_warn.is_none_or(|t| t.elapsed() >= TF_WARN_INTERVAL) {
                warn!(parent = %parent_frame, child = %child_frame, "waiting for transform");
                last_tf_warn = Some(Instant::now());
            }

            let twist = self.step(pose);
            publish(&bus, twist);

            if self.is_finished() {
                info!(edges = self.edge_count, "square complete, stopping");
                break;
            }
        }
        publish(&bus, Twist::zero());
    }
}

fn publish(bus: &EventBus, twist: Twist) {
    if let Err(e) = bus.publish_to(Topic::CmdVel, Event::new(SOURCE, EventPayload::CmdVel(twist))) {
        debug!(error = %e, "no /cmd_vel subscribers");
    }
}
