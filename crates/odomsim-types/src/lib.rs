//! `odomsim-types` – shared message vocabulary.
//!
//! Plain `serde` structs that travel over the event bus, the reset service and
//! the WebSocket bridge.  Field names follow the ROS 2 `geometry_msgs` layout
//! so JSON produced here is accepted by rosbridge clients unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

// ────────────────────────────────────────────────────────────────────────────
// Time
// ────────────────────────────────────────────────────────────────────────────

/// A point on a monotonic timeline, in signed nanoseconds.
///
/// The origin is whatever the producing clock chose (usually process start).
/// Signed so that a clock stepping backwards yields a negative difference
/// instead of saturating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub nanos: i64,
}

impl Stamp {
    pub const ZERO: Self = Self { nanos: 0 };

    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Build a stamp from fractional seconds, rounding to the nearest
    /// nanosecond.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs * NANOS_PER_SEC).round() as i64,
        }
    }

    pub fn as_secs_f64(self) -> f64 {
        self.nanos as f64 / NANOS_PER_SEC
    }

    /// Seconds elapsed from `earlier` to `self`.  Negative when `earlier` is
    /// actually later.
    pub fn seconds_since(self, earlier: Stamp) -> f64 {
        self.nanos.saturating_sub(earlier.nanos) as f64 / NANOS_PER_SEC
    }

    /// Shift the stamp forward by `secs` (backward when negative).
    pub fn offset_secs(self, secs: f64) -> Self {
        Self {
            nanos: self.nanos.saturating_add((secs * NANOS_PER_SEC).round() as i64),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// geometry_msgs
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Position in free space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation as an (x, y, z, w) quaternion, the `geometry_msgs` field
/// order.  Not guaranteed to be normalized when it comes off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionMsg {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "one")]
    pub w: f64,
}

fn one() -> f64 {
    1.0
}

impl QuaternionMsg {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

impl Default for QuaternionMsg {
    fn default() -> Self {
        Self::identity()
    }
}

/// Velocity expressed in the robot body frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Twist {
    #[serde(default)]
    pub linear: Vector3,
    #[serde(default)]
    pub angular: Vector3,
}

impl Twist {
    /// Planar twist: forward/lateral speed plus yaw rate.
    pub fn planar(linear_x: f64, linear_y: f64, angular_z: f64) -> Self {
        Self {
            linear: Vector3::new(linear_x, linear_y, 0.0),
            angular: Vector3::new(0.0, 0.0, angular_z),
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub position: Point,
    #[serde(default)]
    pub orientation: QuaternionMsg,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vector3,
    pub rotation: QuaternionMsg,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub stamp: Stamp,
    pub frame_id: String,
}

/// A timestamped rigid transform from `header.frame_id` (parent) to
/// `child_frame_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub transform: Transform,
}

// ────────────────────────────────────────────────────────────────────────────
// ResetPosition service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResetPositionRequest {
    pub target_pose: Pose,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPositionResponse {
    pub success: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Event bus envelope
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Wall-clock time the event was created (for logs and bridges; the
    /// estimator itself only trusts monotonic [`Stamp`]s).
    pub timestamp: DateTime<Utc>,
    /// e.g., "odomsim-middleware::bridge/cmd_vel"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Velocity command destined for the pose estimator.
    CmdVel(Twist),
    /// Pose broadcast produced by an integration tick.
    Transform(TransformStamped),
    /// Operational notice (shutdown, faults) that is not part of the data
    /// path.
    Alert {
        component: String,
        code: u32,
        message: String,
    },
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OdomError {
    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Parse Error: {0}")]
    Parsing(String),

    #[error("Service '{0}' unavailable")]
    ServiceUnavailable(String),

    #[error("Service '{service}' timed out after {millis} ms")]
    Timeout { service: String, millis: u64 },

    #[error("Configuration Error: {0}")]
    Config(String),
}
