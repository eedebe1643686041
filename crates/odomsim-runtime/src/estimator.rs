//! [`PoseEstimator`] – dead-reckoning pose integrator.
//!
//! Three independent triggers drive one shared [`PoseState`]:
//!
//! | Entry point | Trigger | Effect |
//! |---|---|---|
//! | [`PoseEstimator::ingest_command`] | `/cmd_vel` message | caches the latest velocity |
//! | [`PoseEstimator::tick`] | periodic timer | integrates and yields a transform |
//! | [`PoseEstimator::reset_pose`] | `ResetPosition` call | overwrites the pose |
//!
//! Every entry point takes the same mutex for its whole read-modify-write, so
//! no caller can observe a half-applied step (new x/y with a stale heading).
//! Nothing inside the lock performs I/O; [`PoseEstimator::tick`] returns the
//! transform and leaves delivery to the caller.
//!
//! The `*_at` variants read a [`Clock`] only after the lock is taken, so the
//! order of timestamps matches the order in which callers hold the lock.
//!
//! # Example
//!
//! ```rust
//! use odomsim_runtime::estimator::{PoseEstimator, VelocityCommand};
//! use odomsim_types::Stamp;
//!
//! let estimator = PoseEstimator::new(Stamp::ZERO);
//! estimator.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));
//!
//! let tf = estimator.tick(Stamp::from_secs_f64(1.0)).expect("time advanced");
//! assert!((tf.transform.translation.x - 1.0).abs() < 1e-9);
//! assert_eq!(tf.header.frame_id, "odom");
//! assert_eq!(tf.child_frame_id, "base_link");
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use odomsim_perception::{normalize_angle, Quaternion};
use odomsim_types::{
    Header, Pose, ResetPositionResponse, Stamp, Transform, TransformStamped, Twist, Vector3,
};
use tracing::{debug, trace, warn};

use crate::clock::Clock;

pub const DEFAULT_PARENT_FRAME: &str = "odom";
pub const DEFAULT_CHILD_FRAME: &str = "base_link";

/// Roll or pitch above this (radians) is worth a log line on reset.
const TILT_LOG_THRESHOLD: f64 = 1e-3;

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

/// Body-frame velocity command.  Only the planar components of a [`Twist`]
/// are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VelocityCommand {
    /// Forward speed (m/s).
    pub linear_x: f64,
    /// Leftward speed (m/s).
    pub linear_y: f64,
    /// Yaw rate, counter-clockwise positive (rad/s).
    pub angular_z: f64,
}

impl VelocityCommand {
    pub fn new(linear_x: f64, linear_y: f64, angular_z: f64) -> Self {
        Self {
            linear_x,
            linear_y,
            angular_z,
        }
    }
}

impl From<&Twist> for VelocityCommand {
    fn from(twist: &Twist) -> Self {
        Self::new(twist.linear.x, twist.linear.y, twist.angular.z)
    }
}

impl From<Twist> for VelocityCommand {
    fn from(twist: Twist) -> Self {
        Self::from(&twist)
    }
}

/// Everything the estimator knows.  Copied out whole by
/// [`PoseEstimator::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseState {
    pub x: f64,
    pub y: f64,
    /// Heading in (−π, π].
    pub theta: f64,
    /// Time of the last successful tick or reset.
    pub last_update_time: Stamp,
    /// Latest command; zero until the first one arrives.
    pub last_command: VelocityCommand,
}

impl PoseState {
    /// Pose at the origin, zero command, clock baseline at `start`.
    pub fn at_origin(start: Stamp) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
            last_update_time: start,
            last_command: VelocityCommand::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseEstimator
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe planar dead-reckoning estimator.
///
/// Share it as `Arc<PoseEstimator>`; all methods take `&self`.
#[derive(Debug)]
pub struct PoseEstimator {
    state: Mutex<PoseState>,
    parent_frame: String,
    child_frame: String,
}

impl PoseEstimator {
    /// Estimator at the origin publishing `odom → base_link`.
    pub fn new(start: Stamp) -> Self {
        Self::with_frames(start, DEFAULT_PARENT_FRAME, DEFAULT_CHILD_FRAME)
    }

    pub fn with_frames(
        start: Stamp,
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
    ) -> Self {
        Self {
            state: Mutex::new(PoseState::at_origin(start)),
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
        }
    }

    pub fn parent_frame(&self) -> &str {
        &self.parent_frame
    }

    pub fn child_frame(&self) -> &str {
        &self.child_frame
    }

    /// Replace the cached velocity command.  Pose and timestamp are left
    /// alone; the next tick picks the new command up.
    pub fn ingest_command(&self, command: VelocityCommand) {
        self.lock().last_command = command;
        trace!(
            vx = command.linear_x,
            vy = command.linear_y,
            wz = command.angular_z,
            "velocity command cached"
        );
    }

    /// Advance the pose to `now` with the cached command.
    ///
    /// Returns `None` without touching state when `now` is not after the last
    /// update (repeated or backwards timestamps).  Otherwise integrates one
    /// explicit Euler step, using the heading from *before* the step to rotate
    /// the body velocity into the world frame, and returns the resulting
    /// `parent → child` transform stamped at `now`.
    pub fn tick(&self, now: Stamp) -> Option<TransformStamped> {
        let mut state = self.lock();
        self.advance(&mut state, now)
    }

    /// [`tick`](Self::tick) at `clock.now()`, read while the lock is held.
    pub fn tick_at(&self, clock: &dyn Clock) -> Option<TransformStamped> {
        let mut state = self.lock();
        let now = clock.now();
        self.advance(&mut state, now)
    }

    fn advance(&self, state: &mut PoseState, now: Stamp) -> Option<TransformStamped> {
        let dt = now.seconds_since(state.last_update_time);
        if dt <= 0.0 {
            trace!(dt, "non-advancing clock, skipping integration");
            return None;
        }

        let VelocityCommand {
            linear_x: vx,
            linear_y: vy,
            angular_z: wz,
        } = state.last_command;
        let (sin_t, cos_t) = state.theta.sin_cos();

        state.x += (vx * cos_t - vy * sin_t) * dt;
        state.y += (vx * sin_t + vy * cos_t) * dt;
        state.theta = normalize_angle(state.theta + wz * dt);
        state.last_update_time = now;

        Some(self.build_transform(state, now))
    }

    /// Overwrite the pose with `target` and restart the integration baseline
    /// at `now`.  The cached command survives, so motion resumes on the next
    /// tick.
    ///
    /// Only yaw is taken from the orientation; roll and pitch are projected
    /// away.  A non-unit quaternion is normalized first.  The request is
    /// refused (`success = false`, state untouched) when the orientation has
    /// no recoverable direction (zero or non-finite norm) or the position is
    /// not finite.
    ///
    /// The integration baseline never moves backwards: a `now` older than the
    /// last update keeps the existing baseline.
    pub fn reset_pose(&self, target: &Pose, now: Stamp) -> ResetPositionResponse {
        self.reset_with(target, || now)
    }

    /// [`reset_pose`](Self::reset_pose) at `clock.now()`, read while the
    /// lock is held.
    pub fn reset_pose_at(&self, target: &Pose, clock: &dyn Clock) -> ResetPositionResponse {
        self.reset_with(target, || clock.now())
    }

    fn reset_with(&self, target: &Pose, now: impl FnOnce() -> Stamp) -> ResetPositionResponse {
        let position = target.position;
        if !position.x.is_finite() || !position.y.is_finite() {
            warn!(x = position.x, y = position.y, "rejecting reset to non-finite position");
            return ResetPositionResponse { success: false };
        }
        let Some(orientation) = Quaternion::from(target.orientation).normalized() else {
            warn!(orientation = ?target.orientation, "rejecting reset with degenerate orientation");
            return ResetPositionResponse { success: false };
        };

        let (roll, pitch) = (orientation.roll(), orientation.pitch());
        if roll.abs() > TILT_LOG_THRESHOLD || pitch.abs() > TILT_LOG_THRESHOLD {
            debug!(roll, pitch, "reset orientation is tilted; keeping yaw only");
        }
        let yaw = orientation.yaw();

        {
            let mut state = self.lock();
            let now = now();
            if now < state.last_update_time {
                debug!(
                    reset = ?now,
                    baseline = ?state.last_update_time,
                    "reset stamped before last update; keeping baseline"
                );
            }
            state.x = position.x;
            state.y = position.y;
            state.theta = yaw;
            state.last_update_time = now.max(state.last_update_time);
        }

        debug!(x = position.x, y = position.y, theta = yaw, "pose reset");
        ResetPositionResponse { success: true }
    }

    /// Consistent copy of the whole state.
    pub fn snapshot(&self) -> PoseState {
        *self.lock()
    }

    fn build_transform(&self, state: &PoseState, stamp: Stamp) -> TransformStamped {
        TransformStamped {
            header: Header {
                stamp,
                frame_id: self.parent_frame.clone(),
            },
            child_frame_id: self.child_frame.clone(),
            transform: Transform {
                translation: Vector3::new(state.x, state.y, 0.0),
                rotation: Quaternion::from_rpy(0.0, 0.0, state.theta).into(),
            },
        }
    }

    // Critical sections are plain arithmetic on `Copy` data, so a panic in
    // another holder cannot leave the record half-written.
    fn lock(&self) -> MutexGuard<'_, PoseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use odomsim_perception::angles::angle_diff;
    use odomsim_types::{Point, QuaternionMsg};
    use std::f64::consts::{FRAC_PI_2, PI};
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use std::thread;

    const EPS: f64 = 1e-9;

    fn secs(s: f64) -> Stamp {
        Stamp::from_secs_f64(s)
    }

    fn pose(x: f64, y: f64, yaw: f64) -> Pose {
        Pose {
            position: Point::new(x, y, 0.0),
            orientation: Quaternion::from_yaw(yaw).into(),
        }
    }

    fn in_range(theta: f64) -> bool {
        theta > -PI && theta <= PI
    }

    // ── concrete scenarios ──────────────────────────────────────────────────

    #[test]
    fn straight_line_one_second() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));

        let tf = est.tick(secs(1.0)).expect("one transform");
        let s = est.snapshot();
        assert_abs_diff_eq!(s.x, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(s.y, 0.0, epsilon = EPS);
        assert_abs_diff_eq!(s.theta, 0.0, epsilon = EPS);

        assert_eq!(tf.header.stamp, secs(1.0));
        assert_eq!(tf.header.frame_id, "odom");
        assert_eq!(tf.child_frame_id, "base_link");
        assert_abs_diff_eq!(tf.transform.translation.x, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(tf.transform.translation.y, 0.0, epsilon = EPS);
        assert_eq!(tf.transform.translation.z, 0.0);
        let q = tf.transform.rotation;
        assert_abs_diff_eq!(q.w, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(q.z, 0.0, epsilon = EPS);
    }

    #[test]
    fn pure_rotation_quarter_turn() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(0.0, 0.0, FRAC_PI_2));

        est.tick(secs(1.0)).expect("one transform");
        let s = est.snapshot();
        assert_abs_diff_eq!(s.theta, FRAC_PI_2, epsilon = EPS);
        assert_abs_diff_eq!(s.x, 0.0, epsilon = EPS);
        assert_abs_diff_eq!(s.y, 0.0, epsilon = EPS);
    }

    #[test]
    fn reset_then_drive_uses_reset_heading() {
        let est = PoseEstimator::new(secs(0.0));
        let ack = est.reset_pose(&pose(5.0, 5.0, PI), secs(0.0));
        assert!(ack.success);

        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));
        est.tick(secs(1.0)).expect("one transform");

        let s = est.snapshot();
        assert_abs_diff_eq!(s.x, 4.0, epsilon = EPS);
        assert_abs_diff_eq!(s.y, 5.0, epsilon = EPS);
        assert_abs_diff_eq!(s.theta, PI, epsilon = EPS);
    }

    // ── integration properties ──────────────────────────────────────────────

    #[test]
    fn fixed_dt_straight_line_matches_closed_form() {
        let (vx, vy) = (0.4, -0.3);
        let est = PoseEstimator::new(secs(0.0));
        est.reset_pose(&pose(0.0, 0.0, 0.6), secs(0.0));
        est.ingest_command(VelocityCommand::new(vx, vy, 0.0));

        let dt = 0.02;
        for i in 1..=500 {
            est.tick(secs(f64::from(i) * dt)).expect("advancing tick");
        }

        let t = 500.0 * dt;
        let (s, c) = 0.6_f64.sin_cos();
        let st = est.snapshot();
        assert_abs_diff_eq!(st.x, (vx * c - vy * s) * t, epsilon = 1e-6);
        assert_abs_diff_eq!(st.y, (vx * s + vy * c) * t, epsilon = 1e-6);
        assert_abs_diff_eq!(st.theta, 0.6, epsilon = EPS);
    }

    #[test]
    fn fixed_dt_arc_matches_closed_form() {
        // Explicit Euler converges to the arc x = (v/w)·sin(wt),
        // y = (v/w)·(1 − cos(wt)); with a 0.5 ms step the lag from using the
        // start-of-step heading stays well under a millimetre.
        let (v, w) = (1.0, 0.5);
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(v, 0.0, w));

        let dt = 0.0005;
        let steps = 4_000;
        for i in 1..=steps {
            est.tick(secs(f64::from(i) * dt)).expect("advancing tick");
        }

        let t = f64::from(steps) * dt;
        let st = est.snapshot();
        assert_abs_diff_eq!(st.x, v / w * (w * t).sin(), epsilon = 1e-3);
        assert_abs_diff_eq!(st.y, v / w * (1.0 - (w * t).cos()), epsilon = 1e-3);
        assert_abs_diff_eq!(st.theta, w * t, epsilon = 1e-9);
    }

    #[test]
    fn each_euler_step_uses_heading_from_before_the_step() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, FRAC_PI_2));

        // Heading is still 0 during this step, so all motion goes along +x.
        est.tick(secs(1.0));
        let st = est.snapshot();
        assert_abs_diff_eq!(st.x, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(st.y, 0.0, epsilon = EPS);

        // Second step starts at π/2, so it moves along +y.
        est.tick(secs(2.0));
        let st = est.snapshot();
        assert_abs_diff_eq!(st.x, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(st.y, 1.0, epsilon = EPS);
        assert_abs_diff_eq!(st.theta, PI, epsilon = EPS);
    }

    #[test]
    fn theta_stays_normalized_over_many_turns() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(0.2, 0.0, 7.3));

        for i in 1..=5_000 {
            let tf = est.tick(secs(f64::from(i) * 0.02)).expect("advancing tick");
            let theta = est.snapshot().theta;
            assert!(in_range(theta), "theta {theta} out of range at tick {i}");
            let q = Quaternion::from(tf.transform.rotation);
            assert!(angle_diff(q.yaw(), theta).abs() < 1e-9);
        }
    }

    #[test]
    fn backwards_rotation_lands_on_plus_pi_not_minus_pi() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(0.0, 0.0, -PI));
        est.tick(secs(1.0));
        let theta = est.snapshot().theta;
        assert!(in_range(theta));
        assert_abs_diff_eq!(theta, PI, epsilon = EPS);
    }

    // ── clock guard ─────────────────────────────────────────────────────────

    #[test]
    fn non_advancing_tick_is_a_noop() {
        let est = PoseEstimator::new(secs(1.0));
        est.ingest_command(VelocityCommand::new(1.0, 1.0, 1.0));
        let before = est.snapshot();

        assert!(est.tick(secs(1.0)).is_none(), "dt == 0");
        assert!(est.tick(secs(0.5)).is_none(), "dt < 0");
        assert_eq!(est.snapshot(), before);
    }

    #[test]
    fn ingest_does_not_move_pose_or_clock() {
        let est = PoseEstimator::new(secs(2.0));
        est.ingest_command(VelocityCommand::new(3.0, 0.0, 0.0));
        let s = est.snapshot();
        assert_eq!((s.x, s.y, s.theta), (0.0, 0.0, 0.0));
        assert_eq!(s.last_update_time, secs(2.0));
        assert_eq!(s.last_command, VelocityCommand::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn latest_command_wins() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(5.0, 0.0, 0.0));
        est.ingest_command(Twist::planar(-1.0, 0.0, 0.0).into());
        est.tick(secs(1.0));
        assert_abs_diff_eq!(est.snapshot().x, -1.0, epsilon = EPS);
    }

    // ── reset ───────────────────────────────────────────────────────────────

    #[test]
    fn reset_then_zero_dt_tick_does_not_integrate() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 1.0));
        est.reset_pose(&pose(2.0, -1.0, 0.3), secs(4.0));

        assert!(est.tick(secs(4.0)).is_none());
        let s = est.snapshot();
        assert_abs_diff_eq!(s.x, 2.0, epsilon = EPS);
        assert_abs_diff_eq!(s.y, -1.0, epsilon = EPS);
        assert_abs_diff_eq!(s.theta, 0.3, epsilon = EPS);
    }

    #[test]
    fn reset_discards_elapsed_time_and_keeps_command() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));
        // Ten seconds pass without a tick, then a reset lands.
        est.reset_pose(&pose(0.0, 0.0, FRAC_PI_2), secs(10.0));
        est.tick(secs(10.5));

        let s = est.snapshot();
        assert_eq!(s.last_command, VelocityCommand::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(s.x, 0.0, epsilon = EPS);
        assert_abs_diff_eq!(s.y, 0.5, epsilon = EPS);
    }

    #[test]
    fn late_reset_stamp_keeps_baseline() {
        let est = PoseEstimator::new(secs(0.0));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));
        est.tick(secs(2.0)).expect("advancing tick");

        // A reset stamped before the last tick must not reopen that window.
        assert!(est.reset_pose(&pose(0.0, 0.0, 0.0), secs(1.0)).success);
        let s = est.snapshot();
        assert_eq!(s.last_update_time, secs(2.0));
        assert_eq!((s.x, s.y), (0.0, 0.0));

        est.tick(secs(2.02)).expect("advancing tick");
        assert_abs_diff_eq!(est.snapshot().x, 0.02, epsilon = EPS);
    }

    #[test]
    fn clock_variants_read_time_inside_the_lock() {
        let clock = ManualClock::new(secs(0.0));
        let est = PoseEstimator::new(clock.now());
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));

        clock.set(secs(2.0));
        let tf = est.tick_at(&clock).expect("advancing tick");
        assert_eq!(tf.header.stamp, secs(2.0));

        assert!(est.reset_pose_at(&pose(0.0, 0.0, 0.0), &clock).success);
        assert_eq!(est.snapshot().last_update_time, secs(2.0));
        assert!(est.tick_at(&clock).is_none(), "reset restarted the baseline");

        clock.advance_secs(0.02);
        est.tick_at(&clock).expect("advancing tick");
        assert_abs_diff_eq!(est.snapshot().x, 0.02, epsilon = EPS);
    }

    #[test]
    fn reset_normalizes_non_unit_quaternion() {
        let est = PoseEstimator::new(secs(0.0));
        let target = Pose {
            position: Point::new(1.0, 2.0, 3.0),
            orientation: QuaternionMsg::new(0.0, 0.0, 3.0, 3.0),
        };
        assert!(est.reset_pose(&target, secs(0.0)).success);
        assert_abs_diff_eq!(est.snapshot().theta, FRAC_PI_2, epsilon = EPS);
    }

    #[test]
    fn reset_ignores_roll_and_pitch() {
        let est = PoseEstimator::new(secs(0.0));
        let target = Pose {
            position: Point::new(0.0, 0.0, 0.0),
            orientation: Quaternion::from_rpy(0.3, -0.2, -2.0).into(),
        };
        assert!(est.reset_pose(&target, secs(0.0)).success);
        assert_abs_diff_eq!(est.snapshot().theta, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn reset_rejects_degenerate_input() {
        let est = PoseEstimator::new(secs(0.0));
        est.reset_pose(&pose(1.0, 1.0, 1.0), secs(1.0));
        let before = est.snapshot();

        let zero_q = Pose {
            position: Point::new(9.0, 9.0, 0.0),
            orientation: QuaternionMsg::new(0.0, 0.0, 0.0, 0.0),
        };
        assert!(!est.reset_pose(&zero_q, secs(2.0)).success);

        let nan_pos = pose(f64::NAN, 0.0, 0.0);
        assert!(!est.reset_pose(&nan_pos, secs(2.0)).success);

        assert_eq!(est.snapshot(), before);
    }

    #[test]
    fn reset_heading_is_always_in_range() {
        let est = PoseEstimator::new(secs(0.0));
        for k in -20..=20 {
            let yaw = f64::from(k) * 0.9;
            est.reset_pose(&pose(0.0, 0.0, yaw), secs(0.0));
            assert!(in_range(est.snapshot().theta));
        }
        // The half-turn quaternion must report +π.
        est.reset_pose(
            &Pose {
                position: Point::default(),
                orientation: QuaternionMsg::new(0.0, 0.0, -1.0, 0.0),
            },
            secs(0.0),
        );
        assert_abs_diff_eq!(est.snapshot().theta, PI, epsilon = EPS);
    }

    #[test]
    fn custom_frames_are_used_in_transform() {
        let est = PoseEstimator::with_frames(secs(0.0), "map", "robot");
        assert_eq!(est.parent_frame(), "map");
        let tf = est.tick(secs(0.1)).expect("advancing tick");
        assert_eq!(tf.header.frame_id, "map");
        assert_eq!(tf.child_frame_id, "robot");
    }

    // ── concurrency ─────────────────────────────────────────────────────────

    fn step(from: (f64, f64, f64), cmd: VelocityCommand, dt: f64) -> (f64, f64, f64) {
        let (x, y, theta) = from;
        let (s, c) = theta.sin_cos();
        (
            x + (cmd.linear_x * c - cmd.linear_y * s) * dt,
            y + (cmd.linear_x * s + cmd.linear_y * c) * dt,
            normalize_angle(theta + cmd.angular_z * dt),
        )
    }

    /// Writers flip between two commands while two tickers integrate on
    /// interleaved timestamps.  Emitted stamps strictly increase in lock
    /// order, so sorting by stamp recovers that order.  Every transform must
    /// then equal one whole Euler step from its predecessor under a single
    /// command; a torn update (x/y from one command, heading from the other)
    /// matches neither.
    #[test]
    fn concurrent_ingest_and_tick_never_tear() {
        let drive = VelocityCommand::new(1.0, 0.0, 0.5);
        let strafe = VelocityCommand::new(0.0, 0.5, -1.0);
        let candidates = [VelocityCommand::default(), drive, strafe];

        let est = Arc::new(PoseEstimator::new(Stamp::ZERO));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let est = Arc::clone(&est);
                thread::spawn(move || {
                    for i in 0..2_000 {
                        est.ingest_command(if (i + w) % 2 == 0 { drive } else { strafe });
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let est = Arc::clone(&est);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        assert!(in_range(est.snapshot().theta));
                    }
                })
            })
            .collect();

        // Ticker k uses stamps (2i + k) ms, so the two streams interleave.
        let tickers: Vec<_> = (1..=2_i64)
            .map(|k| {
                let est = Arc::clone(&est);
                thread::spawn(move || {
                    (0..2_000_i64)
                        .filter_map(|i| est.tick(Stamp::from_nanos((2 * i + k) * 1_000_000)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for h in writers.into_iter().chain(readers) {
            h.join().expect("worker thread");
        }
        let mut transforms: Vec<_> = tickers
            .into_iter()
            .flat_map(|h| h.join().expect("tick thread"))
            .collect();
        transforms.sort_by_key(|tf| tf.header.stamp);
        assert!(!transforms.is_empty());
        assert!(
            transforms.windows(2).all(|w| w[0].header.stamp < w[1].header.stamp),
            "two transforms share a stamp"
        );
        let last = transforms.last().map(|tf| tf.header.stamp);
        assert_eq!(Some(est.snapshot().last_update_time), last);

        let mut prev = (0.0, 0.0, 0.0);
        let mut prev_stamp = Stamp::ZERO;
        for tf in &transforms {
            let dt = tf.header.stamp.seconds_since(prev_stamp);
            let t = &tf.transform;
            let now = (t.translation.x, t.translation.y, Quaternion::from(t.rotation).yaw());
            let explained = candidates.iter().any(|&cmd| {
                let (x, y, theta) = step(prev, cmd, dt);
                (x - now.0).abs() < 1e-9
                    && (y - now.1).abs() < 1e-9
                    && angle_diff(theta, now.2).abs() < 1e-9
            });
            assert!(explained, "transform at {:?} is not a whole step from {prev:?}", tf.header.stamp);
            prev = now;
            prev_stamp = tf.header.stamp;
        }
    }

    /// Hands out a strictly larger stamp on every read.
    #[derive(Default)]
    struct CountingClock {
        nanos: AtomicI64,
    }

    impl Clock for CountingClock {
        fn now(&self) -> Stamp {
            Stamp::from_nanos(self.nanos.fetch_add(1_000_000, Ordering::SeqCst) + 1_000_000)
        }
    }

    /// Resets and ticks race on one clock.  Because the clock is read under
    /// the lock, each reading is newer than whatever the previous holder
    /// stored, so every tick integrates and the baseline ends on the newest
    /// reading.
    #[test]
    fn concurrent_resets_and_ticks_keep_baseline_monotonic() {
        let clock = Arc::new(CountingClock::default());
        let est = Arc::new(PoseEstimator::new(Stamp::ZERO));
        est.ingest_command(VelocityCommand::new(1.0, 0.0, 0.0));

        let resetters: Vec<_> = (0..2)
            .map(|_| {
                let (est, clock) = (Arc::clone(&est), Arc::clone(&clock));
                thread::spawn(move || {
                    for _ in 0..500 {
                        assert!(est.reset_pose_at(&pose(0.0, 0.0, 0.0), clock.as_ref()).success);
                    }
                })
            })
            .collect();
        let tickers: Vec<_> = (0..2)
            .map(|_| {
                let (est, clock) = (Arc::clone(&est), Arc::clone(&clock));
                thread::spawn(move || {
                    for _ in 0..500 {
                        let tf = est.tick_at(clock.as_ref()).expect("clock read under lock always advances");
                        // Every holder reads the next 1 ms stamp, so each tick adds exactly
                        // 1 mm and at most 1000 ticks follow any reset.
                        assert!(tf.transform.translation.x <= 1.0 + 1e-9);
                    }
                })
            })
            .collect();

        for h in resetters.into_iter().chain(tickers) {
            h.join().expect("worker thread");
        }
        let newest = Stamp::from_nanos(clock.nanos.load(Ordering::SeqCst));
        assert_eq!(est.snapshot().last_update_time, newest);
    }

    /// Each tick advances the pose by a full step under one command: with a
    /// lone "drive" command the distance travelled equals speed × elapsed
    /// time no matter how ticks and ingests interleave.
    #[test]
    fn concurrent_same_command_yields_exact_distance() {
        let est = Arc::new(PoseEstimator::new(Stamp::ZERO));
        est.ingest_command(VelocityCommand::new(2.0, 0.0, 0.0));

        let writer = {
            let est = Arc::clone(&est);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    est.ingest_command(VelocityCommand::new(2.0, 0.0, 0.0));
                }
            })
        };
        let ticker = {
            let est = Arc::clone(&est);
            thread::spawn(move || {
                for i in 1..=1_000_i64 {
                    est.tick(Stamp::from_nanos(i * 1_000_000));
                }
            })
        };
        writer.join().expect("writer");
        ticker.join().expect("ticker");

        let s = est.snapshot();
        assert_abs_diff_eq!(s.x, 2.0 * 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(s.y, 0.0, epsilon = 1e-12);
        assert_eq!(s.last_update_time, Stamp::from_nanos(1_000_000_000));
    }
}
