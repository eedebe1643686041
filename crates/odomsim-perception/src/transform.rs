//! Transform Frame (TF) Engine.
//!
//! Maintains a directed graph of named reference frames and the latest 3-D
//! rigid-body transform (translation + quaternion rotation) published for
//! each parent → child edge.  Given any two frame names the engine composes a
//! chain of transforms via BFS to produce the combined `Transform3D`.
//!
//! # Example
//!
//! ```rust
//! use odomsim_perception::transform::{TfEngine, Transform3D, Vec3, Quaternion};
//! use odomsim_types::Stamp;
//!
//! let mut tf = TfEngine::new();
//!
//! // base_link is 1 m forward of odom, same orientation.
//! tf.set_transform("odom", "base_link", Stamp::ZERO,
//!     Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()));
//!
//! // laser is 0.5 m forward of base_link.
//! tf.set_transform("base_link", "laser", Stamp::ZERO,
//!     Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()));
//!
//! let t = tf.lookup("odom", "laser").unwrap();
//! assert!((t.translation.x - 1.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use odomsim_types::{QuaternionMsg, Stamp, TransformStamped, Vector3};

use crate::angles::normalize_angle;

/// Below this norm a quaternion carries no usable orientation.
pub const MIN_QUATERNION_NORM: f64 = 1e-9;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for Vector3 {
    fn from(v: Vec3) -> Self {
        Vector3::new(v.x, v.y, v.z)
    }
}

/// A quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  Rotation helpers assume |q| = 1; use
    /// [`Quaternion::normalized`] on untrusted input first.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation from fixed-axis roll (X), pitch (Y), yaw (Z), applied in that
    /// order.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    /// Pure rotation about +Z.
    pub fn from_yaw(yaw: f64) -> Self {
        Self::from_rpy(0.0, 0.0, yaw)
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Scale to unit length.
    ///
    /// Returns `None` when the norm is not finite or is below
    /// [`MIN_QUATERNION_NORM`], i.e. when no orientation can be recovered.
    pub fn normalized(self) -> Option<Self> {
        let n = self.norm();
        if !n.is_finite() || n < MIN_QUATERNION_NORM {
            return None;
        }
        Some(Self::new(self.w / n, self.x / n, self.y / n, self.z / n))
    }

    /// Heading (rotation about Z) in (−π, π].
    pub fn yaw(self) -> f64 {
        let siny_cosp = 2.0 * (self.w * self.z + self.x * self.y);
        let cosy_cosp = 1.0 - 2.0 * (self.y * self.y + self.z * self.z);
        normalize_angle(siny_cosp.atan2(cosy_cosp))
    }

    pub fn roll(self) -> f64 {
        let sinr_cosp = 2.0 * (self.w * self.x + self.y * self.z);
        let cosr_cosp = 1.0 - 2.0 * (self.x * self.x + self.y * self.y);
        sinr_cosp.atan2(cosr_cosp)
    }

    pub fn pitch(self) -> f64 {
        let sinp = 2.0 * (self.w * self.y - self.z * self.x);
        sinp.clamp(-1.0, 1.0).asin()
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }
}

impl From<QuaternionMsg> for Quaternion {
    fn from(q: QuaternionMsg) -> Self {
        Self::new(q.w, q.x, q.y, q.z)
    }
}

impl From<Quaternion> for QuaternionMsg {
    fn from(q: Quaternion) -> Self {
        QuaternionMsg::new(q.x, q.y, q.z, q.w)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Planar pose (x, y, yaw) lifted into 3-D with z = 0.
    pub fn from_planar(x: f64, y: f64, yaw: f64) -> Self {
        Self::new(Vec3::new(x, y, 0.0), Quaternion::from_yaw(yaw))
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// Project onto the ground plane: (x, y, yaw).
    pub fn planar(self) -> (f64, f64, f64) {
        (self.translation.x, self.translation.y, self.rotation.yaw())
    }
}

impl From<&TransformStamped> for Transform3D {
    fn from(tf: &TransformStamped) -> Self {
        Self::new(
            tf.transform.translation.into(),
            tf.transform.rotation.into(),
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct StampedEdge {
    stamp: Stamp,
    transform: Transform3D,
}

/// A directed graph of named reference frames and the latest
/// [`Transform3D`] published for each edge.
///
/// Frames are identified by arbitrary string names (e.g. `"odom"`,
/// `"base_link"`).  Edges are directional: adding `"A" → "B"` does not
/// automatically create the inverse.  Only the most recent transform per edge
/// is retained; no history is kept for interpolation.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, StampedEdge>>,
}

impl TfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the transform from `parent_frame` to `child_frame`.
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        stamp: Stamp,
        transform: Transform3D,
    ) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), StampedEdge { stamp, transform });
    }

    /// Insert a broadcast transform message.
    pub fn apply(&mut self, tf: &TransformStamped) {
        self.set_transform(
            &tf.header.frame_id,
            &tf.child_frame_id,
            tf.header.stamp,
            Transform3D::from(tf),
        );
    }

    /// Stamp of the latest transform on the direct edge, if any.
    pub fn latest_stamp(&self, parent_frame: &str, child_frame: &str) -> Option<Stamp> {
        self.edges
            .get(parent_frame)
            .and_then(|children| children.get(child_frame))
            .map(|edge| edge.stamp)
    }

    /// Compute the composed [`Transform3D`] from `source_frame` to
    /// `target_frame`.
    ///
    /// Returns `None` if no path exists between the two frames.
    pub fn lookup(&self, source_frame: &str, target_frame: &str) -> Option<Transform3D> {
        if source_frame == target_frame {
            return Some(Transform3D::identity());
        }

        // BFS over the directed graph; each queue item carries the composed
        // transform accumulated from source_frame to the current node.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((source_frame, Transform3D::identity()));
        visited.insert(source_frame);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if visited.contains(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(edge.transform);
                if next == target_frame {
                    return Some(composed);
                }
                visited.insert(next.as_str());
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use odomsim_types::{Header, Transform};
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert_abs_diff_eq!(r.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn from_yaw_matches_closed_form() {
        let q = Quaternion::from_yaw(FRAC_PI_2);
        assert_abs_diff_eq!(q.w, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_abs_diff_eq!(q.z, FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_abs_diff_eq!(q.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn yaw_roundtrips_through_rpy() {
        for yaw in [-3.0, -1.2, 0.0, 0.4, 2.9] {
            assert_abs_diff_eq!(Quaternion::from_yaw(yaw).yaw(), yaw, epsilon = 1e-12);
        }
        // Tilted quaternions still report the yaw component.
        let tilted = Quaternion::from_rpy(0.2, -0.1, 1.1);
        assert_abs_diff_eq!(tilted.yaw(), 1.1, epsilon = 1e-9);
        assert_abs_diff_eq!(tilted.roll(), 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(tilted.pitch(), -0.1, epsilon = 1e-9);
    }

    #[test]
    fn yaw_of_half_turn_is_plus_pi() {
        let q = Quaternion::new(0.0, 0.0, 0.0, 1.0);
        assert_abs_diff_eq!(q.yaw(), PI, epsilon = 1e-12);
        assert!(q.yaw() > 0.0);
    }

    #[test]
    fn normalized_rescales_and_rejects_degenerate() {
        let q = Quaternion::new(0.0, 0.0, 0.0, 2.0).normalized().unwrap();
        assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-12);
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized().is_none());
        assert!(Quaternion::new(f64::NAN, 0.0, 0.0, 1.0).normalized().is_none());
        assert!(Quaternion::new(f64::INFINITY, 0.0, 0.0, 1.0).normalized().is_none());
    }

    #[test]
    fn wire_quaternion_field_order_is_preserved() {
        let msg = QuaternionMsg::new(0.1, 0.2, 0.3, 0.9);
        let q = Quaternion::from(msg);
        assert_eq!(q.w, 0.9);
        assert_eq!(q.x, 0.1);
        assert_eq!(QuaternionMsg::from(q), msg);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let t2 = Transform3D::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::identity());
        assert_abs_diff_eq!(t1.compose(t2).translation.x, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn planar_projection_recovers_pose() {
        let (x, y, yaw) = Transform3D::from_planar(1.5, -2.0, 0.75).planar();
        assert_abs_diff_eq!(x, 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(y, -2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(yaw, 0.75, epsilon = 1e-12);
    }

    // ── TfEngine ────────────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfEngine::new();
        assert_eq!(tf.lookup("odom", "odom"), Some(Transform3D::identity()));
    }

    #[test]
    fn lookup_no_path_returns_none() {
        let mut tf = TfEngine::new();
        tf.set_transform("odom", "base_link", Stamp::ZERO, Transform3D::from_planar(1.0, 0.0, 0.0));
        assert!(tf.lookup("base_link", "odom").is_none());
        assert!(tf.lookup("odom", "ghost_frame").is_none());
    }

    #[test]
    fn apply_keeps_only_latest_transform() {
        let mut tf = TfEngine::new();
        let msg = |x: f64, nanos: i64| TransformStamped {
            header: Header {
                stamp: Stamp::from_nanos(nanos),
                frame_id: "odom".to_string(),
            },
            child_frame_id: "base_link".to_string(),
            transform: Transform {
                translation: Vector3::new(x, 0.0, 0.0),
                rotation: QuaternionMsg::identity(),
            },
        };
        tf.apply(&msg(1.0, 10));
        tf.apply(&msg(5.0, 20));

        let t = tf.lookup("odom", "base_link").unwrap();
        assert_abs_diff_eq!(t.translation.x, 5.0, epsilon = 1e-12);
        assert_eq!(tf.latest_stamp("odom", "base_link"), Some(Stamp::from_nanos(20)));
        assert_eq!(tf.latest_stamp("odom", "laser"), None);
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        // base_link sits at the odom origin, rotated 90° about Z; the laser is
        // 1 m forward in base_link, so it lands at (0, 1, 0) in odom.
        let mut tf = TfEngine::new();
        tf.set_transform("odom", "base_link", Stamp::ZERO, Transform3D::from_planar(0.0, 0.0, FRAC_PI_2));
        tf.set_transform("base_link", "laser", Stamp::ZERO, Transform3D::from_planar(1.0, 0.0, 0.0));

        let t = tf.lookup("odom", "laser").unwrap();
        assert_abs_diff_eq!(t.translation.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.translation.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.rotation.yaw(), FRAC_PI_2, epsilon = 1e-12);
    }
}
