//! `odomsim-perception` – spatial math for the odometry stack.
//!
//! # Modules
//!
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: directed graph of
//!   named reference frames with the latest stamped transform on each edge,
//!   plus the [`Vec3`][transform::Vec3] / [`Quaternion`][transform::Quaternion]
//!   / [`Transform3D`][transform::Transform3D] primitives.
//! - [`angles`] – heading helpers: wrapping into (−π, π] and yaw extraction.

pub mod angles;
pub mod transform;

pub use angles::normalize_angle;
pub use transform::{Quaternion, TfEngine, Transform3D, Vec3};
