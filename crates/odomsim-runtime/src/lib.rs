//! `odomsim-runtime` – the running odometry stack.
//!
//! # Modules
//!
//! - [`estimator`] – [`PoseEstimator`][estimator::PoseEstimator]: the
//!   mutex-guarded dead-reckoning core.  Caches velocity commands, integrates
//!   on every tick, and accepts absolute pose resets.
//! - [`clock`] – [`Clock`][clock::Clock] with the production
//!   [`SteadyClock`][clock::SteadyClock] and the test/simulation
//!   [`ManualClock`][clock::ManualClock].
//! - [`odometry_node`] – [`OdometryNode`][odometry_node::OdometryNode]: wires
//!   the estimator to the `/cmd_vel` topic, the `ResetPosition` service and a
//!   fixed-period timer, each on its own Tokio task.
//! - [`tf_listener`] – [`TransformListener`][tf_listener::TransformListener]:
//!   keeps a [`TfEngine`][odomsim_perception::TfEngine] up to date from `/tf`.
//! - [`controller`] – [`SquareController`][controller::SquareController]:
//!   demo driver that closes the loop through `/tf` and `/cmd_vel`, tracing a
//!   square.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod clock;
pub mod controller;
pub mod estimator;
pub mod odometry_node;
pub mod telemetry;
pub mod tf_listener;

pub use clock::{Clock, ManualClock, SteadyClock};
pub use controller::{ControllerConfig, SquareController};
pub use estimator::{PoseEstimator, PoseState, VelocityCommand};
pub use odometry_node::{NodeConfig, NodeHandle, OdometryNode};
pub use telemetry::{init_tracing, TracerProviderGuard};
pub use tf_listener::TransformListener;
