//! Heading helpers.

use std::f64::consts::PI;

/// Wrap `angle` into the half-open interval (−π, π].
///
/// Uses `atan2(sin, cos)` so arbitrarily large inputs (many accumulated
/// turns) wrap without loops.  `atan2` can land exactly on −π; that one value
/// is folded onto +π.  Non-finite input is returned unchanged.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return angle;
    }
    let wrapped = angle.sin().atan2(angle.cos());
    if wrapped <= -PI { PI } else { wrapped }
}

/// Signed shortest rotation from `from` to `to`, in (−π, π].
pub fn angle_diff(to: f64, from: f64) -> f64 {
    normalize_angle(to - from)
}
