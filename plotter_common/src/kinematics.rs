//! Pure coordinate-transform math shared by Cartesian and SCARA machines.
//!
//! Every function here is total except [`resolve_arm_angles`], which fails
//! on a singular two-link arm configuration. Nothing in this module touches
//! I/O or machine state — it is the leaf of the dependency graph.

use std::f64::consts::PI;

use crate::error::KinematicsError;

/// Convert Cartesian `(x, y)` to polar `(radius, angle_rad)`.
pub fn cartesian_to_polar(x: f64, y: f64) -> (f64, f64) {
    (x.hypot(y), y.atan2(x))
}

/// Convert polar `(radius, angle_rad)` to Cartesian `(x, y)`.
pub fn polar_to_cartesian(radius: f64, angle_rad: f64) -> (f64, f64) {
    (angle_rad.cos() * radius, angle_rad.sin() * radius)
}

/// Rotate `(x, y)` by `phi` radians about the origin.
pub fn rotate(x: f64, y: f64, phi: f64) -> (f64, f64) {
    (
        phi.cos() * x - phi.sin() * y,
        phi.sin() * x + phi.cos() * y,
    )
}

/// Truncate an angle in degrees to a motor step count.
pub fn steps(angle_deg: f64, steps_per_revolution: i64) -> i64 {
    ((angle_deg / 360.0) * steps_per_revolution as f64) as i64
}

/// Cosine similarity of the vectors `p1 - p0` and `p2 - p1`. Returns `0.0`
/// when either segment has zero length (no movement — a degenerate case,
/// not an error).
pub fn cosine_similarity(p0: (f64, f64), p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let v1 = (p1.0 - p0.0, p1.1 - p0.1);
    let v2 = (p2.0 - p1.0, p2.1 - p1.1);

    let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if n1 == 0.0 || n2 == 0.0 {
        return 0.0;
    }

    (v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)
}

/// Wrap an angle in radians into `(-pi, pi]`.
fn wrap_pi(angle: f64) -> f64 {
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a <= -PI {
        a += 2.0 * PI;
    }
    a
}

/// Two-link planar inverse kinematics for a SCARA arm.
///
/// `primary`/`secondary` are the current `(radius, angle_rad)` polar
/// coordinates of each arm. Returns `(angle_primary_deg, angle_secondary_deg)`
/// — the angles each arm must rotate *by* to place the tool at `(x, y)`.
pub fn resolve_arm_angles(
    x: f64,
    y: f64,
    primary: (f64, f64),
    secondary: (f64, f64),
) -> Result<(f64, f64), KinematicsError> {
    let (r1, theta1) = primary;
    let (r2, theta2) = secondary;
    let (r_t, theta_t) = cartesian_to_polar(x, y);

    let a = 2.0 * (theta_t.cos() * theta1.cos() + theta_t.sin() * theta1.sin());
    let b = 2.0 * (theta_t.sin() * theta1.cos() - theta_t.cos() * theta1.sin());
    let c_raw = (r1 * r1 - r2 * r2 + r_t * r_t) / (r_t * r1);
    let r = (a * a + b * b).sqrt();

    if r == 0.0 {
        return Err(KinematicsError::SingularConfiguration);
    }

    let c = if (c_raw / r).abs() > 1.0 {
        r.copysign(c_raw)
    } else {
        c_raw
    };

    let phi = b.atan2(a);
    let offset = (c / r).acos();

    let candidate_1 = wrap_pi(phi + offset);
    let candidate_2 = wrap_pi(phi - offset);
    let angle_primary = if candidate_1.abs() <= candidate_2.abs() {
        candidate_1
    } else {
        candidate_2
    };

    let a1_abs = theta1 + angle_primary;
    let d = (theta_t.cos() * r_t - a1_abs.cos() * r1) / r2;
    let e = (theta_t.sin() * r_t - a1_abs.sin() * r1) / r2;
    let angle_secondary = wrap_pi(
        (-a1_abs.sin() * d + a1_abs.cos() * e).atan2(a1_abs.cos() * d + a1_abs.sin() * e)
            - theta2,
    );

    Ok((
        180.0 * angle_primary / PI,
        180.0 * angle_secondary / PI,
    ))
}
