//! Coordinate transformer: conversions between the user-facing
//! cylindrical camera frame, the machine frame reported by the motion
//! board, and the Cartesian world frame used for photogrammetry metadata.
//!
//! Kept as free functions on plain data rather than a stateful component —
//! every transform here is pure, so there's nothing to own or synchronize,
//! unlike the hardware-facing controllers in [`crate::motion`],
//! [`crate::camera`], and [`crate::lighting`].

use crate::position::Position4D;
use serde::{Deserialize, Serialize};

/// User-facing cylindrical camera pose: radius/height in mm, rotation/tilt
/// in degrees. Radius is the horizontal distance from the turntable axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CylindricalPose {
    pub radius_mm: f64,
    pub height_mm: f64,
    pub rotation_deg: f64,
    pub tilt_deg: f64,
}

impl CylindricalPose {
    /// Maps directly onto the machine frame: x=radius, y=height,
    /// z=rotation, c=tilt.
    pub fn to_machine(self) -> Position4D {
        Position4D::new(self.radius_mm, self.height_mm, self.rotation_deg, self.tilt_deg)
    }

    pub fn from_machine(p: Position4D) -> Self {
        Self {
            radius_mm: p.x,
            height_mm: p.y,
            rotation_deg: p.z,
            tilt_deg: p.c,
        }
    }
}

/// A point in the Cartesian world frame: mm, Z up, origin at the
/// turntable's top-centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x_mm: f64,
    pub y_mm: f64,
    pub z_mm: f64,
}

/// Euler orientation in degrees: ω (roll, always 0 — the rig has no roll
/// axis), φ (pitch, the tilt servo angle), κ (yaw, turntable angle plus
/// stereo convergence offset).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub omega_deg: f64,
    pub phi_deg: f64,
    pub kappa_deg: f64,
}

/// Which half of a stereo pair a pose belongs to, and the sign convention
/// each carries for the baseline offset and convergence yaw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereoSide {
    Left,
    Right,
}

impl StereoSide {
    fn sign(self) -> f64 {
        match self {
            StereoSide::Left => 1.0,
            StereoSide::Right => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StereoConfig {
    pub baseline_mm: f64,
    pub convergence_angle_deg: f64,
}

/// A fully resolved camera pose: world position plus orientation, ready to
/// stamp onto a captured image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub world: WorldPoint,
    pub orientation: EulerAngles,
}

/// Computes the centre-camera world position for a machine pose, before
/// any stereo offset is applied: `(x·cos z, x·sin z, y)` with z in degrees.
pub fn centre_world_point(machine: Position4D) -> WorldPoint {
    let z_rad = machine.z.to_radians();
    WorldPoint {
        x_mm: machine.x * z_rad.cos(),
        y_mm: machine.x * z_rad.sin(),
        z_mm: machine.y,
    }
}

/// Computes one stereo camera's resolved world pose: each
/// camera is offset perpendicular to the viewing direction by ±B/2, i.e.
/// along `(−sin z, cos z, 0)`, then yaw-rotated inward by ±α for
/// orientation.
pub fn stereo_camera_pose(machine: Position4D, stereo: StereoConfig, side: StereoSide) -> CameraPose {
    let z_rad = machine.z.to_radians();
    let sign = side.sign();
    let half_baseline = stereo.baseline_mm / 2.0;

    let centre = centre_world_point(machine);
    let offset_x = sign * half_baseline * (-z_rad.sin());
    let offset_y = sign * half_baseline * z_rad.cos();

    let world = WorldPoint {
        x_mm: centre.x_mm + offset_x,
        y_mm: centre.y_mm + offset_y,
        z_mm: centre.z_mm,
    };

    let orientation = EulerAngles {
        omega_deg: 0.0,
        phi_deg: machine.c,
        kappa_deg: machine.z + sign * stereo.convergence_angle_deg,
    };

    CameraPose { world, orientation }
}

/// Servo-tilt focus tracking: the tilt angle that keeps a
/// focus point at height `y_focus` centred in frame, given the camera's
/// radial distance `x` and height `y`.
///
/// `c = −atan2(y − y_focus, x)` degrees.
pub fn tilt_for_focus_point(x_mm: f64, y_mm: f64, y_focus_mm: f64) -> f64 {
    -(y_mm - y_focus_mm).atan2(x_mm).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_point_at_zero_rotation_lies_on_x_axis() {
        let machine = Position4D::new(80.0, 40.0, 0.0, 0.0);
        let p = centre_world_point(machine);
        assert!((p.x_mm - 80.0).abs() < 1e-9);
        assert!(p.y_mm.abs() < 1e-9);
        assert!((p.z_mm - 40.0).abs() < 1e-9);
    }

    #[test]
    fn centre_point_at_90_degrees_lies_on_y_axis() {
        let machine = Position4D::new(80.0, 40.0, 90.0, 0.0);
        let p = centre_world_point(machine);
        assert!(p.x_mm.abs() < 1e-6);
        assert!((p.y_mm - 80.0).abs() < 1e-6);
    }

    #[test]
    fn stereo_pair_is_symmetric_about_centre() {
        let machine = Position4D::new(80.0, 40.0, 0.0, 0.0);
        let stereo = StereoConfig {
            baseline_mm: 60.0,
            convergence_angle_deg: 5.0,
        };
        let left = stereo_camera_pose(machine, stereo, StereoSide::Left);
        let right = stereo_camera_pose(machine, stereo, StereoSide::Right);
        let centre = centre_world_point(machine);

        let left_dist = ((left.world.x_mm - centre.x_mm).powi(2) + (left.world.y_mm - centre.y_mm).powi(2)).sqrt();
        let right_dist = ((right.world.x_mm - centre.x_mm).powi(2) + (right.world.y_mm - centre.y_mm).powi(2)).sqrt();
        assert!((left_dist - 30.0).abs() < 1e-9);
        assert!((right_dist - 30.0).abs() < 1e-9);

        assert!((left.orientation.kappa_deg - 5.0).abs() < 1e-9);
        assert!((right.orientation.kappa_deg + 5.0).abs() < 1e-9);
        assert_eq!(left.orientation.omega_deg, 0.0);
    }

    #[test]
    fn tilt_tracks_focus_point_centred_on_axis() {
        // Camera directly level with the focus point: no tilt needed.
        let tilt = tilt_for_focus_point(80.0, 60.0, 60.0);
        assert!(tilt.abs() < 1e-9);
    }

    #[test]
    fn tilt_points_down_when_camera_above_focus() {
        let tilt = tilt_for_focus_point(80.0, 100.0, 60.0);
        assert!(tilt < 0.0);
    }
}
