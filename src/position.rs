//! Shared position and axis data model.
//!
//! `Position4D` is the machine-frame tuple the motion protocol engine parses
//! status reports into, and the type the motion controller validates and
//! commands against. Axis typing (linear vs. rotational, bounded vs.
//! continuous) lives in [`AxisConfig`] so the controller can apply the right
//! validation and normalization rule per axis without special-casing by name.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tag distinguishing how an axis is validated and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AxisKind {
    Linear,
    RotationalBounded,
    /// Wraps at ±180°, has no home position.
    RotationalContinuous,
}

/// Per-axis configuration.
///
/// Invariant: `min <= home <= max` for bounded axes. Continuous axes are
/// stored with `min = -180.0, max = 180.0` but accept any commanded value,
/// normalized before dispatch by [`crate::motion::controller::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    pub kind: AxisKind,
    pub units: String,
    pub min: f64,
    pub max: f64,
    pub home: f64,
    pub max_feedrate: f64,
    pub steps_per_unit: f64,
    pub homing_required: bool,
}

impl AxisConfig {
    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, AxisKind::RotationalContinuous)
    }

    /// Validates the `min <= home <= max` invariant for bounded axes.
    /// Continuous axes are exempt (they accept any commanded value).
    pub fn validate(&self) -> Result<(), String> {
        if self.is_continuous() {
            return Ok(());
        }
        if !(self.min <= self.home && self.home <= self.max) {
            return Err(format!(
                "axis invariant violated: min ({}) <= home ({}) <= max ({}) does not hold",
                self.min, self.home, self.max
            ));
        }
        Ok(())
    }
}

/// The four axes of the rig, in machine-frame order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position4D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub c: f64,
}

impl Position4D {
    pub fn new(x: f64, y: f64, z: f64, c: f64) -> Self {
        Self { x, y, z, c }
    }

    /// Equality with continuous-axis (Z) comparison taken modulo 360°.
    pub fn approx_eq(&self, other: &Position4D, eps_lin: f64, eps_rot: f64) -> bool {
        (self.x - other.x).abs() <= eps_lin
            && (self.y - other.y).abs() <= eps_lin
            && normalize_deg(self.z - other.z).abs() <= eps_rot
            && normalize_deg(self.c - other.c).abs() <= eps_rot
    }
}

/// Normalizes an angle in degrees into `(-180, 180]`:
/// `normalize(θ) = ((θ + 180) mod 360) − 180`.
pub fn normalize_deg(theta: f64) -> f64 {
    let wrapped = (theta + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can return exactly -180.0 for inputs that are an odd
    // multiple of 180; fold that edge back to +180 so the range matches
    // the `(-180, 180]` convention used by shortest-path moves.
    if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

/// Authoritative machine states reported by the motion board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    Idle,
    Run,
    Jog,
    Home,
    Alarm,
    Hold,
    Door,
    Check,
}

impl MachineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, MachineState::Idle)
    }

    /// Parses the leading `<State|...` token from a status report.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "idle" => Some(MachineState::Idle),
            "run" => Some(MachineState::Run),
            "jog" => Some(MachineState::Jog),
            "home" => Some(MachineState::Home),
            "alarm" => Some(MachineState::Alarm),
            "hold" => Some(MachineState::Hold),
            "door" => Some(MachineState::Door),
            "check" => Some(MachineState::Check),
            _ => None,
        }
    }
}

/// Cached, parsed status report.
///
/// The local cache is only used to gate validation of new commands; the
/// machine state reported by the board is always authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionStatus {
    pub machine_state: MachineState,
    pub position_machine: Position4D,
    pub feedrate: Option<f64>,
    pub last_update_ns: u64,
}

impl MotionStatus {
    pub fn is_stale(&self, now_ns: u64, max_age_ns: u64) -> bool {
        now_ns.saturating_sub(self.last_update_ns) > max_age_ns
    }
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        for theta in [-540.0, -181.0, -180.0, -1.0, 0.0, 179.0, 180.0, 181.0, 540.0] {
            let once = normalize_deg(theta);
            let twice = normalize_deg(once);
            assert!((once - twice).abs() < 1e-9, "theta={theta}");
        }
    }

    #[test]
    fn normalize_handles_multiples_of_360() {
        for k in -3..=3 {
            let theta = 37.5 + 360.0 * k as f64;
            assert!((normalize_deg(theta) - 37.5).abs() < 1e-9);
        }
    }

    #[test]
    fn position_equality_wraps_rotational_axes() {
        let a = Position4D::new(10.0, 20.0, 179.0, 0.0);
        let b = Position4D::new(10.0, 20.0, -181.0, 0.0);
        assert!(a.approx_eq(&b, 0.01, 0.01));
    }

    #[test]
    fn axis_invariant_rejects_bad_bounds() {
        let axis = AxisConfig {
            kind: AxisKind::Linear,
            units: "mm".into(),
            min: 10.0,
            max: 5.0,
            home: 0.0,
            max_feedrate: 100.0,
            steps_per_unit: 80.0,
            homing_required: true,
        };
        assert!(axis.validate().is_err());
    }
}
