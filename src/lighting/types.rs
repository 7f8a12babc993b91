//! Lighting data types.

use serde::{Deserialize, Serialize};

/// Hard ceiling on commanded duty cycle. Requests above this are always
/// refused, never clamped.
pub const DUTY_CYCLE_CAP: f64 = 0.90;

/// Below this fractional change from the last commanded value, a
/// `set_brightness` call is treated as a no-op and the PWM write is
/// suppressed — except when it crosses the on/off boundary, which always
/// writes.
pub const REDUNDANT_WRITE_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FlashMode {
    /// Raise to capture brightness immediately before capture, drop back to
    /// idle brightness immediately after.
    Flash,
    /// Hold capture brightness for the duration of the scan.
    Constant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedZoneConfig {
    pub id: String,
    pub pwm_channel: u32,
    /// Per-zone duty-cycle ceiling. Always `<=
    /// DUTY_CYCLE_CAP`; validated at startup ([`crate::validation`]) and
    /// re-checked at the component boundary on every write so a
    /// misconfigured value can never reach the wire.
    pub max_duty_cycle: f64,
    pub idle_brightness: f64,
    pub capture_brightness: f64,
    pub flash_mode: FlashMode,
    pub flash_duration_ms: u64,
}
