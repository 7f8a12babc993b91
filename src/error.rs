//! Application error type.
//!
//! `ScanError` consolidates the error taxonomy this crate's error-handling
//! design covers: configuration, hardware connection, motion limit, motion
//! alarm, motion timeout, camera capture, camera sync, LED safety, and
//! persistence. Each variant is tagged with a `can_recover` classification
//! (via [`ScanError::recoverable`]) that the orchestrator uses to map a
//! failure to a point-level outcome (success / retryable / skip /
//! fatal-to-scan).
//!
//! Transport-level failures (I/O, malformed wire data) are wrapped from
//! [`scan_core::CoreError`] rather than re-derived here.

use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Unknown axis, out-of-range limit, missing required field. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Port open failure, camera not found, PWM channel unavailable.
    /// Fatal unless `system.simulation_mode` is set.
    #[error("hardware connection error: {0}")]
    HardwareConnection(String),

    /// Target outside soft limits. Recoverable — returned to the caller
    /// before any bytes reach the wire.
    #[error("motion limit exceeded on axis {axis}: {value} not in [{min}, {max}]")]
    MotionLimit {
        axis: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// The board reported `ALARM:<n>`. Not recovered locally; the engine is
    /// marked `needs_reset`.
    #[error("motion controller alarm: code {0}")]
    MotionAlarm(u32),

    /// No `ok` within the serial command timeout, or no homing-done marker
    /// within the homing timeout. `retried` distinguishes a first-attempt
    /// timeout (the motion controller retries once internally) from the
    /// second, post-retry timeout it gives up on — only the latter is
    /// fatal to the scan; see [`ScanError::recoverable`].
    #[error("motion timeout: {detail}")]
    MotionTimeout { detail: String, retried: bool },

    /// ISP stall, buffer error, or frame-fetch timeout exhausted its retries.
    #[error("camera capture failed on {camera_id} after {attempts} attempts: {detail}")]
    CameraCapture {
        camera_id: String,
        attempts: u32,
        detail: String,
    },

    /// Observed sync skew between cameras exceeded the target; non-fatal.
    #[error("camera sync lost: skew {skew_ns} ns exceeds target")]
    CameraSync { skew_ns: i64 },

    /// Duty cycle above the hard safety bound was requested. Always refused.
    #[error("LED safety violation on zone {zone}: requested {requested} exceeds cap {cap}")]
    LedSafety {
        zone: String,
        requested: f64,
        cap: f64,
    },

    /// Failures delegated from the storage collaborator.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The motion board homed without ever showing the debug marker, or
    /// without a subsequent idle report.
    #[error("homing did not complete: {0}")]
    Homing(String),

    /// A cancellable operation (capture frame fetch, serial command) was
    /// cancelled cooperatively at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] scan_core::CoreError),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error(transparent)]
    Config(#[from] figment::Error),
}

impl ScanError {
    /// Whether the orchestrator may retry or continue after this error, as
    /// opposed to treating it as fatal-to-scan.
    pub fn recoverable(&self) -> bool {
        match self {
            ScanError::Configuration(_) => false,
            ScanError::HardwareConnection(_) => false,
            ScanError::MotionLimit { .. } => true,
            ScanError::MotionAlarm(_) => false,
            // A first-attempt timeout is worth retrying; the motion
            // controller already does so internally before this error
            // would otherwise surface. A `retried` timeout has already
            // exhausted that retry and is fatal to the scan per spec.md
            // §7: "second failure is fatal for the scan."
            ScanError::MotionTimeout { retried, .. } => !retried,
            ScanError::CameraCapture { .. } => true,
            ScanError::CameraSync { .. } => true,
            ScanError::LedSafety { .. } => true,
            ScanError::Persistence(_) => true,
            ScanError::Homing(_) => false,
            ScanError::Cancelled => true,
            ScanError::Core(_) => false,
            ScanError::Serial(_) => false,
            ScanError::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_limit_is_recoverable() {
        let err = ScanError::MotionLimit {
            axis: "x".into(),
            value: 500.0,
            min: 0.0,
            max: 300.0,
        };
        assert!(err.recoverable());
    }

    #[test]
    fn alarm_is_not_recoverable() {
        assert!(!ScanError::MotionAlarm(9).recoverable());
    }

    #[test]
    fn first_attempt_timeout_is_recoverable_but_retried_one_is_fatal() {
        let first = ScanError::MotionTimeout {
            detail: "no ack within 2s".into(),
            retried: false,
        };
        assert!(first.recoverable());

        let second = ScanError::MotionTimeout {
            detail: "no ack within 2s".into(),
            retried: true,
        };
        assert!(!second.recoverable());
    }
}
