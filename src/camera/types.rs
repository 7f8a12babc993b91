//! Camera-facing data types.

use crate::position::Position4D;
use scan_core::Frame;
use serde::{Deserialize, Serialize};

/// Focus handling mode for a single camera, set per scan or per point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FocusMode {
    /// Use whatever focus position the camera currently holds.
    Default,
    /// Drive to an explicit lens position and hold it (no further AF).
    Manual,
    /// Autofocus once at scan start, then hold the resulting position for
    /// every subsequent point.
    AutofocusOnce,
    /// Re-run autofocus before every capture.
    ContinuousAf,
}

/// Camera identity + per-camera settings loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    pub id: String,
    pub device_path: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub jpeg_quality: u8,
    pub focus_mode: FocusMode,
    pub manual_lens_position: Option<f64>,
    pub af_range: Option<(f64, f64)>,
    pub af_timeout_ms: u64,
}

/// Result of a single-camera capture.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub camera_id: String,
    pub frame: Frame,
    pub lens_position: f64,
    pub captured_at_ns: u64,
    /// Actual machine position read back after the move that preceded this
    /// capture, not the pattern point's nominal target.
    pub position: Position4D,
}

/// Result of capturing from all cameras "simultaneously": both captures
/// are issued back-to-back and the observed
/// timestamp skew is reported so the orchestrator/metadata layer can flag
/// desyncs rather than silently accept them.
#[derive(Debug, Clone)]
pub struct SyncCaptureResult {
    pub captures: Vec<CaptureResult>,
    pub skew_ns: i64,
    /// Actual machine position at which this sync-capture group was taken.
    pub position: Position4D,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub exposure_us: u32,
    pub analog_gain: f64,
}

/// Lifecycle state of a single camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Uninitialized,
    Configured,
    Streaming,
    Capturing,
    Reconfiguring,
    Recovering,
}
