//! Camera subsystem: device capability trait, controller, and a
//! simulation-mode mock.

pub mod controller;
pub mod device;
pub mod mock;
pub mod types;

pub use controller::{CameraController, FOCUS_STACK_SETTLE};
pub use device::CameraDevice;
pub use types::{CalibrationResult, CameraSettings, CameraState, CaptureResult, FocusMode, SyncCaptureResult};
