//! Single-camera capability trait.
//!
//! One trait scoped to what a scan actually needs from a camera:
//! initialize/shutdown lifecycle, focus control, and a blocking single-frame
//! capture. Kept as one trait rather than split into finer capability
//! traits because every implementation here (real or mock) needs all of
//! it.

use async_trait::async_trait;
use scan_core::{CoreError, CoreResult, Frame};

/// A single camera. Implementations must be safe to call from multiple
/// concurrent captures only insofar as they serialize internally — the
/// controller never issues overlapping calls to the same device.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn id(&self) -> &str;

    async fn initialize(&self) -> CoreResult<()>;

    async fn shutdown(&self) -> CoreResult<()>;

    /// Drives to an explicit lens position and waits for it to settle.
    async fn set_focus_manual(&self, lens_position: f64) -> CoreResult<()>;

    /// Runs one autofocus pass and returns the resulting lens position.
    async fn autofocus_once(&self, range: Option<(f64, f64)>, timeout_ms: u64) -> CoreResult<f64>;

    /// Returns the camera's current lens position without moving it.
    async fn current_lens_position(&self) -> CoreResult<f64>;

    /// Captures a single frame at the current focus/exposure settings.
    async fn capture(&self) -> CoreResult<Frame>;

    /// Stops and restarts the capture pipeline, used by ISP-stall recovery.
    async fn restart_pipeline(&self) -> CoreResult<()>;

    /// Reads back exposure metadata (exposure time, analog gain) without
    /// changing any setting. Used after AE settling and by
    /// `calibrate_exposure`'s final read.
    async fn read_exposure_metadata(&self) -> CoreResult<(u32, f64)> {
        Err(CoreError::FeatureNotEnabled("auto_exposure_calibration"))
    }

    /// Enables auto-exposure; a no-op on devices that are always in AE mode.
    async fn enable_auto_exposure(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Stops streaming, applies a new resolution/format, and restarts
    /// streaming. Focus is *not* this method's concern — the controller
    /// reapplies the persisted focus memory afterward.
    async fn reconfigure(&self, width: u32, height: u32) -> CoreResult<()>;
}
