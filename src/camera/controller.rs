//! Multi-camera orchestration: lifecycle, synchronized dual capture,
//! ISP-stall recovery, and focus persistence/stacking.

use crate::camera::device::CameraDevice;
use crate::camera::types::{CalibrationResult, CameraSettings, CameraState, CaptureResult, FocusMode, SyncCaptureResult};
use crate::error::{AppResult, ScanError};
use crate::events::{EventBus, EventData};
use crate::position::Position4D;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

const ISP_STALL_DEADLINE: Duration = Duration::from_secs(10);
const ISP_STALL_MAX_ATTEMPTS: u32 = 3;
const ISP_STALL_STOP_DELAY: Duration = Duration::from_millis(500);
const ISP_STALL_START_DELAY: Duration = Duration::from_millis(300);
/// Lens settling delay between focus-stack levels, also used by the
/// orchestrator's per-point stack loop.
pub const FOCUS_STACK_SETTLE: Duration = Duration::from_millis(150);
const FOCUS_PERSISTENCE_EPS: f64 = 5.0;
const AE_SETTLE_FRAMES: u32 = 3;
const AE_SETTLE_FRAME_DELAY: Duration = Duration::from_millis(300);

struct CameraEntry {
    device: Arc<dyn CameraDevice>,
    settings: CameraSettings,
    state: Mutex<CameraState>,
    /// The lens position this camera is supposed to be holding, set by
    /// every operation that moves focus (`set_focus_manual`,
    /// `autofocus_once`, `apply_focus`). Reasserted after `reconfigure`
    /// and `calibrate_exposure(skip_autofocus=true)`, which otherwise
    /// risk disturbing it (±5 lens units tolerance before reassertion).
    focus_memory: Mutex<Option<f64>>,
}

pub struct CameraController {
    cameras: Vec<CameraEntry>,
    events: Option<Arc<EventBus>>,
}

impl CameraController {
    pub fn new(cameras: Vec<(Arc<dyn CameraDevice>, CameraSettings)>) -> Self {
        Self {
            cameras: cameras
                .into_iter()
                .map(|(device, settings)| CameraEntry {
                    device,
                    settings,
                    state: Mutex::new(CameraState::Uninitialized),
                    focus_memory: Mutex::new(None),
                })
                .collect(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, data: EventData) {
        if let Some(bus) = &self.events {
            bus.publish(data, "camera");
        }
    }

    fn entry(&self, camera_id: &str) -> AppResult<&CameraEntry> {
        self.cameras
            .iter()
            .find(|e| e.settings.id == camera_id)
            .ok_or_else(|| ScanError::Configuration(format!("unknown camera '{camera_id}'")))
    }

    #[instrument(skip(self))]
    pub async fn initialize_all(&self) -> AppResult<()> {
        for entry in &self.cameras {
            entry
                .device
                .initialize()
                .await
                .map_err(|e| ScanError::HardwareConnection(format!("{}: {e}", entry.settings.id)))?;
            *entry.state.lock() = CameraState::Configured;
            // `initialize()` already leaves the device streaming; capture,
            // calibration, and focus operations are only valid from
            // `Streaming`.
            *entry.state.lock() = CameraState::Streaming;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) -> AppResult<()> {
        for entry in &self.cameras {
            entry.device.shutdown().await?;
            *entry.state.lock() = CameraState::Uninitialized;
        }
        Ok(())
    }

    /// Sets manual focus and records the value as this camera's focus
    /// memory. Idempotent: setting the same
    /// value twice issues the settle delay twice but leaves no different
    /// end state.
    #[instrument(skip(self))]
    pub async fn set_focus_manual(&self, camera_id: &str, lens_position: f64) -> AppResult<()> {
        if !(0.0..=15.0).contains(&lens_position) {
            return Err(ScanError::Configuration(format!("{camera_id}: lens position {lens_position} out of range [0, 15]")));
        }
        let entry = self.entry(camera_id)?;
        entry.device.set_focus_manual(lens_position).await?;
        *entry.focus_memory.lock() = Some(lens_position);
        Ok(())
    }

    /// Triggers one autofocus cycle and records the resulting lens
    /// position as focus memory.
    #[instrument(skip(self))]
    pub async fn autofocus_once(&self, camera_id: &str) -> AppResult<f64> {
        let entry = self.entry(camera_id)?;
        let pos = entry
            .device
            .autofocus_once(entry.settings.af_range, entry.settings.af_timeout_ms)
            .await?;
        *entry.focus_memory.lock() = Some(pos);
        Ok(pos)
    }

    /// Re-asserts this camera's focus memory if the device's actual lens
    /// position has drifted beyond tolerance. Called after any operation
    /// that internally touches camera controls.
    async fn reassert_focus_memory(&self, entry: &CameraEntry) -> AppResult<()> {
        let Some(expected) = *entry.focus_memory.lock() else {
            return Ok(());
        };
        let actual = entry.device.current_lens_position().await?;
        if (actual - expected).abs() > FOCUS_PERSISTENCE_EPS {
            warn!(camera_id = %entry.settings.id, expected, actual, "focus drifted beyond persistence tolerance, reasserting");
            entry.device.set_focus_manual(expected).await?;
        }
        Ok(())
    }

    /// Stops streaming, applies a new resolution, restarts streaming, and
    /// reapplies the stored focus memory before returning.
    #[instrument(skip(self))]
    pub async fn reconfigure(&self, camera_id: &str, width: u32, height: u32) -> AppResult<()> {
        let entry = self.entry(camera_id)?;
        *entry.state.lock() = CameraState::Reconfiguring;
        entry.device.reconfigure(width, height).await?;
        self.reassert_focus_memory(entry).await?;
        *entry.state.lock() = CameraState::Streaming;
        Ok(())
    }

    /// Enables auto-exposure, waits for the configured number of settling
    /// frames, optionally runs autofocus, then reads back final exposure
    /// metadata. When `skip_autofocus` is
    /// true, autofocus is never engaged and the camera's lens position is
    /// reasserted against focus memory after the settle, since AE settling
    /// on some devices nudges focus as a side effect of metadata probes.
    #[instrument(skip(self))]
    pub async fn calibrate_exposure(&self, camera_id: &str, skip_autofocus: bool) -> AppResult<CalibrationResult> {
        let entry = self.entry(camera_id)?;
        entry.device.enable_auto_exposure().await?;
        for _ in 0..AE_SETTLE_FRAMES {
            tokio::time::sleep(AE_SETTLE_FRAME_DELAY).await;
        }

        if !skip_autofocus {
            let pos = entry
                .device
                .autofocus_once(entry.settings.af_range, entry.settings.af_timeout_ms)
                .await?;
            *entry.focus_memory.lock() = Some(pos);
        } else {
            self.reassert_focus_memory(entry).await?;
        }

        let (exposure_us, analog_gain) = entry.device.read_exposure_metadata().await?;
        Ok(CalibrationResult {
            exposure_us,
            analog_gain,
        })
    }

    /// Applies a camera's configured focus mode for the current point.
    /// `is_first_point` gates `AutofocusOnce`: later points reuse the
    /// persisted focus memory instead of re-running autofocus.
    #[instrument(skip(self))]
    pub async fn apply_focus(&self, camera_id: &str, is_first_point: bool) -> AppResult<f64> {
        let entry = self.entry(camera_id)?;
        let settings = &entry.settings;

        let target = match settings.focus_mode {
            FocusMode::Default => entry.device.current_lens_position().await?,
            FocusMode::Manual => {
                let pos = settings
                    .manual_lens_position
                    .ok_or_else(|| ScanError::Configuration(format!("{camera_id}: manual focus mode requires manual_lens_position")))?;
                self.set_focus_manual(camera_id, pos).await?;
                pos
            }
            FocusMode::ContinuousAf => self.autofocus_once(camera_id).await?,
            FocusMode::AutofocusOnce => {
                if is_first_point {
                    self.autofocus_once(camera_id).await?
                } else {
                    let persisted = *entry.focus_memory.lock();
                    let pos = persisted.ok_or_else(|| {
                        ScanError::Configuration(format!("{camera_id}: autofocus_once has no persisted position"))
                    })?;
                    entry.device.set_focus_manual(pos).await?;
                    self.reassert_focus_memory(entry).await?;
                    pos
                }
            }
        };
        Ok(target)
    }

    /// Captures a single frame from one camera, with ISP-stall recovery:
    /// up to 3 attempts, each allowed the full 10s deadline, with a
    /// stop/500ms/restart/300ms cycle between attempts.
    #[instrument(skip(self))]
    pub async fn capture(&self, camera_id: &str, position: Position4D) -> AppResult<CaptureResult> {
        let entry = self.entry(camera_id)?;
        *entry.state.lock() = CameraState::Capturing;

        let mut last_err = None;
        for attempt in 1..=ISP_STALL_MAX_ATTEMPTS {
            let result = tokio::time::timeout(ISP_STALL_DEADLINE, entry.device.capture()).await;
            match result {
                Ok(Ok(frame)) => {
                    *entry.state.lock() = CameraState::Streaming;
                    let lens_position = entry.device.current_lens_position().await.unwrap_or(0.0);
                    if attempt > 1 {
                        self.publish(EventData::CameraRecovered {
                            camera_id: camera_id.to_string(),
                            attempts: attempt,
                        });
                    }
                    return Ok(CaptureResult {
                        camera_id: camera_id.to_string(),
                        frame,
                        lens_position,
                        captured_at_ns: crate::position::now_ns(),
                        position,
                    });
                }
                Ok(Err(e)) => last_err = Some(e.to_string()),
                Err(_) => last_err = Some("capture deadline exceeded".to_string()),
            }

            self.publish(EventData::CameraFailed {
                camera_id: camera_id.to_string(),
                detail: last_err.clone().unwrap_or_default(),
            });

            if attempt < ISP_STALL_MAX_ATTEMPTS {
                *entry.state.lock() = CameraState::Recovering;
                warn!(camera_id, attempt, "ISP stall suspected, cycling pipeline");
                tokio::time::sleep(ISP_STALL_STOP_DELAY).await;
                entry.device.restart_pipeline().await?;
                tokio::time::sleep(ISP_STALL_START_DELAY).await;
            }
        }

        Err(ScanError::CameraCapture {
            camera_id: camera_id.to_string(),
            attempts: ISP_STALL_MAX_ATTEMPTS,
            detail: last_err.unwrap_or_default(),
        })
    }

    /// Captures from every camera as concurrently as the executor allows,
    /// firing all captures as simultaneously as the underlying library
    /// allows, and reports the observed timestamp skew.
    /// Returns an error as soon as any camera's capture fails, after every
    /// launched capture has resolved.
    #[instrument(skip(self))]
    pub async fn capture_sync_all(&self, position: Position4D) -> AppResult<SyncCaptureResult> {
        let futures = self.cameras.iter().map(|entry| self.capture(&entry.settings.id, position));
        let results = futures::future::join_all(futures).await;
        let mut captures = Vec::with_capacity(results.len());
        for result in results {
            captures.push(result?);
        }

        let skew_ns = if captures.len() >= 2 {
            let first = captures[0].captured_at_ns as i64;
            captures
                .iter()
                .skip(1)
                .map(|c| (c.captured_at_ns as i64 - first).abs())
                .max()
                .unwrap_or(0)
        } else {
            0
        };

        const SYNC_SKEW_TARGET_NS: i64 = 10_000_000;
        if skew_ns > SYNC_SKEW_TARGET_NS {
            self.publish(EventData::CameraSyncLost { skew_ns });
        }

        Ok(SyncCaptureResult { captures, skew_ns, position })
    }

    pub fn camera_ids(&self) -> Vec<String> {
        self.cameras.iter().map(|e| e.settings.id.clone()).collect()
    }

    pub fn focus_mode_of(&self, camera_id: &str) -> Option<FocusMode> {
        self.cameras.iter().find(|e| e.settings.id == camera_id).map(|e| e.settings.focus_mode)
    }

    pub fn state_of(&self, camera_id: &str) -> Option<CameraState> {
        self.cameras
            .iter()
            .find(|e| e.settings.id == camera_id)
            .map(|e| *e.state.lock())
    }
}
