//! Scan orchestrator: sequences motion, lighting, capture, and persistence
//! per scan point, with pause/resume/cancel and a final report.
//!
//! This is the only component with references to every hardware subsystem.
//! Motion, camera, and lighting never call one another directly.

use crate::camera::{CameraController, FocusMode as CameraFocusMode};
use crate::coords::{stereo_camera_pose, StereoConfig, StereoSide};
use crate::error::{AppResult, ScanError};
use crate::events::{EventBus, EventData};
use crate::lighting::LightingController;
use crate::metadata::{append_manifest_row, write_exif, write_xmp_sidecar, ImageMetadata, ManifestFormat};
use crate::motion::Motion;
use crate::pattern::{ScanPattern, ScanPoint};
use crate::persistence::ImageStore;
use crate::position::now_ns;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::instrument;

/// High-level scan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Sub-phase within a running scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Init,
    Homing,
    Positioning,
    Calibrating,
    Capturing,
    Saving,
    Finalising,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Progress {
    pub current_point: usize,
    pub total_points: usize,
    pub stack_index: usize,
    pub stack_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanPointError {
    pub point_index: usize,
    pub kind: String,
    pub detail: String,
}

/// Final, terminal-state report.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: String,
    pub status: ScanStatus,
    pub started_at_ns: u64,
    pub ended_at_ns: u64,
    pub elapsed_active_s: f64,
    pub points_completed: usize,
    pub images_captured: usize,
    pub images_failed: usize,
    pub errors: Vec<ScanPointError>,
}

/// Snapshot of live scan state, obtained without blocking the orchestrator
/// loop: external readers get this via a non-blocking read.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStateSnapshot {
    pub id: String,
    pub status: ScanStatus,
    pub phase: ScanPhase,
    pub progress: Progress,
    pub errors: Vec<ScanPointError>,
}

/// What the orchestrator should do at its next suspension point, set by
/// `pause`/`resume`/`cancel` from outside the running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    PauseRequested,
    CancelRequested,
}

struct Timing {
    started_at_ns: u64,
    paused_accum_ns: AtomicU64,
    paused_since_ns: AtomicU64,
}

impl Timing {
    fn new() -> Self {
        Self {
            started_at_ns: now_ns(),
            paused_accum_ns: AtomicU64::new(0),
            paused_since_ns: AtomicU64::new(0),
        }
    }

    fn mark_paused(&self) {
        self.paused_since_ns.store(now_ns(), Ordering::SeqCst);
    }

    fn mark_resumed(&self) {
        let since = self.paused_since_ns.swap(0, Ordering::SeqCst);
        if since != 0 {
            let elapsed = now_ns().saturating_sub(since);
            self.paused_accum_ns.fetch_add(elapsed, Ordering::SeqCst);
        }
    }

    fn elapsed_active_s(&self, ended_at_ns: u64) -> f64 {
        let total = ended_at_ns.saturating_sub(self.started_at_ns);
        let paused = self.paused_accum_ns.load(Ordering::SeqCst);
        (total.saturating_sub(paused)) as f64 / 1e9
    }
}

pub struct ScanOptions {
    pub scan_id: String,
    pub stereo: StereoConfig,
    pub manifest_path: Option<PathBuf>,
    pub manifest_format: ManifestFormat,
    pub write_exif_sidecars: bool,
}

pub struct ScanOrchestrator {
    motion: Arc<dyn Motion>,
    cameras: Arc<CameraController>,
    lighting: Arc<LightingController>,
    store: Arc<dyn ImageStore>,
    events: Arc<EventBus>,
    control_tx: watch::Sender<ControlSignal>,
    state: AsyncMutex<ScanStateSnapshot>,
}

impl ScanOrchestrator {
    pub fn new(
        motion: Arc<dyn Motion>,
        cameras: Arc<CameraController>,
        lighting: Arc<LightingController>,
        store: Arc<dyn ImageStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let (control_tx, _) = watch::channel(ControlSignal::Run);
        Self {
            motion,
            cameras,
            lighting,
            store,
            events,
            control_tx,
            state: AsyncMutex::new(ScanStateSnapshot {
                id: String::new(),
                status: ScanStatus::Idle,
                phase: ScanPhase::Init,
                progress: Progress::default(),
                errors: Vec::new(),
            }),
        }
    }

    /// Non-blocking snapshot of current scan state for external readers.
    pub async fn snapshot(&self) -> ScanStateSnapshot {
        self.state.lock().await.clone()
    }

    /// Requests a pause. Takes effect after the current point's captures
    /// finish, never mid-capture or mid-motion.
    pub fn pause(&self) {
        let _ = self.control_tx.send(ControlSignal::PauseRequested);
    }

    pub fn resume(&self) {
        let _ = self.control_tx.send(ControlSignal::Run);
    }

    /// Requests cancellation. Takes effect at the same boundary as pause.
    pub fn cancel(&self) {
        let _ = self.control_tx.send(ControlSignal::CancelRequested);
    }

    fn publish(&self, data: EventData) {
        self.events.publish(data, "scan");
    }

    async fn set_phase(&self, phase: ScanPhase) {
        self.state.lock().await.phase = phase;
    }

    async fn set_status(&self, status: ScanStatus) {
        self.state.lock().await.status = status;
    }

    async fn push_error(&self, point_index: usize, kind: &str, detail: String) {
        let mut state = self.state.lock().await;
        state.errors.push(ScanPointError {
            point_index,
            kind: kind.to_string(),
            detail,
        });
    }

    /// Runs `pattern` to completion (or cancellation/failure), driving
    /// motion → lighting → capture → persistence per point.
    #[instrument(skip(self, pattern, opts))]
    pub async fn run_scan(&self, pattern: ScanPattern, opts: ScanOptions) -> AppResult<ScanReport> {
        let timing = Timing::new();
        let total_points = pattern.len();

        {
            let mut state = self.state.lock().await;
            *state = ScanStateSnapshot {
                id: opts.scan_id.clone(),
                status: ScanStatus::Initializing,
                phase: ScanPhase::Init,
                progress: Progress {
                    total_points,
                    ..Default::default()
                },
                errors: Vec::new(),
            };
        }

        self.publish(EventData::ScanStarted {
            scan_id: opts.scan_id.clone(),
            total_points,
        });

        self.lighting.prepare_scan().await?;
        self.set_status(ScanStatus::Running).await;

        let mut images_captured = 0usize;
        let mut points_completed = 0usize;
        let mut terminal_status = ScanStatus::Completed;
        let camera_ids = self.cameras.camera_ids();
        let total_expected_images: usize = pattern.iter().map(|p| p.capture_count()).sum::<usize>() * camera_ids.len().max(1);

        for (point_index, point) in pattern.iter().enumerate() {
            if let Some(status) = self.wait_for_resume_or_stop(&timing).await {
                terminal_status = status;
                break;
            }

            match self
                .run_point(&opts, point_index, point, point_index == 0, &camera_ids, &mut images_captured)
                .await
            {
                Ok(()) => {
                    points_completed += 1;
                    self.publish(EventData::ScanPointCompleted {
                        scan_id: opts.scan_id.clone(),
                        point_index,
                        images_captured: point.capture_count() * camera_ids.len(),
                    });
                }
                Err(err) => {
                    let kind = error_kind(&err);
                    self.push_error(point_index, kind, err.to_string()).await;
                    // Camera and lighting controllers already publish their
                    // own specific failure events at the point of failure;
                    // only motion-category errors need a scan-level event
                    // surfaced here.
                    if matches!(kind, "motion_limit" | "motion_alarm" | "motion_timeout" | "homing") {
                        self.publish(EventData::MotionFailed { detail: err.to_string() });
                    }
                    if !err.recoverable() {
                        terminal_status = ScanStatus::Failed;
                        break;
                    }
                }
            }
        }

        self.set_phase(ScanPhase::Finalising).await;
        let _ = self.lighting.turn_off_all().await;

        match terminal_status {
            ScanStatus::Cancelled => self.publish(EventData::ScanCancelled { scan_id: opts.scan_id.clone() }),
            ScanStatus::Failed => self.publish(EventData::ScanFailed {
                scan_id: opts.scan_id.clone(),
                detail: "unrecoverable error during scan".into(),
            }),
            _ => self.publish(EventData::ScanCompleted { scan_id: opts.scan_id.clone() }),
        }

        self.set_status(terminal_status).await;

        let ended_at_ns = now_ns();
        let state = self.state.lock().await;
        let images_failed = total_expected_images.saturating_sub(images_captured);
        let report = ScanReport {
            scan_id: opts.scan_id.clone(),
            status: terminal_status,
            started_at_ns: timing.started_at_ns,
            ended_at_ns,
            elapsed_active_s: timing.elapsed_active_s(ended_at_ns),
            points_completed,
            images_captured,
            images_failed,
            errors: state.errors.clone(),
        };
        Ok(report)
    }

    /// Blocks while paused; returns `Some(status)` if the scan should stop
    /// (cancellation), `None` to continue. Checked at the inter-point
    /// boundary, which is also where a pause requested mid-point actually
    /// takes effect: a pause requested during calibrating defers until the
    /// subsequent inter-point boundary.
    async fn wait_for_resume_or_stop(&self, timing: &Timing) -> Option<ScanStatus> {
        let mut rx = self.control_tx.subscribe();
        loop {
            match *rx.borrow() {
                ControlSignal::Run => return None,
                ControlSignal::CancelRequested => return Some(ScanStatus::Cancelled),
                ControlSignal::PauseRequested => {
                    if self.state.lock().await.status != ScanStatus::Paused {
                        timing.mark_paused();
                        self.set_status(ScanStatus::Paused).await;
                        self.publish(EventData::ScanPaused {
                            scan_id: self.state.lock().await.id.clone(),
                        });
                    }
                }
            }
            if rx.changed().await.is_err() {
                return Some(ScanStatus::Failed);
            }
            if *rx.borrow() == ControlSignal::Run && self.state.lock().await.status == ScanStatus::Paused {
                timing.mark_resumed();
                self.set_status(ScanStatus::Running).await;
                self.publish(EventData::ScanResumed {
                    scan_id: self.state.lock().await.id.clone(),
                });
                return None;
            }
        }
    }

    #[instrument(skip(self, opts, point, camera_ids, images_captured))]
    async fn run_point(
        &self,
        opts: &ScanOptions,
        point_index: usize,
        point: &ScanPoint,
        is_first_point: bool,
        camera_ids: &[String],
        images_captured: &mut usize,
    ) -> AppResult<()> {
        self.set_phase(ScanPhase::Positioning).await;
        self.motion.move_absolute(point.position).await?;
        tokio::time::sleep(std::time::Duration::from_millis(point.dwell_ms)).await;
        let actual_position = self.motion.get_position().await?;

        if is_first_point {
            self.set_phase(ScanPhase::Calibrating).await;
            self.setup_first_point_focus(camera_ids, point).await?;
        } else {
            self.reresolve_continuous_af(camera_ids).await?;
        }

        self.set_phase(ScanPhase::Capturing).await;
        // Flash-mode zones bracket the whole capture window for this
        // point — raised once before the stack loop, lowered once after,
        // not per stack level.
        self.lighting.enter_capture_window().await?;
        let stack_total = point.capture_count();
        for stack_index in 1..=stack_total {
            {
                let mut state = self.state.lock().await;
                state.progress.current_point = point_index;
                state.progress.stack_index = stack_index;
                state.progress.stack_total = stack_total;
            }

            if let Some(values) = &point.focus_values {
                let lens_position = values[stack_index - 1];
                for cam in camera_ids {
                    self.cameras.set_focus_manual(cam, lens_position).await?;
                }
                tokio::time::sleep(crate::camera::FOCUS_STACK_SETTLE).await;
            }

            let sync = self.cameras.capture_sync_all(actual_position).await?;

            self.set_phase(ScanPhase::Saving).await;
            for capture in &sync.captures {
                let pose = stereo_camera_pose(capture.position, opts.stereo, stereo_side_for(&capture.camera_id, camera_ids));
                let mut meta = ImageMetadata::from_pose(&capture.camera_id, pose, capture.lens_position);
                meta.scan_id = opts.scan_id.clone();
                meta.point_index = point_index;
                meta.stack_index = stack_index;
                meta.stack_total = stack_total;

                let image_path = self.store.store(&capture.frame, &meta).await?;
                *images_captured += 1;
                let filename = image_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

                if let Some(manifest_path) = &opts.manifest_path {
                    let _ = append_manifest_row(manifest_path, opts.manifest_format, &filename, &meta);
                }
                if opts.write_exif_sidecars {
                    let _ = write_exif(&image_path, &meta);
                    let _ = write_xmp_sidecar(&image_path, &filename, &meta);
                }
            }
        }

        self.lighting.exit_capture_window().await?;
        Ok(())
    }

    /// First-point focus/calibration setup, applied per camera according
    /// to its own configured focus mode.
    async fn setup_first_point_focus(&self, camera_ids: &[String], point: &ScanPoint) -> AppResult<()> {
        for cam in camera_ids {
            let mode = point.focus_mode;
            match mode {
                Some(CameraFocusMode::ContinuousAf) => {
                    self.cameras.calibrate_exposure(cam, false).await?;
                }
                _ => {
                    self.cameras.apply_focus(cam, true).await?;
                    self.cameras.calibrate_exposure(cam, true).await?;
                }
            }
        }
        Ok(())
    }

    /// Re-resolves focus on every point for cameras running continuous
    /// autofocus; other modes hold their first-point result.
    async fn reresolve_continuous_af(&self, camera_ids: &[String]) -> AppResult<()> {
        for cam in camera_ids {
            if self.cameras.focus_mode_of(cam) == Some(CameraFocusMode::ContinuousAf) {
                self.cameras.apply_focus(cam, false).await?;
            }
        }
        Ok(())
    }
}

fn stereo_side_for(camera_id: &str, camera_ids: &[String]) -> StereoSide {
    match camera_ids.first() {
        Some(first) if first == camera_id => StereoSide::Left,
        _ => StereoSide::Right,
    }
}

fn error_kind(err: &ScanError) -> &'static str {
    match err {
        ScanError::Configuration(_) => "configuration",
        ScanError::HardwareConnection(_) => "hardware_connection",
        ScanError::MotionLimit { .. } => "motion_limit",
        ScanError::MotionAlarm(_) => "motion_alarm",
        ScanError::MotionTimeout { .. } => "motion_timeout",
        ScanError::CameraCapture { .. } => "camera_capture",
        ScanError::CameraSync { .. } => "camera_sync",
        ScanError::LedSafety { .. } => "led_safety",
        ScanError::Persistence(_) => "persistence",
        ScanError::Homing(_) => "homing",
        ScanError::Cancelled => "cancelled",
        ScanError::Core(_) => "core",
        ScanError::Serial(_) => "serial",
        ScanError::Config(_) => "config",
    }
}
