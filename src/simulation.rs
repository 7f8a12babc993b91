//! Component factory: a clean factory builds either real or simulated
//! components based on one flag, instead of a hardware-detection dance.
//! All wiring from [`Settings`] into live [`ScanOrchestrator`] collaborators
//! happens here, and nowhere else.

use crate::camera::{CameraController, CameraDevice, CameraSettings};
use crate::config::Settings;
use crate::error::{AppResult, ScanError};
use crate::events::EventBus;
use crate::lighting::{LedZoneConfig, LightingController, PwmZone};
use crate::motion::{Motion, MotionController, MotionProtocolEngine};
use crate::orchestrator::ScanOrchestrator;
use crate::persistence::ImageStore;
use crate::position::AxisConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything a scan needs, already wired together. Built once at startup
/// by [`build`] and shared (via `Arc`) between the CLI's scan task and any
/// concurrent status readers.
pub struct ScanRig {
    pub motion: Arc<dyn Motion>,
    pub cameras: Arc<CameraController>,
    pub lighting: Arc<LightingController>,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<ScanOrchestrator>,
}

/// Real camera and PWM backends are a trait-seam extension point this
/// crate doesn't fill in: the core only knows the capability trait, and a
/// concrete driver crate would implement it. Constructing a non-simulated
/// rig therefore always yields
/// [`ScanError::HardwareConnection`] for cameras/lighting until a concrete
/// backend is plugged in; motion has a real backend (the serial protocol
/// engine) since that's the one subsystem this crate speaks to directly.
fn unimplemented_hardware(component: &str) -> ScanError {
    ScanError::HardwareConnection(format!("no real {component} backend is linked into this build; run with system.simulation_mode = true, or provide one"))
}

fn axis_map(settings: &Settings) -> HashMap<String, AxisConfig> {
    settings.motion.axes.iter().map(|(name, axis)| (name.clone(), axis.clone().into())).collect()
}

async fn build_motion(settings: &Settings) -> AppResult<Arc<dyn Motion>> {
    if settings.system.simulation_mode {
        return Ok(Arc::new(crate::motion::MockMotionController::new(axis_map(settings))));
    }

    let engine = MotionProtocolEngine::connect(
        &settings.motion.port,
        settings.motion.baud_rate,
        Duration::from_millis(settings.motion.command_timeout_ms),
    )?;
    let controller = MotionController::new(engine, axis_map(settings), Duration::from_millis(settings.motion.homing_timeout_ms))?;
    Ok(Arc::new(controller))
}

fn build_cameras(settings: &Settings) -> AppResult<CameraController> {
    let mut devices: Vec<(Arc<dyn CameraDevice>, CameraSettings)> = Vec::with_capacity(settings.cameras.len());
    for entry in &settings.cameras {
        let camera_settings = CameraSettings {
            id: entry.id.clone(),
            device_path: entry.device_path.clone(),
            capture_width: entry.capture_width,
            capture_height: entry.capture_height,
            jpeg_quality: entry.jpeg_quality,
            focus_mode: entry.focus.mode,
            manual_lens_position: entry.focus.manual_lens_position,
            af_range: entry.focus.af_range,
            af_timeout_ms: entry.focus.af_timeout_ms,
        };
        let device: Arc<dyn CameraDevice> = if settings.system.simulation_mode {
            Arc::new(crate::camera::mock::MockCamera::new(entry.id.clone(), entry.capture_width, entry.capture_height))
        } else {
            return Err(unimplemented_hardware("camera"));
        };
        devices.push((device, camera_settings));
    }
    Ok(CameraController::new(devices))
}

/// Every zone shares the scan-wide brightness/flash settings (the
/// config layer has no per-zone override for these; only the PWM channel
/// identity differs between zones).
fn build_lighting(settings: &Settings) -> AppResult<LightingController> {
    let mut zones: Vec<(Arc<dyn PwmZone>, LedZoneConfig)> = Vec::with_capacity(settings.lighting.zones.len());
    for zone in &settings.lighting.zones {
        let config = LedZoneConfig {
            id: zone.id.clone(),
            pwm_channel: zone.pwm_channel,
            max_duty_cycle: zone.max_duty_cycle,
            idle_brightness: settings.lighting.idle_brightness,
            capture_brightness: settings.lighting.capture_brightness,
            flash_mode: settings.lighting.flash_mode,
            flash_duration_ms: settings.lighting.flash_duration_ms,
        };
        let device: Arc<dyn PwmZone> = if settings.system.simulation_mode {
            Arc::new(crate::lighting::mock::MockPwmZone::new(zone.id.clone()))
        } else {
            return Err(unimplemented_hardware("PWM zone"));
        };
        zones.push((device, config));
    }
    Ok(LightingController::new(zones))
}

/// Builds a fully wired [`ScanRig`] from loaded, validated settings.
/// `store` is the storage collaborator: the caller supplies it since
/// on-disk layout is outside this crate's scope.
pub async fn build(settings: &Settings, store: Arc<dyn ImageStore>) -> AppResult<ScanRig> {
    let events = Arc::new(EventBus::new(256));

    let motion = build_motion(settings).await?;
    let cameras = Arc::new(build_cameras(settings)?.with_events(events.clone()));
    let lighting = Arc::new(build_lighting(settings)?.with_events(events.clone()));

    cameras.initialize_all().await?;

    let orchestrator = Arc::new(ScanOrchestrator::new(motion.clone(), cameras.clone(), lighting.clone(), store, events.clone()));

    Ok(ScanRig {
        motion,
        cameras,
        lighting,
        events,
        orchestrator,
    })
}
