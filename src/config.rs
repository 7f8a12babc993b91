//! Configuration for scan4d.
//!
//! Loaded with `figment` layering a TOML file over built-in defaults
//! (`Provider` impl backed by `Serialized::defaults`, merged with a `Toml`
//! file provider). Hot reload and YAML loading are out of scope; this
//! module only covers the one-shot startup load plus the validation pass
//! in [`crate::validation`].

use crate::lighting::FlashMode;
use crate::position::{AxisConfig, AxisKind};
use figment::providers::{Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub motion: MotionSettings,
    pub cameras: Vec<CameraConfigEntry>,
    pub lighting: LightingSettings,
    pub stereo: StereoSettings,
    pub system: SystemSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            motion: MotionSettings::default(),
            cameras: Vec::new(),
            lighting: LightingSettings::default(),
            stereo: StereoSettings::default(),
            system: SystemSettings::default(),
        }
    }
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("scan4d defaults")
    }

    fn data(&self) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Settings::default()).data()
    }
}

impl Settings {
    /// Loads configuration from `path`, layered over built-in defaults.
    /// Unknown fields in the file are ignored; missing required fields
    /// (those with no `#[serde(default)]`) fail the load rather than
    /// silently defaulting to zero values a real rig could never use
    /// safely.
    pub fn load(path: &std::path::Path) -> Result<Self, figment::Error> {
        let settings: Settings = Figment::from(Settings::default()).merge(Toml::file(path)).extract()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub port: String,
    pub baud_rate: u32,
    pub command_timeout_ms: u64,
    pub homing_timeout_ms: u64,
    pub axes: HashMap<String, AxisSettings>,
}

impl Default for MotionSettings {
    fn default() -> Self {
        let mut axes = HashMap::new();
        axes.insert("x".into(), AxisSettings { kind: AxisKind::Linear, units: "mm".into(), min: 0.0, max: 150.0, home: 0.0, max_feedrate: 3000.0, steps_per_unit: 80.0, homing_required: true });
        axes.insert("y".into(), AxisSettings { kind: AxisKind::Linear, units: "mm".into(), min: 0.0, max: 200.0, home: 0.0, max_feedrate: 3000.0, steps_per_unit: 80.0, homing_required: true });
        axes.insert("z".into(), AxisSettings { kind: AxisKind::RotationalContinuous, units: "deg".into(), min: -180.0, max: 180.0, home: 0.0, max_feedrate: 6000.0, steps_per_unit: 88.9, homing_required: true });
        axes.insert("c".into(), AxisSettings { kind: AxisKind::RotationalBounded, units: "deg".into(), min: -45.0, max: 45.0, home: 0.0, max_feedrate: 1500.0, steps_per_unit: 100.0, homing_required: false });
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            command_timeout_ms: 5_000,
            homing_timeout_ms: 120_000,
            axes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisSettings {
    pub kind: AxisKind,
    pub units: String,
    pub min: f64,
    pub max: f64,
    pub home: f64,
    pub max_feedrate: f64,
    pub steps_per_unit: f64,
    pub homing_required: bool,
}

impl From<AxisSettings> for AxisConfig {
    fn from(s: AxisSettings) -> Self {
        AxisConfig {
            kind: s.kind,
            units: s.units,
            min: s.min,
            max: s.max,
            home: s.home,
            max_feedrate: s.max_feedrate,
            steps_per_unit: s.steps_per_unit,
            homing_required: s.homing_required,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfigEntry {
    pub id: String,
    pub device_path: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub jpeg_quality: u8,
    pub focus: FocusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSettings {
    pub mode: crate::camera::FocusMode,
    pub manual_lens_position: Option<f64>,
    pub af_range: Option<(f64, f64)>,
    pub af_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    pub zones: Vec<ZoneSettings>,
    pub flash_mode: FlashMode,
    pub idle_brightness: f64,
    pub capture_brightness: f64,
    pub flash_duration_ms: u64,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            flash_mode: FlashMode::Flash,
            idle_brightness: 0.05,
            capture_brightness: 0.30,
            flash_duration_ms: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSettings {
    pub id: String,
    pub pwm_channel: u32,
    /// Per-zone duty-cycle ceiling, independent of the
    /// scan-wide `idle_brightness`/`capture_brightness` levels. Defaults to
    /// the global 0.90 cap when the field is absent from the pattern file.
    #[serde(default = "default_zone_max_duty_cycle")]
    pub max_duty_cycle: f64,
}

fn default_zone_max_duty_cycle() -> f64 {
    crate::lighting::DUTY_CYCLE_CAP
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoSettings {
    pub baseline_mm: f64,
    pub convergence_angle_deg: f64,
}

impl Default for StereoSettings {
    fn default() -> Self {
        Self {
            baseline_mm: 60.0,
            convergence_angle_deg: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub simulation_mode: bool,
    pub log_level: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            simulation_mode: false,
            log_level: "info".into(),
        }
    }
}
