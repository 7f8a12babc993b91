//! Startup configuration validation.
//!
//! Runs once, after [`crate::config::Settings::load`] and before any
//! component is constructed, so a misconfigured rig fails at startup
//! rather than partway through a scan.

use crate::camera::FocusMode;
use crate::config::Settings;
use crate::error::{AppResult, ScanError};
use crate::lighting::DUTY_CYCLE_CAP;

pub fn validate(settings: &Settings) -> AppResult<()> {
    validate_axes(settings)?;
    validate_lighting(settings)?;
    validate_cameras(settings)?;
    validate_stereo(settings)?;
    Ok(())
}

fn validate_axes(settings: &Settings) -> AppResult<()> {
    for (name, axis) in &settings.motion.axes {
        let config: crate::position::AxisConfig = axis.clone().into();
        config
            .validate()
            .map_err(|e| ScanError::Configuration(format!("axis '{name}': {e}")))?;
    }
    for required in ["x", "y", "z", "c"] {
        if !settings.motion.axes.contains_key(required) {
            return Err(ScanError::Configuration(format!("missing required axis '{required}'")));
        }
    }
    Ok(())
}

fn validate_lighting(settings: &Settings) -> AppResult<()> {
    let lighting = &settings.lighting;
    if lighting.idle_brightness > DUTY_CYCLE_CAP || lighting.capture_brightness > DUTY_CYCLE_CAP {
        return Err(ScanError::Configuration(format!(
            "lighting brightness exceeds the {DUTY_CYCLE_CAP} duty-cycle cap"
        )));
    }
    if lighting.idle_brightness < 0.0 || lighting.capture_brightness < 0.0 {
        return Err(ScanError::Configuration("lighting brightness cannot be negative".into()));
    }
    if lighting.zones.is_empty() {
        return Err(ScanError::Configuration("at least one LED zone must be configured".into()));
    }
    for zone in &lighting.zones {
        if zone.max_duty_cycle > DUTY_CYCLE_CAP || zone.max_duty_cycle < 0.0 {
            return Err(ScanError::Configuration(format!(
                "zone '{}': max_duty_cycle {} must be in [0, {DUTY_CYCLE_CAP}]",
                zone.id, zone.max_duty_cycle
            )));
        }
        if lighting.capture_brightness > zone.max_duty_cycle {
            return Err(ScanError::Configuration(format!(
                "zone '{}': capture_brightness {} exceeds this zone's max_duty_cycle {}",
                zone.id, lighting.capture_brightness, zone.max_duty_cycle
            )));
        }
    }
    Ok(())
}

fn validate_cameras(settings: &Settings) -> AppResult<()> {
    if settings.cameras.is_empty() {
        return Err(ScanError::Configuration("at least one camera must be configured".into()));
    }
    for camera in &settings.cameras {
        match camera.focus.mode {
            FocusMode::Manual => {
                let pos = camera
                    .focus
                    .manual_lens_position
                    .ok_or_else(|| ScanError::Configuration(format!("camera '{}': manual focus mode requires manual_lens_position", camera.id)))?;
                if !(0.0..=15.0).contains(&pos) {
                    return Err(ScanError::Configuration(format!("camera '{}': manual_lens_position {pos} out of range [0, 15]", camera.id)));
                }
            }
            FocusMode::AutofocusOnce | FocusMode::ContinuousAf => {
                if let Some((lo, hi)) = camera.focus.af_range {
                    if lo >= hi {
                        return Err(ScanError::Configuration(format!("camera '{}': af_range must have lo < hi", camera.id)));
                    }
                }
            }
            FocusMode::Default => {}
        }
        if camera.jpeg_quality == 0 || camera.jpeg_quality > 100 {
            return Err(ScanError::Configuration(format!("camera '{}': jpeg_quality must be in (0, 100]", camera.id)));
        }
    }
    Ok(())
}

fn validate_stereo(settings: &Settings) -> AppResult<()> {
    if settings.stereo.baseline_mm < 0.0 {
        return Err(ScanError::Configuration("stereo baseline_mm cannot be negative".into()));
    }
    if !(0.0..=90.0).contains(&settings.stereo.convergence_angle_deg) {
        return Err(ScanError::Configuration("stereo convergence_angle_deg must be in [0, 90]".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CameraConfigEntry, FocusSettings, Settings, ZoneSettings};

    fn minimal_valid_settings() -> Settings {
        let mut settings = Settings::default();
        settings.cameras.push(CameraConfigEntry {
            id: "left".into(),
            device_path: "/dev/video0".into(),
            capture_width: 4056,
            capture_height: 3040,
            jpeg_quality: 90,
            focus: FocusSettings {
                mode: FocusMode::Manual,
                manual_lens_position: Some(8.0),
                af_range: None,
                af_timeout_ms: 2000,
            },
        });
        settings.lighting.zones.push(ZoneSettings {
            id: "ring".into(),
            pwm_channel: 0,
            max_duty_cycle: crate::lighting::DUTY_CYCLE_CAP,
        });
        settings
    }

    #[test]
    fn rejects_zone_cap_above_global_cap() {
        let mut settings = minimal_valid_settings();
        settings.lighting.zones[0].max_duty_cycle = 0.95;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn rejects_capture_brightness_above_zone_cap() {
        let mut settings = minimal_valid_settings();
        settings.lighting.zones[0].max_duty_cycle = 0.2;
        // capture_brightness default (0.30) now exceeds this zone's own cap.
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn minimal_settings_pass_validation() {
        assert!(validate(&minimal_valid_settings()).is_ok());
    }

    #[test]
    fn rejects_brightness_above_cap() {
        let mut settings = minimal_valid_settings();
        settings.lighting.capture_brightness = 0.95;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn rejects_manual_focus_without_lens_position() {
        let mut settings = minimal_valid_settings();
        settings.cameras[0].focus.manual_lens_position = None;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn rejects_missing_axis() {
        let mut settings = minimal_valid_settings();
        settings.motion.axes.remove("c");
        assert!(validate(&settings).is_err());
    }
}
