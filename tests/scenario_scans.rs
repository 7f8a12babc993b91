//! End-to-end simulated scans exercising the two literal scenarios from
//! the scan pattern specification: a minimal manual-focus cylindrical
//! sweep with two stereo cameras, and a single-point focus stack. Both
//! run entirely through `simulation_mode`, never touching real hardware
//! or the filesystem.

use scan4d::camera::FocusMode;
use scan4d::config::{CameraConfigEntry, FocusSettings, Settings, StereoSettings, ZoneSettings};
use scan4d::coords::StereoConfig;
use scan4d::lighting::{FlashMode, DUTY_CYCLE_CAP};
use scan4d::metadata::ManifestFormat;
use scan4d::motion::Motion;
use scan4d::orchestrator::{ScanOptions, ScanStatus};
use scan4d::pattern::{generate_cylindrical, generate_explicit, CylindricalParams, ExplicitRecord, TiltPolicy};
use scan4d::persistence::InMemoryImageStore;
use scan4d::position::AxisConfig;
use std::sync::Arc;

fn base_settings() -> Settings {
    let mut settings = Settings::default();
    settings.system.simulation_mode = true;
    settings.system.log_level = "error".into();
    settings.stereo = StereoSettings {
        baseline_mm: 60.0,
        convergence_angle_deg: 5.0,
    };
    settings
}

fn camera(id: &str) -> CameraConfigEntry {
    CameraConfigEntry {
        id: id.to_string(),
        device_path: format!("/dev/{id}"),
        capture_width: 1920,
        capture_height: 1080,
        jpeg_quality: 90,
        focus: FocusSettings {
            mode: FocusMode::Manual,
            manual_lens_position: Some(8.0),
            af_range: None,
            af_timeout_ms: 2000,
        },
    }
}

fn axis_refs(settings: &Settings) -> Vec<(String, AxisConfig)> {
    settings.motion.axes.iter().map(|(name, axis)| (name.clone(), axis.clone().into())).collect()
}

fn scan_options(scan_id: &str, stereo: StereoConfig) -> ScanOptions {
    ScanOptions {
        scan_id: scan_id.to_string(),
        stereo,
        manifest_path: None,
        manifest_format: ManifestFormat::RealityCapture,
        write_exif_sidecars: false,
    }
}

/// Scenario 1: radius 80mm, heights [40, 80], rotations [0, 90, 180, 270],
/// tilt tracking a focus point at y=60mm, manual focus at lens 8.0, two
/// cameras with a 60mm baseline and 5deg convergence, flash-mode LEDs.
/// 8 points * 2 cameras = 16 images, no errors.
#[tokio::test]
async fn scenario_minimal_manual_focus_cylindrical() {
    let mut settings = base_settings();
    settings.cameras = vec![camera("left"), camera("right")];
    settings.lighting.zones = vec![ZoneSettings {
        id: "ring".into(),
        pwm_channel: 0,
        max_duty_cycle: DUTY_CYCLE_CAP,
    }];
    settings.lighting.flash_mode = FlashMode::Flash;
    settings.lighting.idle_brightness = 0.05;
    settings.lighting.capture_brightness = 0.30;

    scan4d::validation::validate(&settings).expect("scenario settings must validate");

    let axes = axis_refs(&settings);
    let axes_ref: Vec<(&str, &AxisConfig)> = axes.iter().map(|(name, axis)| (name.as_str(), axis)).collect();

    let pattern = generate_cylindrical(
        &CylindricalParams {
            radius_mm: 80.0,
            height_range: (40.0, 80.0),
            height_steps: 2,
            rotation_steps: 4,
            tilt_policy: TiltPolicy::TrackFocusPoint { y_focus_mm: 60.0 },
            dwell_ms: 5,
        },
        &axes_ref,
    )
    .expect("cylindrical pattern must generate");
    assert_eq!(pattern.len(), 8);

    let store = Arc::new(InMemoryImageStore::new());
    let rig = scan4d::simulation::build(&settings, store.clone()).await.expect("simulated rig must build");

    let stereo = StereoConfig {
        baseline_mm: settings.stereo.baseline_mm,
        convergence_angle_deg: settings.stereo.convergence_angle_deg,
    };
    let report = rig
        .orchestrator
        .run_scan(pattern, scan_options("scenario-1", stereo))
        .await
        .expect("scan must complete");

    assert_eq!(report.status, ScanStatus::Completed);
    assert_eq!(report.points_completed, 8);
    assert_eq!(report.images_captured, 16);
    assert_eq!(report.images_failed, 0);
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);

    let records = store.records();
    assert_eq!(records.len(), 16);
    assert!(records.iter().all(|(_, meta)| meta.stack_index == 1 && meta.stack_total == 1));
    assert!(records.iter().any(|(_, meta)| meta.camera_id == "left"));
    assert!(records.iter().any(|(_, meta)| meta.camera_id == "right"));
}

/// Scenario 2: a single point with a three-level focus stack and one
/// camera. Expect three images with stack_index 1..=3 against stack_total
/// 3, the commanded lens position matching each focus value, and exactly
/// one motion command (a single point visited once).
#[tokio::test]
async fn scenario_focus_stacking_single_point() {
    let mut settings = base_settings();
    settings.cameras = vec![CameraConfigEntry {
        focus: FocusSettings {
            mode: FocusMode::Default,
            manual_lens_position: None,
            af_range: None,
            af_timeout_ms: 2000,
        },
        ..camera("left")
    }];
    settings.lighting.zones = vec![ZoneSettings {
        id: "ring".into(),
        pwm_channel: 0,
        max_duty_cycle: DUTY_CYCLE_CAP,
    }];

    scan4d::validation::validate(&settings).expect("scenario settings must validate");

    let axes = axis_refs(&settings);
    let axes_ref: Vec<(&str, &AxisConfig)> = axes.iter().map(|(name, axis)| (name.as_str(), axis)).collect();

    let records = vec![ExplicitRecord {
        x: 100.0,
        y: 50.0,
        z: 0.0,
        c: 0.0,
        dwell_ms: Some(5),
        focus_mode: Some(FocusMode::Manual),
        focus_values: Some(vec![6.0, 8.0, 10.0]),
        camera_settings: None,
        lighting_settings: None,
    }];
    let pattern = generate_explicit(&records, &axes_ref, 5).expect("explicit pattern must generate");
    assert_eq!(pattern.len(), 1);

    let store = Arc::new(InMemoryImageStore::new());
    let rig = scan4d::simulation::build(&settings, store.clone()).await.expect("simulated rig must build");

    let stereo = StereoConfig {
        baseline_mm: settings.stereo.baseline_mm,
        convergence_angle_deg: settings.stereo.convergence_angle_deg,
    };
    let report = rig
        .orchestrator
        .run_scan(pattern, scan_options("scenario-2", stereo))
        .await
        .expect("scan must complete");

    assert_eq!(report.status, ScanStatus::Completed);
    assert_eq!(report.points_completed, 1);
    assert_eq!(report.images_captured, 3);
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);

    let mut records = store.records();
    records.sort_by_key(|(_, meta)| meta.stack_index);
    assert_eq!(records.len(), 3);
    let stack_indices: Vec<usize> = records.iter().map(|(_, meta)| meta.stack_index).collect();
    assert_eq!(stack_indices, vec![1, 2, 3]);
    assert!(records.iter().all(|(_, meta)| meta.stack_total == 3));

    let lens_positions: Vec<f64> = records.iter().map(|(_, meta)| meta.focus_lens_position).collect();
    assert_eq!(lens_positions, vec![6.0, 8.0, 10.0]);

    let position = rig.motion.get_position().await.expect("position must be readable");
    assert!((position.x - 100.0).abs() < 1e-6);
    assert!((position.y - 50.0).abs() < 1e-6);
}
