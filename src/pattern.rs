//! Scan pattern generator: grid, cylindrical, and explicit-list patterns,
//! each producing the same restartable, lazy [`ScanPattern`] sequence the
//! orchestrator consumes.

use crate::camera::FocusMode;
use crate::coords::tilt_for_focus_point;
use crate::error::{AppResult, ScanError};
use crate::position::{AxisConfig, Position4D};
use serde::{Deserialize, Serialize};

/// Per-point camera override, carried alongside a `ScanPoint` but not
/// otherwise interpreted here; consumers apply it over whatever the
/// scan-wide camera configuration would have used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraSettingsOverride {
    pub jpeg_quality: Option<u8>,
    pub capture_width: Option<u32>,
    pub capture_height: Option<u32>,
}

/// Per-point lighting override, same contract as
/// [`CameraSettingsOverride`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightingSettingsOverride {
    pub idle_brightness: Option<f64>,
    pub capture_brightness: Option<f64>,
}

/// One position in a scan, with optional per-point overrides. Immutable
/// once generated; the orchestrator expands it into `capture_count`
/// captures but never mutates the point itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPoint {
    pub position: Position4D,
    pub dwell_ms: u64,
    pub focus_mode: Option<FocusMode>,
    /// A single lens position, or an ordered focus-stack list. `[0.0, 15.0]`
    /// per value.
    pub focus_values: Option<Vec<f64>>,
    pub camera_settings: Option<CameraSettingsOverride>,
    pub lighting_settings: Option<LightingSettingsOverride>,
}

impl ScanPoint {
    pub fn capture_count(&self) -> usize {
        self.focus_values.as_ref().map(|v| v.len().max(1)).unwrap_or(1)
    }

    fn validate(&self) -> AppResult<()> {
        if let Some(values) = &self.focus_values {
            for v in values {
                if !(0.0..=15.0).contains(v) {
                    return Err(ScanError::Configuration(format!("focus value {v} out of range [0, 15]")));
                }
            }
        }
        if self.focus_mode == Some(FocusMode::Manual) && self.focus_values.is_none() {
            return Err(ScanError::Configuration("manual focus mode requires focus_values".into()));
        }
        Ok(())
    }
}

fn validate_against_axes(position: Position4D, axes: &[(&str, &AxisConfig)]) -> AppResult<()> {
    for (name, axis) in axes {
        if axis.is_continuous() {
            continue;
        }
        let value = match *name {
            "x" => position.x,
            "y" => position.y,
            "z" => position.z,
            "c" => position.c,
            _ => continue,
        };
        if value < axis.min || value > axis.max {
            return Err(ScanError::MotionLimit {
                axis: name.to_string(),
                value,
                min: axis.min,
                max: axis.max,
            });
        }
    }
    Ok(())
}

/// A finite, restartable, lazily-evaluated set of points. Re-iterating
/// produces the same sequence deterministically.
#[derive(Debug, Clone)]
pub struct ScanPattern {
    points: Vec<ScanPoint>,
}

impl ScanPattern {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScanPoint> {
        self.points.iter()
    }
}

impl IntoIterator for ScanPattern {
    type Item = ScanPoint;
    type IntoIter = std::vec::IntoIter<ScanPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

/// Grid pattern parameters. Z height (or a fixed rotation) is
/// held constant across the grid; the traversal zig-zags across rows to
/// minimise backtracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridParams {
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    pub spacing_mm: f64,
    pub z_height: f64,
    pub c_tilt: f64,
    pub dwell_ms: u64,
}

pub fn generate_grid(params: &GridParams, axes: &[(&str, &AxisConfig)]) -> AppResult<ScanPattern> {
    if params.spacing_mm <= 0.0 {
        return Err(ScanError::Configuration("grid spacing must be positive".into()));
    }
    let (x0, x1) = params.x_range;
    let (y0, y1) = params.y_range;

    let mut xs = Vec::new();
    let mut x = x0;
    while x <= x1 + 1e-9 {
        xs.push(x);
        x += params.spacing_mm;
    }
    let mut ys = Vec::new();
    let mut y = y0;
    while y <= y1 + 1e-9 {
        ys.push(y);
        y += params.spacing_mm;
    }

    let mut points = Vec::with_capacity(xs.len() * ys.len());
    for (row, &yv) in ys.iter().enumerate() {
        let row_xs: Box<dyn Iterator<Item = &f64>> = if row % 2 == 0 {
            Box::new(xs.iter())
        } else {
            Box::new(xs.iter().rev())
        };
        for &xv in row_xs {
            let position = Position4D::new(xv, yv, params.z_height, params.c_tilt);
            validate_against_axes(position, axes)?;
            points.push(ScanPoint {
                position,
                dwell_ms: params.dwell_ms,
                focus_mode: None,
                focus_values: None,
                camera_settings: None,
                lighting_settings: None,
            });
        }
    }

    Ok(ScanPattern { points })
}

/// Tilt policy for a cylindrical pattern: fixed angle, computed by the
/// servo-tilt focus-tracking function, or an explicit per-height list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TiltPolicy {
    Fixed(f64),
    TrackFocusPoint { y_focus_mm: f64 },
    PerHeight(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CylindricalParams {
    pub radius_mm: f64,
    pub height_range: (f64, f64),
    pub height_steps: usize,
    pub rotation_steps: usize,
    pub tilt_policy: TiltPolicy,
    pub dwell_ms: u64,
}

/// Generates the Cartesian product of heights and rotations at a fixed
/// radius.
pub fn generate_cylindrical(params: &CylindricalParams, axes: &[(&str, &AxisConfig)]) -> AppResult<ScanPattern> {
    if params.height_steps == 0 || params.rotation_steps == 0 {
        return Err(ScanError::Configuration("cylindrical pattern requires at least one height and rotation step".into()));
    }
    let (h0, h1) = params.height_range;
    let heights: Vec<f64> = if params.height_steps == 1 {
        vec![h0]
    } else {
        (0..params.height_steps)
            .map(|i| h0 + (h1 - h0) * i as f64 / (params.height_steps - 1) as f64)
            .collect()
    };
    let rotations: Vec<f64> = (0..params.rotation_steps)
        .map(|i| 360.0 * i as f64 / params.rotation_steps as f64)
        .collect();

    if let TiltPolicy::PerHeight(list) = &params.tilt_policy {
        if list.len() != heights.len() {
            return Err(ScanError::Configuration(format!(
                "tilt_policy PerHeight has {} entries but pattern has {} height steps",
                list.len(),
                heights.len()
            )));
        }
    }

    let mut points = Vec::with_capacity(heights.len() * rotations.len());
    for (hi, &height) in heights.iter().enumerate() {
        for &rotation in &rotations {
            let tilt = match &params.tilt_policy {
                TiltPolicy::Fixed(angle) => *angle,
                TiltPolicy::TrackFocusPoint { y_focus_mm } => tilt_for_focus_point(params.radius_mm, height, *y_focus_mm),
                TiltPolicy::PerHeight(list) => list[hi],
            };
            let position = Position4D::new(params.radius_mm, height, rotation, tilt);
            validate_against_axes(position, axes)?;
            points.push(ScanPoint {
                position,
                dwell_ms: params.dwell_ms,
                focus_mode: None,
                focus_values: None,
                camera_settings: None,
                lighting_settings: None,
            });
        }
    }

    Ok(ScanPattern { points })
}

/// One record in an explicit/CSV-imported pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub c: f64,
    pub dwell_ms: Option<u64>,
    pub focus_mode: Option<FocusMode>,
    pub focus_values: Option<Vec<f64>>,
    #[serde(default)]
    pub camera_settings: Option<CameraSettingsOverride>,
    #[serde(default)]
    pub lighting_settings: Option<LightingSettingsOverride>,
}

/// Validates every record against axis limits and focus ranges up front;
/// invalid records are rejected before scanning begins, not at runtime.
pub fn generate_explicit(records: &[ExplicitRecord], axes: &[(&str, &AxisConfig)], default_dwell_ms: u64) -> AppResult<ScanPattern> {
    let mut points = Vec::with_capacity(records.len());
    for record in records {
        let position = Position4D::new(record.x, record.y, record.z, record.c);
        validate_against_axes(position, axes)?;
        let point = ScanPoint {
            position,
            dwell_ms: record.dwell_ms.unwrap_or(default_dwell_ms),
            focus_mode: record.focus_mode,
            focus_values: record.focus_values.clone(),
            camera_settings: record.camera_settings.clone(),
            lighting_settings: record.lighting_settings.clone(),
        };
        point.validate()?;
        points.push(point);
    }
    Ok(ScanPattern { points })
}

/// Top-level pattern configuration as loaded from a pattern file: exactly
/// one of the three generators, selected by tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternSpec {
    Grid(GridParams),
    Cylindrical(CylindricalParams),
    Explicit { records: Vec<ExplicitRecord>, default_dwell_ms: u64 },
}

impl PatternSpec {
    pub fn generate(&self, axes: &[(&str, &AxisConfig)]) -> AppResult<ScanPattern> {
        match self {
            PatternSpec::Grid(params) => generate_grid(params, axes),
            PatternSpec::Cylindrical(params) => generate_cylindrical(params, axes),
            PatternSpec::Explicit { records, default_dwell_ms } => generate_explicit(records, axes, *default_dwell_ms),
        }
    }
}

/// Parses an explicit pattern from CSV text. Columns:
/// `x,y,z,c[,dwell_ms[,focus_mode[,focus_values]]]`.
/// `focus_values` is a `;`-separated list of lens positions when present.
/// Lines starting with `#` and blank lines are skipped, matching the
/// comment convention the text manifests also use.
pub fn parse_explicit_csv(csv: &str) -> AppResult<Vec<ExplicitRecord>> {
    let mut records = Vec::new();
    for (lineno, line) in csv.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if fields.len() < 4 {
            return Err(ScanError::Configuration(format!("CSV line {}: expected at least 4 fields, got {}", lineno + 1, fields.len())));
        }
        let parse_f64 = |s: &str| -> AppResult<f64> { s.parse().map_err(|_| ScanError::Configuration(format!("CSV line {}: invalid number '{}'", lineno + 1, s))) };
        let x = parse_f64(fields[0])?;
        let y = parse_f64(fields[1])?;
        let z = parse_f64(fields[2])?;
        let c = parse_f64(fields[3])?;
        let dwell_ms = fields.get(4).filter(|s| !s.is_empty()).map(|s| s.parse::<u64>()).transpose().map_err(|_| ScanError::Configuration(format!("CSV line {}: invalid dwell_ms", lineno + 1)))?;
        let focus_mode = fields
            .get(5)
            .filter(|s| !s.is_empty())
            .map(|s| match s.to_ascii_lowercase().as_str() {
                "default" => Ok(FocusMode::Default),
                "manual" => Ok(FocusMode::Manual),
                "autofocus_once" => Ok(FocusMode::AutofocusOnce),
                "continuous_af" => Ok(FocusMode::ContinuousAf),
                other => Err(ScanError::Configuration(format!("CSV line {}: unknown focus_mode '{}'", lineno + 1, other))),
            })
            .transpose()?;
        let focus_values = fields
            .get(6)
            .filter(|s| !s.is_empty())
            .map(|s| s.split(';').map(|v| parse_f64(v.trim())).collect::<AppResult<Vec<f64>>>())
            .transpose()?;

        records.push(ExplicitRecord {
            x,
            y,
            z,
            c,
            dwell_ms,
            focus_mode,
            focus_values,
            camera_settings: None,
            lighting_settings: None,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::AxisKind;

    fn axis(kind: AxisKind, min: f64, max: f64) -> AxisConfig {
        AxisConfig {
            kind,
            units: "mm".into(),
            min,
            max,
            home: 0.0,
            max_feedrate: 100.0,
            steps_per_unit: 80.0,
            homing_required: true,
        }
    }

    #[test]
    fn grid_zig_zags_rows() {
        let params = GridParams {
            x_range: (0.0, 20.0),
            y_range: (0.0, 10.0),
            spacing_mm: 10.0,
            z_height: 0.0,
            c_tilt: 0.0,
            dwell_ms: 100,
        };
        let x_axis = axis(AxisKind::Linear, -100.0, 100.0);
        let y_axis = axis(AxisKind::Linear, -100.0, 100.0);
        let axes = vec![("x", &x_axis), ("y", &y_axis)];
        let pattern = generate_grid(&params, &axes).unwrap();
        let xs: Vec<f64> = pattern.iter().map(|p| p.position.x).collect();
        // Row 0 ascending, row 1 descending.
        assert_eq!(xs, vec![0.0, 10.0, 20.0, 20.0, 10.0, 0.0]);
    }

    #[test]
    fn cylindrical_produces_cartesian_product() {
        let params = CylindricalParams {
            radius_mm: 80.0,
            height_range: (40.0, 80.0),
            height_steps: 2,
            rotation_steps: 4,
            tilt_policy: TiltPolicy::TrackFocusPoint { y_focus_mm: 60.0 },
            dwell_ms: 100,
        };
        let pattern = generate_cylindrical(&params, &[]).unwrap();
        assert_eq!(pattern.len(), 8);
    }

    #[test]
    fn explicit_pattern_rejects_out_of_range_focus() {
        let records = vec![ExplicitRecord {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            c: 0.0,
            dwell_ms: None,
            focus_mode: Some(FocusMode::Manual),
            focus_values: Some(vec![20.0]),
            camera_settings: None,
            lighting_settings: None,
        }];
        let err = generate_explicit(&records, &[], 100).unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }

    #[test]
    fn explicit_pattern_rejects_out_of_limit_position() {
        let x_axis = axis(AxisKind::Linear, 0.0, 50.0);
        let records = vec![ExplicitRecord {
            x: 100.0,
            y: 0.0,
            z: 0.0,
            c: 0.0,
            dwell_ms: None,
            focus_mode: None,
            focus_values: None,
            camera_settings: None,
            lighting_settings: None,
        }];
        let err = generate_explicit(&records, &[("x", &x_axis)], 100).unwrap_err();
        assert!(matches!(err, ScanError::MotionLimit { .. }));
    }

    #[test]
    fn csv_parses_records_and_skips_comments() {
        let csv = "# comment\n100.0,50.0,0.0,0.0,200,manual,6.0;8.0;10.0\n\n10,20,30,40\n";
        let records = parse_explicit_csv(csv).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn csv_parses_focus_stack_values() {
        let csv = "100.0,50.0,0.0,0.0,200,manual,6.0;8.0;10.0\n";
        let records = parse_explicit_csv(csv).unwrap();
        assert_eq!(records[0].focus_values.as_ref().unwrap().len(), 3);
        assert_eq!(records[0].focus_mode, Some(FocusMode::Manual));
    }

    #[test]
    fn pattern_spec_dispatches_to_grid() {
        let spec = PatternSpec::Grid(GridParams {
            x_range: (0.0, 10.0),
            y_range: (0.0, 10.0),
            spacing_mm: 10.0,
            z_height: 0.0,
            c_tilt: 0.0,
            dwell_ms: 100,
        });
        let pattern = spec.generate(&[]).unwrap();
        assert_eq!(pattern.len(), 4);
    }
}
