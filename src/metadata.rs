//! Photogrammetry metadata emission.
//!
//! Three independent writers share one [`ImageMetadata`] record: EXIF tags
//! embedded in the JPEG itself (GPS fields repurposed as raw Cartesian
//! coordinates, with a `UserComment` carrying the full orientation so nothing
//! is lost to GPS's limited precision), an XMP sidecar, and flat per-scan
//! text manifests in the two formats commonly consumed by reconstruction
//! tools downstream.

use crate::coords::{CameraPose, EulerAngles, WorldPoint};
use little_exif::exif_tag::ExifTag;
use little_exif::metadata::Metadata as ExifMetadata;
use little_exif::rational::uR64;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Everything known about one captured image, independent of which writer
/// consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub scan_id: String,
    pub point_index: usize,
    pub stack_index: usize,
    pub stack_total: usize,
    pub camera_id: String,
    pub world: WorldPoint,
    pub orientation: EulerAngles,
    pub focus_lens_position: f64,
    pub exposure_us: u32,
    pub analog_gain: f64,
}

impl ImageMetadata {
    pub fn from_pose(camera_id: &str, pose: CameraPose, focus_lens_position: f64) -> Self {
        Self {
            scan_id: String::new(),
            point_index: 0,
            stack_index: 1,
            stack_total: 1,
            camera_id: camera_id.to_string(),
            world: pose.world,
            orientation: pose.orientation,
            focus_lens_position,
            exposure_us: 0,
            analog_gain: 1.0,
        }
    }
}

/// GPS fields have no fractional-degree precision concerns here since the
/// values are just millimetres, but the tag format still wants rational
/// triples (degrees, minutes, seconds-equivalent). We encode the raw
/// millimetre value as whole "degrees" with zero minutes/seconds, which
/// round-trips exactly and keeps downstream readers that only look at the
/// first rational happy. This is a deliberate repurposing, not a
/// geographic claim.
fn mm_as_gps_rational(value_mm: f64) -> Vec<uR64> {
    let magnitude = value_mm.abs();
    let whole = magnitude.trunc() as u32;
    let frac_thousandths = ((magnitude.fract()) * 1000.0).round() as u32;
    vec![uR64 { nominator: whole, denominator: 1 }, uR64 { nominator: 0, denominator: 1 }, uR64 {
        nominator: frac_thousandths,
        denominator: 1000,
    }]
}

fn gps_ref_for(value_mm: f64, positive: &'static str, negative: &'static str) -> String {
    if value_mm >= 0.0 { positive.to_string() } else { negative.to_string() }
}

/// Writes the repurposed GPS fields plus a `UserComment` carrying full
/// orientation into the JPEG at `path`: the EXIF GPSLatitude/Longitude/
/// Altitude fields repurposed as raw Cartesian X/Y/Z.
pub fn write_exif(path: &Path, meta: &ImageMetadata) -> crate::error::AppResult<()> {
    let mut exif = ExifMetadata::new();

    exif.set_tag(ExifTag::GPSLatitude(mm_as_gps_rational(meta.world.x_mm)));
    exif.set_tag(ExifTag::GPSLatitudeRef(gps_ref_for(meta.world.x_mm, "N", "S")));
    exif.set_tag(ExifTag::GPSLongitude(mm_as_gps_rational(meta.world.y_mm)));
    exif.set_tag(ExifTag::GPSLongitudeRef(gps_ref_for(meta.world.y_mm, "E", "W")));
    exif.set_tag(ExifTag::GPSAltitude(mm_as_gps_rational(meta.world.z_mm)));
    exif.set_tag(ExifTag::GPSAltitudeRef(vec![if meta.world.z_mm >= 0.0 { 0 } else { 1 }]));

    // UserComment shape: "Stereo Cam{id} Orient: ω=… φ=… κ=…".
    let comment = format!(
        "Stereo Cam{} Orient: ω={:.3} φ={:.3} κ={:.3}",
        meta.camera_id, meta.orientation.omega_deg, meta.orientation.phi_deg, meta.orientation.kappa_deg,
    );
    exif.set_tag(ExifTag::UserComment(comment.into_bytes()));

    exif.write_to_file(path)
        .map_err(|e| crate::error::ScanError::Persistence(format!("EXIF write failed for {}: {e}", path.display())))
}

/// Writes an XMP sidecar (`<image>.xmp`) carrying position and orientation
/// with explicit units and the "local1 - Euclidean" coordinate-system
/// label.
pub fn write_xmp_sidecar(image_path: &Path, filename: &str, meta: &ImageMetadata) -> crate::error::AppResult<()> {
    let sidecar_path = image_path.with_extension("xmp");
    let xmp = format!(
        r#"<?xpacket begin="﻿" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about="{filename}"
        xmlns:xcr="http://www.capturingreality.com/ns/xcr/1.1#">
      <xcr:Position>{x:.6} {y:.6} {z:.6}</xcr:Position>
      <xcr:Rotation>
        <rdf:Seq>
          <rdf:li>{omega:.6}</rdf:li>
          <rdf:li>{phi:.6}</rdf:li>
          <rdf:li>{kappa:.6}</rdf:li>
        </rdf:Seq>
      </xcr:Rotation>
      <xcr:CoordinateSystem>local1 - Euclidean</xcr:CoordinateSystem>
      <xcr:DistortionModel>none</xcr:DistortionModel>
      <xcr:PositionUnits>millimeter</xcr:PositionUnits>
      <xcr:RotationUnits>degree</xcr:RotationUnits>
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>
"#,
        filename = filename,
        x = meta.world.x_mm,
        y = meta.world.y_mm,
        z = meta.world.z_mm,
        omega = meta.orientation.omega_deg,
        phi = meta.orientation.phi_deg,
        kappa = meta.orientation.kappa_deg,
    );

    std::fs::write(&sidecar_path, xmp)
        .map_err(|e| crate::error::ScanError::Persistence(format!("XMP sidecar write failed for {}: {e}", sidecar_path.display())))
}

/// Text-manifest dialect: RealityCapture's `filename X Y Z omega phi kappa`
/// rows, or Meshroom's position-only `filename X Y Z` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestFormat {
    RealityCapture,
    Meshroom,
}

/// Appends one row per image to a flat manifest file for the whole scan,
/// opening/creating it on first use and appending thereafter.
pub fn append_manifest_row(
    manifest_path: &Path,
    format: ManifestFormat,
    filename: &str,
    meta: &ImageMetadata,
) -> crate::error::AppResult<()> {
    let row = match format {
        ManifestFormat::RealityCapture => format!(
            "{filename} {x:.6} {y:.6} {z:.6} {omega:.6} {phi:.6} {kappa:.6}\n",
            filename = filename,
            x = meta.world.x_mm,
            y = meta.world.y_mm,
            z = meta.world.z_mm,
            omega = meta.orientation.omega_deg,
            phi = meta.orientation.phi_deg,
            kappa = meta.orientation.kappa_deg,
        ),
        ManifestFormat::Meshroom => format!(
            "{filename} {x:.6} {y:.6} {z:.6}\n",
            filename = filename,
            x = meta.world.x_mm,
            y = meta.world.y_mm,
            z = meta.world.z_mm,
        ),
    };

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(manifest_path)
        .map_err(|e| crate::error::ScanError::Persistence(format!("manifest open failed for {}: {e}", manifest_path.display())))?;
    file.write_all(row.as_bytes())
        .map_err(|e| crate::error::ScanError::Persistence(format!("manifest write failed for {}: {e}", manifest_path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_ref_matches_sign() {
        assert_eq!(gps_ref_for(10.0, "N", "S"), "N");
        assert_eq!(gps_ref_for(-10.0, "N", "S"), "S");
    }

    #[test]
    fn mm_rational_round_trips_whole_part() {
        let rationals = mm_as_gps_rational(123.456);
        assert_eq!(rationals[0].nominator, 123);
    }

    #[test]
    fn reality_capture_row_has_six_numeric_fields() {
        let dir = std::env::temp_dir().join(format!("scan4d-manifest-test-{}", crate::position::now_ns()));
        let path = dir.with_extension("txt");
        let meta = ImageMetadata {
            scan_id: "s1".into(),
            point_index: 0,
            stack_index: 1,
            stack_total: 1,
            camera_id: "left".into(),
            world: WorldPoint { x_mm: 1.0, y_mm: 2.0, z_mm: 3.0 },
            orientation: EulerAngles { omega_deg: 0.0, phi_deg: 4.0, kappa_deg: 5.0 },
            focus_lens_position: 8.0,
            exposure_us: 1000,
            analog_gain: 1.0,
        };
        append_manifest_row(&path, ManifestFormat::RealityCapture, "img_0001.jpg", &meta).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.split_whitespace().count(), 7);
        let _ = std::fs::remove_file(&path);
    }
}
