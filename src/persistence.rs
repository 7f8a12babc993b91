//! Storage collaborator interface: file-system session layout is an
//! external concern, specified only by its interface here.
//!
//! The orchestrator hands each captured image plus its metadata to
//! whatever implements [`ImageStore`]; session layout, directory naming,
//! and on-disk format beyond "an image and its metadata" are out of scope
//! and left to that collaborator.

use crate::error::{AppResult, ScanError};
use crate::metadata::ImageMetadata;
use async_trait::async_trait;
use image::GrayImage;
use scan_core::Frame;
use std::path::PathBuf;

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists one captured frame with its metadata. Returns the path the
    /// image was actually written to — callers that need just the bare
    /// filename (manifest rows) take `file_name()` of it; callers that
    /// need to open the file again (EXIF/XMP writers) use it directly.
    async fn store(&self, frame: &Frame, metadata: &ImageMetadata) -> crate::error::AppResult<PathBuf>;
}

/// In-memory store used by tests and the simulation-mode factory; keeps
/// every stored frame's metadata so tests can assert on what was written
/// without touching the filesystem.
#[derive(Default)]
pub struct InMemoryImageStore {
    records: parking_lot::Mutex<Vec<(PathBuf, ImageMetadata)>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(PathBuf, ImageMetadata)> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn store(&self, _frame: &Frame, metadata: &ImageMetadata) -> crate::error::AppResult<PathBuf> {
        let filename = PathBuf::from(image_filename(metadata));
        self.records.lock().push((filename.clone(), metadata.clone()));
        Ok(filename)
    }
}

fn image_filename(metadata: &ImageMetadata) -> String {
    format!(
        "{}_{:04}_{}_{:02}of{:02}.jpg",
        metadata.scan_id, metadata.point_index, metadata.camera_id, metadata.stack_index, metadata.stack_total
    )
}

/// Writes each captured frame to `<root>/<filename>.jpg` as an 8-bit
/// grayscale JPEG. Frames arrive as raw mono sensor data; there is no
/// color filter array interpolation here, matching the rig's monochrome
/// photogrammetry cameras.
pub struct FilesystemImageStore {
    root: PathBuf,
}

impl FilesystemImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Downscales a frame's raw samples to 8-bit grayscale and JPEG-encodes
/// them. Run via `spawn_blocking` since JPEG encoding is CPU-bound and
/// would otherwise stall the async executor.
fn encode_frame_jpeg(frame: &Frame) -> AppResult<Vec<u8>> {
    let pixel_count = (frame.width as usize) * (frame.height as usize);
    let samples: Vec<u8> = match frame.bit_depth {
        8 => frame.data.iter().copied().collect(),
        16 => frame
            .data
            .chunks_exact(2)
            .take(pixel_count)
            .map(|pair| (u16::from_le_bytes([pair[0], pair[1]]) >> 8) as u8)
            .collect(),
        other => return Err(ScanError::Persistence(format!("unsupported frame bit depth {other}"))),
    };

    let image: GrayImage = GrayImage::from_raw(frame.width, frame.height, samples)
        .ok_or_else(|| ScanError::Persistence("frame buffer size does not match width*height".into()))?;

    let mut jpeg_bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, 90);
    encoder
        .encode_image(&image)
        .map_err(|e| ScanError::Persistence(format!("JPEG encode failed: {e}")))?;
    Ok(jpeg_bytes)
}

#[async_trait]
impl ImageStore for FilesystemImageStore {
    async fn store(&self, frame: &Frame, metadata: &ImageMetadata) -> AppResult<PathBuf> {
        let filename = image_filename(metadata);
        let path = self.root.join(&filename);
        let root = self.root.clone();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| ScanError::Persistence(format!("failed to create {}: {e}", root.display())))?;

        let frame = frame.clone();
        let jpeg_bytes = tokio::task::spawn_blocking(move || encode_frame_jpeg(&frame))
            .await
            .map_err(|e| ScanError::Persistence(format!("JPEG encode task panicked: {e}")))??;

        tokio::fs::write(&path, jpeg_bytes)
            .await
            .map_err(|e| ScanError::Persistence(format!("failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}
