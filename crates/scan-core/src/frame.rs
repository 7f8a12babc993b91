//! Owned camera frame buffer, shared by the camera controller and the
//! metadata/persistence paths.

use bytes::Bytes;

/// A single captured image frame.
///
/// Pixel data is stored as `Bytes` for cheap cloning between the capture
/// path and the persistence/metadata-emission paths: clone is a refcount
/// bump, not a copy.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u32,
    pub data: Bytes,
    pub timestamp_ns: u64,
}

impl Frame {
    pub fn new(width: u32, height: u32, bit_depth: u32, data: Bytes, timestamp_ns: u64) -> Self {
        Self {
            width,
            height,
            bit_depth,
            data,
            timestamp_ns,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.data.len()
    }
}
