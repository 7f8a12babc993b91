//! Simulated camera used when `system.simulation_mode` is set. Uses async
//! delays via `tokio::time::sleep` rather than blocking sleep, so the mock
//! behaves correctly under the real executor instead of starving other tasks.

use crate::camera::device::CameraDevice;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use scan_core::{CoreResult, Frame};
use std::time::Duration;

pub struct MockCamera {
    id: String,
    width: Mutex<u32>,
    height: Mutex<u32>,
    lens_position: Mutex<f64>,
    frame_counter: Mutex<u64>,
    auto_exposure: Mutex<bool>,
}

impl MockCamera {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width: Mutex::new(width),
            height: Mutex::new(height),
            lens_position: Mutex::new(0.0),
            frame_counter: Mutex::new(0),
            auto_exposure: Mutex::new(false),
        }
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> CoreResult<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(())
    }

    async fn shutdown(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn set_focus_manual(&self, lens_position: f64) -> CoreResult<()> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        *self.lens_position.lock() = lens_position;
        Ok(())
    }

    async fn autofocus_once(&self, range: Option<(f64, f64)>, _timeout_ms: u64) -> CoreResult<f64> {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let (lo, hi) = range.unwrap_or((0.0, 15.0));
        let settled = (lo + hi) / 2.0;
        *self.lens_position.lock() = settled;
        Ok(settled)
    }

    async fn current_lens_position(&self) -> CoreResult<f64> {
        Ok(*self.lens_position.lock())
    }

    async fn capture(&self) -> CoreResult<Frame> {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let mut counter = self.frame_counter.lock();
        *counter += 1;
        let (width, height) = (*self.width.lock(), *self.height.lock());
        let pixel_count = (width * height) as usize;
        let data = Bytes::from(vec![0u8; pixel_count * 2]);
        Ok(Frame::new(width, height, 16, data, crate::position::now_ns()))
    }

    async fn restart_pipeline(&self) -> CoreResult<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn read_exposure_metadata(&self) -> CoreResult<(u32, f64)> {
        Ok((8_000, 1.0))
    }

    async fn enable_auto_exposure(&self) -> CoreResult<()> {
        *self.auto_exposure.lock() = true;
        Ok(())
    }

    async fn reconfigure(&self, width: u32, height: u32) -> CoreResult<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        *self.width.lock() = width;
        *self.height.lock() = height;
        Ok(())
    }
}
