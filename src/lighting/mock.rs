//! Simulated PWM zone for `system.simulation_mode`.

use crate::lighting::device::PwmZone;
use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::CoreResult;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct MockPwmZone {
    id: String,
    last_duty: Mutex<f64>,
    write_count: AtomicU64,
}

impl MockPwmZone {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_duty: Mutex::new(0.0),
            write_count: AtomicU64::new(0),
        }
    }

    pub fn last_duty(&self) -> f64 {
        *self.last_duty.lock()
    }

    /// Number of hardware writes actually committed, i.e. calls that made
    /// it past the lighting controller's redundant-write suppression.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PwmZone for MockPwmZone {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_duty_cycle(&self, duty: f64) -> CoreResult<()> {
        *self.last_duty.lock() = duty;
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
