//! Simulated motion subsystem used when `system.simulation_mode` is set.
//! Reuses the same axis-limit and shortest-path logic as
//! [`super::controller::MotionController`] but keeps position in memory
//! instead of going over the wire, since the protocol engine has no
//! virtual-transport equivalent to the camera/lighting mocks.

use crate::error::{AppResult, ScanError};
use crate::motion::controller::shortest_path_target;
use crate::motion::Motion;
use crate::position::{AxisConfig, Position4D};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

pub struct MockMotionController {
    axes: HashMap<String, AxisConfig>,
    position: Mutex<Position4D>,
    move_delay: Duration,
}

impl MockMotionController {
    pub fn new(axes: HashMap<String, AxisConfig>) -> Self {
        Self {
            axes,
            position: Mutex::new(Position4D::default()),
            move_delay: Duration::from_millis(10),
        }
    }

    fn axis(&self, name: &str) -> AppResult<&AxisConfig> {
        self.axes
            .get(name)
            .ok_or_else(|| ScanError::Configuration(format!("unknown axis '{name}'")))
    }

    fn check_limit(&self, name: &str, value: f64) -> AppResult<()> {
        let axis = self.axis(name)?;
        if axis.is_continuous() {
            return Ok(());
        }
        if value < axis.min || value > axis.max {
            return Err(ScanError::MotionLimit {
                axis: name.to_string(),
                value,
                min: axis.min,
                max: axis.max,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Motion for MockMotionController {
    async fn move_absolute(&self, target: Position4D) -> AppResult<()> {
        self.check_limit("x", target.x)?;
        self.check_limit("y", target.y)?;
        self.check_limit("c", target.c)?;

        let mut current = self.position.lock();
        let z_target = shortest_path_target(current.z, target.z);
        tokio::time::sleep(self.move_delay).await;
        *current = Position4D::new(target.x, target.y, z_target, target.c);
        Ok(())
    }

    async fn move_relative(&self, delta: Position4D) -> AppResult<()> {
        let current = *self.position.lock();
        let target = Position4D::new(current.x + delta.x, current.y + delta.y, current.z + delta.z, current.c + delta.c);
        self.move_absolute(target).await
    }

    async fn home_all(&self) -> AppResult<()> {
        tokio::time::sleep(self.move_delay).await;
        *self.position.lock() = Position4D::default();
        Ok(())
    }

    async fn clear_alarm(&self) -> AppResult<()> {
        Ok(())
    }

    async fn emergency_stop(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_position(&self) -> AppResult<Position4D> {
        Ok(*self.position.lock())
    }
}
