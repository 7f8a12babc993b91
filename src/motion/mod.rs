//! Motion subsystem: serial protocol engine (C1) and axis-aware controller (C2).

pub mod controller;
pub mod mock;
pub mod protocol;

pub use controller::MotionController;
pub use mock::MockMotionController;
pub use protocol::{EngineState, MotionProtocolEngine, RealtimeByte};

use crate::error::AppResult;
use crate::position::Position4D;
use async_trait::async_trait;

/// What the orchestrator needs from motion, independent of whether it's
/// talking to a real board over serial or the in-memory simulation.
#[async_trait]
pub trait Motion: Send + Sync {
    async fn move_absolute(&self, target: Position4D) -> AppResult<()>;
    async fn move_relative(&self, delta: Position4D) -> AppResult<()>;
    async fn home_all(&self) -> AppResult<()>;
    async fn clear_alarm(&self) -> AppResult<()>;
    async fn emergency_stop(&self) -> AppResult<()>;
    async fn get_position(&self) -> AppResult<Position4D>;
}

#[async_trait]
impl Motion for MotionController {
    async fn move_absolute(&self, target: Position4D) -> AppResult<()> {
        MotionController::move_absolute(self, target).await
    }

    async fn move_relative(&self, delta: Position4D) -> AppResult<()> {
        MotionController::move_relative(self, delta).await
    }

    async fn home_all(&self) -> AppResult<()> {
        MotionController::home_all(self).await
    }

    async fn clear_alarm(&self) -> AppResult<()> {
        MotionController::clear_alarm(self).await
    }

    async fn emergency_stop(&self) -> AppResult<()> {
        MotionController::emergency_stop(self).await
    }

    async fn get_position(&self) -> AppResult<Position4D> {
        MotionController::get_position(self).await
    }
}
