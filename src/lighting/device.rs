//! PWM zone capability trait, in the same fine-grained style as
//! [`crate::camera::device::CameraDevice`]: one trait scoped to exactly what
//! a lighting zone needs (duty-cycle writes), implemented by a real PWM
//! backend or a mock.

use async_trait::async_trait;
use scan_core::CoreResult;

#[async_trait]
pub trait PwmZone: Send + Sync {
    fn id(&self) -> &str;

    /// Writes a duty cycle in `[0.0, 1.0]` to the zone's PWM channel. The
    /// caller is responsible for the safety cap; this trait only writes
    /// what it's told.
    async fn write_duty_cycle(&self, duty: f64) -> CoreResult<()>;
}
