//! Lighting subsystem: PWM zone trait, controller, and a simulation-mode
//! mock.

pub mod controller;
pub mod device;
pub mod mock;
pub mod types;

pub use controller::LightingController;
pub use device::PwmZone;
pub use types::{FlashMode, LedZoneConfig, DUTY_CYCLE_CAP};
