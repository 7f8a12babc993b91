//! Dependency-light shared types for the scan4d workspace.
//!
//! A small crate split away from the application crate: types here have no
//! dependency on tokio, serial ports, or any particular hardware, so every
//! hardware-subsystem module and the application crate itself can depend on
//! them without pulling in the whole stack.

pub mod error;
pub mod frame;

pub use error::{CoreError, CoreResult};
pub use frame::Frame;
