//! Low-level error category shared by every hardware subsystem.
//!
//! `CoreError` is deliberately small: it only covers failure modes that are
//! not specific to motion, cameras, or lighting (transport I/O, malformed
//! wire data, disabled build features). The application crate's `ScanError`
//! wraps this plus a component-specific taxonomy of its own.

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port not connected")]
    SerialPortNotConnected,

    #[error("unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("malformed wire data: {0}")]
    Malformed(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("feature '{0}' not enabled; rebuild with --features {0}")]
    FeatureNotEnabled(&'static str),
}
