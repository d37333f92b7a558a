//! Crate-wide error type

use thiserror::Error;

use crate::sync::WaitError;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("No matching camera device found")]
    DeviceNotFound,

    #[error("Device exposes no video control interface")]
    InterfaceNotFound,

    #[error("Control interface for device {serial:?} is already open")]
    DeviceBusy { serial: String },

    #[error("Control transfer failed (request {request:#04x}, selector {selector:#04x})")]
    TransferFailed { request: u8, selector: u8 },

    #[error("No capture format available for the requested pixel format")]
    NoFormatAvailable,

    #[error("No frame available")]
    NoFrame,

    #[error("Invalid property name: {0:?}")]
    InvalidProperty(String),

    #[error("Invalid pixel format: {0:?}")]
    InvalidPixelFormat(String),

    #[error("Operation timed out")]
    TimedOut,

    #[error("Infinite timeout is not supported by a timed wait")]
    Unsupported,

    #[error("Capture session manager is not initialized")]
    NotInitialized,

    #[error("Unknown OS-level failure")]
    Unknown,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<WaitError> for CameraError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::TimedOut => Self::TimedOut,
            WaitError::Unsupported => Self::Unsupported,
            WaitError::Unknown => Self::Unknown,
        }
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
