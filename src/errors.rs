use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected written data length: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },
    #[error("unexpected received data length: expected {expected} bytes, got {received}")]
    ShortRead { expected: usize, received: usize },
    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error("invalid state: {0}")]
    State(#[from] StateError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("device is not open")]
    NotConnected,
    #[error("a device is already open")]
    AlreadyConnected,
    #[error("supply voltage adjustment already in progress")]
    SupplyAdjusting,
    #[error("no oscilloscope channel is enabled")]
    NoChannelEnabled,
}

impl DriverError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        DriverError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    /// The nested state error, if this is one.
    pub fn state(&self) -> Option<StateError> {
        match self {
            DriverError::State(s) => Some(*s),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
