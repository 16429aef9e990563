use std::io;
use thiserror::Error;

use crate::bitalino::OperatingState;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: OperatingState,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("CRC validation failed")]
    Crc,
}

impl DriverError {
    /// True for caller errors: the operation was rejected before touching the device.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidState { .. } | DriverError::InvalidArgument(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("record header is incomplete")]
    ShortHeader,
    #[error("record truncated: header declares {declared} samples, found {found}")]
    Truncated { declared: u32, found: u32 },
    #[error("record sample count overflow")]
    CountOverflow,
}

pub type Result<T> = std::result::Result<T, DriverError>;
