use std::path::PathBuf;

use thiserror::Error;

/// Main error type for Optolink operations
#[derive(Error, Debug)]
pub enum VitoError {
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link is not synchronized with the controller")]
    NotSynced,

    #[error("NAK received from controller")]
    Nak,

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Bad checksum: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },

    #[error("Wrong address: expected {expected:#06x}, got {actual:#06x}")]
    AddressMismatch { expected: u16, actual: u16 },

    #[error("Wrong payload length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown data type tag: {0:?}")]
    UnknownTag(String),

    #[error("{file}:{line}: {reason}")]
    VariableList {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Sink write failed: {0}")]
    Sink(String),
}

/// Convenience Result type
pub type Result<T> = std::result::Result<T, VitoError>;
