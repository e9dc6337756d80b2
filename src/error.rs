//! Error types for BlitzKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::device::DeviceError;
use crate::page::{Lba, RegionTag};

/// Result type alias using BlitzError
pub type Result<T> = std::result::Result<T, BlitzError>;

/// Unified error type for BlitzKV operations
#[derive(Debug, Error)]
pub enum BlitzError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device operation failed after the retry budget was spent
    #[error("device {op} failed: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: DeviceError,
    },

    /// Device removed or reported a permanent fault
    #[error("device fault: {0}")]
    DeviceFault(String),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("page at lba {lba} is corrupted: {reason}")]
    Corrupted { lba: Lba, reason: String },

    #[error("object of {size} bytes exceeds the {max} byte page capacity")]
    ValueTooLarge { size: usize, max: usize },

    // -------------------------------------------------------------------------
    // Allocation Errors
    // -------------------------------------------------------------------------
    #[error("region {0} is out of space")]
    OutOfSpace(RegionTag),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    /// A fatal fault was observed; the engine must be reopened
    #[error("engine has failed and refuses new operations")]
    EngineFailed,

    #[error("engine is closed")]
    Closed,
}

impl BlitzError {
    /// Whether this error poisons the whole engine instance
    pub fn is_fatal(&self) -> bool {
        matches!(self, BlitzError::DeviceFault(_))
    }
}

impl From<bincode::Error> for BlitzError {
    fn from(e: bincode::Error) -> Self {
        BlitzError::Serialization(e.to_string())
    }
}
