//! Crate-level error type.
//!
//! Each seam owns its focused error enum (`StartError`, `DeviceError`,
//! `ConnectError`, `AcquisitionError`); `SweepError` consolidates them plus
//! the I/O and serialization failures of the surrounding glue, so callers
//! outside the core can handle everything with one type and the `?`
//! operator.

use crate::acquisition::AcquisitionError;
use crate::controller::StartError;
use crate::device::{ConnectError, DeviceError};
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Consolidated application error.
#[derive(Error, Debug)]
pub enum SweepError {
    /// Semantic configuration problem caught outside `start()` validation
    #[error("configuration error: {0}")]
    Config(String),

    /// File or pipe I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run could not be started
    #[error(transparent)]
    Start(#[from] StartError),

    /// Device link failure
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Device connection failure
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Acquisition failure
    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
}
