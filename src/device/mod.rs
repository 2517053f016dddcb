//! Device link to the piezo waveform generator.
//!
//! The sweep controller drives the generator through the
//! [`WaveformGenerator`] trait so experiment logic stays hardware-agnostic:
//! the production implementation talks RS-232 ([`serial::SerialGenerator`],
//! behind the `instrument_serial` feature), and [`mock::MockGenerator`]
//! simulates the device for tests and dry runs.

pub mod mock;
pub mod protocol;
#[cfg(feature = "instrument_serial")]
pub mod serial;

use crate::sweep::WaveformKind;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors establishing the device connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The serial port could not be opened
    #[error("failed to open serial port '{port}' at {baud} baud: {reason}")]
    Open {
        /// Port name, e.g. "COM4" or "/dev/ttyUSB0"
        port: String,
        /// Configured baud rate
        baud: u32,
        /// Underlying failure description
        reason: String,
    },
    /// The simulated device was configured to refuse the connection
    #[error("device refused connection: {0}")]
    Refused(String),
}

/// Errors while commanding a connected device.
///
/// All of these are fatal to the current run: after a failed or unacknowledged
/// command the actuator state is unknown, so the controller never retries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// No acknowledgement arrived before the deadline
    #[error("no acknowledgement from device within {0:?}")]
    Timeout(Duration),
    /// Command issued before `connect()` or after `disconnect()`
    #[error("device is not connected")]
    NotConnected,
    /// The device answered with something other than the ACK byte
    #[error("unexpected response byte 0x{0:02X}")]
    UnexpectedResponse(u8),
    /// Serial write/read failure
    #[error("serial I/O error: {0}")]
    Io(String),
}

/// Control surface of the piezo waveform generator.
///
/// Implementations own the transport; the controller borrows the generator
/// for the duration of one run and is the only component commanding it while
/// a sweep is `Running`.
#[async_trait]
pub trait WaveformGenerator: Send + Sync {
    /// Establish the connection. Idempotent: reconnecting an open link is a
    /// no-op.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Apply one waveform configuration and wait for the device
    /// acknowledgement, bounded by `timeout`.
    async fn apply_waveform(
        &mut self,
        kind: WaveformKind,
        amplitude: f64,
        frequency: f64,
        bias: f64,
        timeout: Duration,
    ) -> Result<(), DeviceError>;

    /// Close the connection. Idempotent and infallible to the caller:
    /// transport errors during teardown are logged, never propagated, so
    /// cleanup paths cannot themselves fail.
    async fn disconnect(&mut self);
}
