//! RS-232 implementation of the waveform generator link.
//!
//! The `serialport` crate is synchronous, so all port I/O runs on Tokio's
//! blocking executor and the async caller awaits the result. The port handle
//! lives behind `Arc<Mutex<..>>` so a blocking task can own a clone while
//! the driver itself stays movable.

use crate::device::{protocol, ConnectError, DeviceError, WaveformGenerator};
use crate::sweep::WaveformKind;
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Internal poll timeout for the port; the overall acknowledgement deadline
/// is enforced by the read loop.
const PORT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial driver for the piezo waveform controller.
pub struct SerialGenerator {
    port_name: String,
    baud_rate: u32,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialGenerator {
    /// Create a driver for the given port; the connection is opened by
    /// [`WaveformGenerator::connect`].
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
        }
    }
}

#[async_trait]
impl WaveformGenerator for SerialGenerator {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(PORT_POLL_TIMEOUT)
            .open()
            .map_err(|e| ConnectError::Open {
                port: self.port_name.clone(),
                baud: self.baud_rate,
                reason: e.to_string(),
            })?;

        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
        self.port = Some(Arc::new(Mutex::new(port)));
        Ok(())
    }

    async fn apply_waveform(
        &mut self,
        kind: WaveformKind,
        amplitude: f64,
        frequency: f64,
        bias: f64,
        timeout: Duration,
    ) -> Result<(), DeviceError> {
        let port = self.port.as_ref().ok_or(DeviceError::NotConnected)?.clone();
        let packets = protocol::configure_sequence(kind, amplitude, bias, frequency);

        debug!(
            %kind,
            amplitude,
            frequency,
            bias,
            "applying waveform configuration"
        );

        // Blocking serial I/O on a dedicated thread; the async side only
        // awaits the join handle.
        tokio::task::spawn_blocking(move || -> Result<(), DeviceError> {
            let mut guard = port.blocking_lock();

            for packet in &packets {
                guard
                    .write_all(packet)
                    .map_err(|e| DeviceError::Io(e.to_string()))?;
            }
            guard.flush().map_err(|e| DeviceError::Io(e.to_string()))?;

            // Wait for the single ACK byte, bounded by the caller's deadline.
            let start = Instant::now();
            let mut buffer = [0u8; 1];
            loop {
                if start.elapsed() > timeout {
                    return Err(DeviceError::Timeout(timeout));
                }
                match guard.read(&mut buffer) {
                    Ok(1) => {
                        return if buffer[0] == protocol::ACK {
                            Ok(())
                        } else {
                            Err(DeviceError::UnexpectedResponse(buffer[0]))
                        };
                    }
                    Ok(_) => {
                        return Err(DeviceError::Io("unexpected EOF from serial port".into()))
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(DeviceError::Io(e.to_string())),
                }
            }
        })
        .await
        .map_err(|e| DeviceError::Io(format!("serial I/O task panicked: {e}")))?
    }

    async fn disconnect(&mut self) {
        // Dropping the handle closes the port; nothing to flush on this
        // device. Repeated calls are no-ops.
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
    }
}
