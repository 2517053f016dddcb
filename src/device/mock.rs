//! Simulated waveform generator for tests and dry runs.
//!
//! The mock records every applied configuration and can be scripted to
//! refuse connection, time out at a given point, or take a fixed time per
//! apply (useful to exercise cancellation windows deterministically).

use crate::device::{ConnectError, DeviceError, WaveformGenerator};
use crate::sweep::WaveformKind;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// One configuration the mock accepted.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppliedWaveform {
    /// Waveform shape commanded
    pub kind: WaveformKind,
    /// Amplitude in volts
    pub amplitude: f64,
    /// Frequency in hertz
    pub frequency: f64,
    /// Bias in volts
    pub bias: f64,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    applied: Vec<AppliedWaveform>,
    connects: usize,
    disconnects: usize,
}

/// Scriptable in-memory waveform generator.
pub struct MockGenerator {
    state: Arc<Mutex<MockState>>,
    refuse_connect: bool,
    timeout_at: Option<usize>,
    apply_delay: Duration,
}

impl MockGenerator {
    /// A mock that accepts every command immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            refuse_connect: false,
            timeout_at: None,
            apply_delay: Duration::ZERO,
        }
    }

    /// Refuse `connect()` calls, simulating an absent device.
    pub fn refusing_connection(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    /// Time out on the apply with this 0-based ordinal (counting successful
    /// applies before it).
    pub fn timing_out_at(mut self, apply_index: usize) -> Self {
        self.timeout_at = Some(apply_index);
        self
    }

    /// Take `delay` per apply before acknowledging.
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    /// Handle for inspecting the mock after it has been boxed into the
    /// controller.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WaveformGenerator for MockGenerator {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.refuse_connect {
            return Err(ConnectError::Refused("mock configured to refuse".into()));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.connected {
            state.connected = true;
            state.connects += 1;
        }
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
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.connected {
                return Err(DeviceError::NotConnected);
            }
        }

        if self.apply_delay > Duration::ZERO {
            tokio::time::sleep(self.apply_delay).await;
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.timeout_at == Some(state.applied.len()) {
            return Err(DeviceError::Timeout(timeout));
        }
        state.applied.push(AppliedWaveform {
            kind,
            amplitude,
            frequency,
            bias,
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.connected {
            state.connected = false;
        }
        state.disconnects += 1;
    }
}

/// Inspection handle into a [`MockGenerator`].
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockProbe {
    /// Every configuration the mock accepted, in order.
    pub fn applied(&self) -> Vec<AppliedWaveform> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .applied
            .clone()
    }

    /// Whether the mock is currently connected.
    pub fn connected(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connected
    }

    /// Number of `disconnect()` calls observed.
    pub fn disconnects(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .disconnects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_applies_in_order() {
        let mut device = MockGenerator::new();
        let probe = device.probe();
        device.connect().await.expect("connect");
        device
            .apply_waveform(WaveformKind::Sine, 1.0, 10.0, 0.0, Duration::from_secs(1))
            .await
            .expect("apply");
        device
            .apply_waveform(WaveformKind::Sine, 2.0, 10.0, 0.0, Duration::from_secs(1))
            .await
            .expect("apply");
        let applied = probe.applied();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].amplitude, 1.0);
        assert_eq!(applied[1].amplitude, 2.0);
    }

    #[tokio::test]
    async fn rejects_apply_when_disconnected() {
        let mut device = MockGenerator::new();
        let err = device
            .apply_waveform(WaveformKind::Sine, 1.0, 10.0, 0.0, Duration::from_secs(1))
            .await
            .expect_err("should fail");
        assert_eq!(err, DeviceError::NotConnected);
    }

    #[tokio::test]
    async fn times_out_at_scripted_apply() {
        let mut device = MockGenerator::new().timing_out_at(1);
        let probe = device.probe();
        device.connect().await.expect("connect");
        let timeout = Duration::from_millis(50);
        assert!(device
            .apply_waveform(WaveformKind::Sine, 0.0, 10.0, 0.0, timeout)
            .await
            .is_ok());
        let err = device
            .apply_waveform(WaveformKind::Sine, 1.0, 10.0, 0.0, timeout)
            .await
            .expect_err("should time out");
        assert_eq!(err, DeviceError::Timeout(timeout));
        assert_eq!(probe.applied().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut device = MockGenerator::new();
        let probe = device.probe();
        device.connect().await.expect("connect");
        device.disconnect().await;
        device.disconnect().await;
        assert!(!probe.connected());
        assert_eq!(probe.disconnects(), 2);
    }
}
