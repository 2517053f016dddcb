//! Sweep controller: the experiment state machine.
//!
//! One [`SweepController`] owns the run lifecycle. `start()` validates the
//! configuration, acquires the device, and spawns a dedicated worker task
//! that walks the point enumeration sequentially; the presentation layer
//! never blocks on device or capture waits. Progress and terminal events are
//! emitted from that single worker through a broadcast channel, so
//! subscribers observe them in execution order: no event for point N+1 is
//! sent before point N's outcome is determined.
//!
//! Cancellation is cooperative. `cancel()` flips a watch flag that the
//! worker checks at loop entry and between the device apply and the
//! acquisition launch, never mid-command, so the device is never left with
//! a half-sent configuration. Device and acquisition failures are fatal to
//! the run and are not retried: after an unacknowledged command the actuator
//! state is unknown, and past a failed capture the dataset has a hole.

use crate::acquisition::AcquisitionRunner;
use crate::config::TimingSettings;
use crate::device::{ConnectError, WaveformGenerator};
use crate::sweep::{SweepConfig, SweepPoint};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Which collaborator a run died on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The waveform generator failed or did not acknowledge in time
    Device,
    /// The capture process failed, timed out, or produced no data
    Acquisition,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Device => write!(f, "device"),
            FailureKind::Acquisition => write!(f, "acquisition"),
        }
    }
}

/// Lifecycle of a sweep execution.
///
/// `Idle → Running → {Completed | Cancelled | Failed}`; terminal states are
/// final and a new run starts from `Idle` or any terminal state.
#[derive(Clone, Debug, PartialEq)]
pub enum RunState {
    /// No run has been started yet
    Idle,
    /// A run is in flight
    Running {
        /// Points completed so far (also the index of the point being worked)
        current_point_index: usize,
        /// Total points in this run
        total_points: usize,
    },
    /// Every point completed
    Completed {
        /// Total points executed
        total_points: usize,
    },
    /// The run stopped at a cancellation point
    Cancelled {
        /// Points that completed before the cancellation was observed
        completed_points: usize,
    },
    /// A collaborator failure aborted the run
    Failed {
        /// Which collaborator failed
        kind: FailureKind,
        /// Human-readable failure detail
        reason: String,
        /// Points that completed before the failure
        completed_points: usize,
    },
}

impl RunState {
    /// True while a worker is executing points.
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    /// True for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Cancelled { .. } | RunState::Failed { .. }
        )
    }
}

/// Events delivered to presentation-layer subscribers, in execution order.
#[derive(Clone, Debug)]
pub enum SweepEvent {
    /// A run started; `total_points` is fixed for its whole lifetime
    Started {
        /// Total points the run will execute
        total_points: usize,
        /// Wall-clock start time
        at: DateTime<Utc>,
    },
    /// One more point finished
    Progress {
        /// Points completed so far
        current_point_index: usize,
        /// Total points in this run
        total_points: usize,
    },
    /// The run finished every point
    Completed {
        /// Total points executed
        total_points: usize,
        /// Wall-clock duration of the run
        elapsed: Duration,
    },
    /// The run stopped on an operator cancellation
    Cancelled {
        /// Points completed before the cancellation was observed
        completed_points: usize,
    },
    /// The run aborted on a collaborator failure
    Failed {
        /// Which collaborator failed
        kind: FailureKind,
        /// Human-readable failure detail
        reason: String,
    },
}

/// Why `start()` refused to begin a run. None of these mutate the run state.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StartError {
    /// The configuration violates an invariant
    #[error("invalid sweep configuration: {0}")]
    InvalidConfig(String),
    /// A run is already in flight; it is neither queued behind nor replaced
    #[error("a sweep is already running")]
    AlreadyRunning,
    /// The device link could not be acquired
    #[error("waveform generator unavailable: {0}")]
    DeviceUnavailable(ConnectError),
}

/// Orchestrates one sweep at a time over the device link and the
/// acquisition runner.
///
/// The controller exclusively owns both collaborators while a run is
/// `Running`; nothing else may command the device or spawn captures until a
/// terminal state is reached.
pub struct SweepController {
    device: Arc<Mutex<Box<dyn WaveformGenerator>>>,
    acquisition: Arc<dyn AcquisitionRunner>,
    timing: TimingSettings,
    disconnect_on_finish: bool,
    state: Arc<Mutex<RunState>>,
    events: broadcast::Sender<SweepEvent>,
    cancel_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SweepController {
    /// Create a controller around its two collaborators.
    ///
    /// `disconnect_on_finish` selects the device policy for `Completed` and
    /// `Cancelled` terminals; `Failed` always disconnects.
    pub fn new(
        device: Box<dyn WaveformGenerator>,
        acquisition: Arc<dyn AcquisitionRunner>,
        timing: TimingSettings,
        disconnect_on_finish: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            device: Arc::new(Mutex::new(device)),
            acquisition,
            timing,
            disconnect_on_finish,
            state: Arc::new(Mutex::new(RunState::Idle)),
            events,
            cancel_tx,
            worker: Mutex::new(None),
        }
    }

    /// Subscribe to run events. Subscribe before `start()` to observe the
    /// `Started` event.
    pub fn subscribe(&self) -> broadcast::Receiver<SweepEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the current run state.
    pub async fn state(&self) -> RunState {
        self.state.lock().await.clone()
    }

    /// Begin a sweep.
    ///
    /// Validates `config`, connects the device, computes the point
    /// enumeration up front, transitions to `Running`, emits `Started`, and
    /// spawns the worker. On any error the run state is left untouched.
    pub async fn start(&self, config: SweepConfig) -> Result<(), StartError> {
        config.validate().map_err(StartError::InvalidConfig)?;
        let points = config.points();
        let total_points = points.len();
        if total_points == 0 {
            return Err(StartError::InvalidConfig(
                "sweep produces no points".to_string(),
            ));
        }

        // The state lock is held across the connect attempt so concurrent
        // starts serialize, and a failed connect leaves the state untouched.
        let mut state = self.state.lock().await;
        if state.is_running() {
            return Err(StartError::AlreadyRunning);
        }

        {
            let mut device = self.device.lock().await;
            device.connect().await.map_err(StartError::DeviceUnavailable)?;
        }

        self.cancel_tx.send_replace(false);
        *state = RunState::Running {
            current_point_index: 0,
            total_points,
        };
        drop(state);

        info!(total_points, "sweep started");
        let _ = self.events.send(SweepEvent::Started {
            total_points,
            at: Utc::now(),
        });

        let worker = Worker {
            device: Arc::clone(&self.device),
            acquisition: Arc::clone(&self.acquisition),
            timing: self.timing.clone(),
            disconnect_on_finish: self.disconnect_on_finish,
            state: Arc::clone(&self.state),
            events: self.events.clone(),
            cancel_rx: self.cancel_tx.subscribe(),
            config,
            points,
        };
        let handle = tokio::spawn(worker.run());
        *self.worker.lock().await = Some(handle);
        Ok(())
    }

    /// Request cancellation of the in-flight run. Idempotent; a no-op when
    /// nothing is running. The flag is observed at the next cancellation
    /// point, never mid-device-command.
    pub fn cancel(&self) {
        if !*self.cancel_tx.borrow() {
            info!("cancellation requested");
        }
        self.cancel_tx.send_replace(true);
    }

    /// Wait until the in-flight worker (if any) has reached its terminal
    /// state and finished cleanup.
    pub async fn join(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "sweep worker panicked");
            }
        }
    }
}

enum Outcome {
    Completed,
    Cancelled {
        completed_points: usize,
    },
    Failed {
        kind: FailureKind,
        reason: String,
        completed_points: usize,
    },
}

/// State moved onto the dedicated worker task for one run.
struct Worker {
    device: Arc<Mutex<Box<dyn WaveformGenerator>>>,
    acquisition: Arc<dyn AcquisitionRunner>,
    timing: TimingSettings,
    disconnect_on_finish: bool,
    state: Arc<Mutex<RunState>>,
    events: broadcast::Sender<SweepEvent>,
    cancel_rx: watch::Receiver<bool>,
    config: SweepConfig,
    points: Vec<SweepPoint>,
}

impl Worker {
    async fn run(mut self) {
        let started = Instant::now();
        let total_points = self.points.len();

        match self.execute().await {
            Outcome::Completed => {
                self.cleanup(false).await;
                *self.state.lock().await = RunState::Completed { total_points };
                let elapsed = started.elapsed();
                info!(total_points, ?elapsed, "sweep completed");
                let _ = self.events.send(SweepEvent::Completed {
                    total_points,
                    elapsed,
                });
            }
            Outcome::Cancelled { completed_points } => {
                self.cleanup(false).await;
                *self.state.lock().await = RunState::Cancelled { completed_points };
                info!(completed_points, "sweep cancelled");
                let _ = self.events.send(SweepEvent::Cancelled { completed_points });
            }
            Outcome::Failed {
                kind,
                reason,
                completed_points,
            } => {
                self.cleanup(true).await;
                *self.state.lock().await = RunState::Failed {
                    kind,
                    reason: reason.clone(),
                    completed_points,
                };
                error!(%kind, reason = %reason, completed_points, "sweep failed");
                let _ = self.events.send(SweepEvent::Failed { kind, reason });
            }
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    async fn execute(&mut self) -> Outcome {
        let total_points = self.points.len();
        let points = std::mem::take(&mut self.points);

        for point in &points {
            let completed_points = point.index;

            // Cancellation point: loop entry.
            if self.cancelled() {
                return Outcome::Cancelled { completed_points };
            }

            // Let the actuator settle between points, staying responsive to
            // cancellation.
            if point.index > 0
                && !self.timing.settle_delay.is_zero()
                && self.settle().await
            {
                return Outcome::Cancelled { completed_points };
            }

            let applied = {
                let mut device = self.device.lock().await;
                device
                    .apply_waveform(
                        self.config.waveform,
                        point.amplitude,
                        point.frequency,
                        point.bias,
                        self.timing.device_timeout,
                    )
                    .await
            };
            if let Err(e) = applied {
                return Outcome::Failed {
                    kind: FailureKind::Device,
                    reason: e.to_string(),
                    completed_points,
                };
            }

            // Cancellation point: between device apply and acquisition.
            if self.cancelled() {
                return Outcome::Cancelled { completed_points };
            }

            debug!(
                index = point.index,
                amplitude = point.amplitude,
                bias = point.bias,
                frequency = point.frequency,
                "point applied, acquiring"
            );

            let base = point.output_name(&self.config.output_prefix);
            if let Err(e) = self
                .acquisition
                .run(
                    &base,
                    self.config.files_per_point,
                    self.config.reflectograms_per_file,
                    self.timing.acquisition_timeout,
                )
                .await
            {
                return Outcome::Failed {
                    kind: FailureKind::Acquisition,
                    reason: e.to_string(),
                    completed_points,
                };
            }

            let current_point_index = point.index + 1;
            *self.state.lock().await = RunState::Running {
                current_point_index,
                total_points,
            };
            let _ = self.events.send(SweepEvent::Progress {
                current_point_index,
                total_points,
            });
        }

        Outcome::Completed
    }

    /// Bounded inter-point wait; returns true when cancelled during it.
    async fn settle(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.timing.settle_delay) => false,
            res = self.cancel_rx.wait_for(|cancelled| *cancelled) => res.is_ok(),
        }
    }

    /// Terminal cleanup. Capture children are kill-on-drop inside the
    /// runner, so the device link is the only resource to settle here:
    /// always released after a failure (device state suspect), per policy
    /// otherwise.
    async fn cleanup(&self, failed: bool) {
        if failed || self.disconnect_on_finish {
            let mut device = self.device.lock().await;
            device.disconnect().await;
        }
    }
}
