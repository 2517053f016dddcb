//! Automated parameter-sweep controller for a piezo-driven DAS experiment.
//!
//! This library drives a piezo waveform generator over a serial link through
//! the cross product of amplitude/bias/frequency values, launching the
//! external data-acquisition program at each point. The
//! [`controller::SweepController`] owns the run state machine; the device
//! and the capture process sit behind traits so the core is testable
//! without hardware.

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod sweep;
