//! Application settings and persistence of the last-used sweep parameters.
//!
//! Two layers of configuration exist:
//!
//! - [`Settings`]: deployment-level values (serial port, capture program,
//!   timeouts). Loaded once at startup from an optional JSON file.
//! - [`ConfigStore`]: the operator's last-used [`SweepConfig`], reloaded on
//!   startup and saved on every successful run start. A missing or
//!   malformed file falls back to built-in defaults without failing
//!   startup.

use crate::error::AppResult;
use crate::sweep::SweepConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Serial transport parameters for the piezo controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Serial port name, e.g. "COM4" or "/dev/ttyUSB0"
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            port: "COM4".to_string(),
            baud_rate: 115_200,
        }
    }
}

/// Location of the external capture program and its output area.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Capture executable invoked per point
    pub program: PathBuf,
    /// Directory under which per-point output directories are created
    pub data_dir: PathBuf,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("read_udp_das.exe"),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Tunable waits of the sweep loop. These are deployment parameters, not
/// invariants; adjust them to the actuator and capture hardware in use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Pause between points so the actuator stabilizes before capture
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Deadline for the device acknowledgement per apply
    #[serde(with = "humantime_serde")]
    pub device_timeout: Duration,
    /// Deadline for one capture-process run
    #[serde(with = "humantime_serde")]
    pub acquisition_timeout: Duration,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(200),
            device_timeout: Duration::from_secs(2),
            acquisition_timeout: Duration::from_secs(120),
        }
    }
}

/// Top-level application settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Serial transport section
    pub device: DeviceSettings,
    /// Capture program section
    pub acquisition: AcquisitionSettings,
    /// Sweep-loop timing section
    pub timing: TimingSettings,
    /// Disconnect the device after `Completed`/`Cancelled` runs. Failed runs
    /// always disconnect since the device state is suspect. Off by default
    /// so a cancelled run leaves the actuator at its last commanded point.
    pub disconnect_on_finish: bool,
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    ///
    /// An explicitly named file that is missing or malformed is an error;
    /// only the absence of a path falls back silently.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                let settings = serde_json::from_str(&text)?;
                info!(path = %p.display(), "settings loaded");
                Ok(settings)
            }
        }
    }
}

/// Persistence of the last-used sweep parameters.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store backed by the given JSON file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the last-used configuration, falling back to defaults when the
    /// file is missing or unreadable. Never fails startup.
    pub fn load(&self) -> SweepConfig {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "malformed sweep config, using defaults"
                    );
                    SweepConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SweepConfig::default(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "unreadable sweep config, using defaults"
                );
                SweepConfig::default()
            }
        }
    }

    /// Persist `config` as the last-used parameters.
    pub fn save(&self, config: &SweepConfig) -> AppResult<()> {
        let text = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::{SweepAxis, WaveformKind};

    #[test]
    fn store_round_trip_preserves_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("sweep.json"));

        let config = SweepConfig {
            amplitude: SweepAxis::new(0.5, 7.5, 0.5),
            waveform: WaveformKind::Triangle,
            output_prefix: "bench-3".to_string(),
            files_per_point: 5,
            ..Default::default()
        };
        store.save(&config).expect("save");
        assert_eq!(store.load(), config);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("absent.json"));
        assert_eq!(store.load(), SweepConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sweep.json");
        std::fs::write(&path, "{ not json").expect("write");
        let store = ConfigStore::new(path);
        assert_eq!(store.load(), SweepConfig::default());
    }

    #[test]
    fn settings_default_when_no_path() {
        let settings = Settings::load(None).expect("defaults");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.device.baud_rate, 115_200);
        assert!(!settings.disconnect_on_finish);
    }

    #[test]
    fn settings_parse_humantime_durations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "device": { "port": "/dev/ttyUSB1" },
                "timing": { "settle_delay": "1s 500ms" }
            }"#,
        )
        .expect("write");
        let settings = Settings::load(Some(&path)).expect("load");
        assert_eq!(settings.device.port, "/dev/ttyUSB1");
        assert_eq!(settings.timing.settle_delay, Duration::from_millis(1500));
        // untouched sections keep their defaults
        assert_eq!(
            settings.timing.device_timeout,
            TimingSettings::default().device_timeout
        );
    }

    #[test]
    fn settings_reject_malformed_named_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "nope").expect("write");
        assert!(Settings::load(Some(&path)).is_err());
    }
}
