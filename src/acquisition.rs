//! Acquisition runner: launches the external DAS capture program for one
//! sweep point and maps its outcome to a typed result.
//!
//! The capture program is a black box invoked as
//! `<program> --dir <out_dir> --nfiles <n> --nrefls <m>`; it writes its
//! reflectogram files into the given directory and exits. The runner owns
//! the per-point output directory: it is created (and cleared of stale
//! files) before launch, and an empty directory after a clean exit is
//! treated as a failure since continuing a sweep past missing data is
//! unsafe.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from one acquisition attempt. All are fatal to the current run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AcquisitionError {
    /// The capture program could not be spawned
    #[error("failed to launch acquisition program '{program}': {reason}")]
    Launch {
        /// Program path as configured
        program: String,
        /// Underlying spawn failure
        reason: String,
    },
    /// The capture program exited unsuccessfully
    #[error("acquisition process exited with {status}")]
    Exit {
        /// Exit status description (code or signal)
        status: String,
    },
    /// The capture program exited cleanly but wrote no files
    #[error("acquisition produced no output files in '{dir}'")]
    NoOutput {
        /// Output directory that stayed empty
        dir: String,
    },
    /// The capture program did not finish before the deadline
    #[error("acquisition timed out after {0:?}")]
    Timeout(Duration),
    /// Filesystem failure preparing or checking the output directory
    #[error("acquisition I/O error: {0}")]
    Io(String),
}

/// Capture-process contract consumed by the sweep controller.
#[async_trait]
pub trait AcquisitionRunner: Send + Sync {
    /// Acquire data for one point, blocking (asynchronously) until the
    /// capture finishes, fails, or exceeds `timeout`.
    async fn run(
        &self,
        filename_base: &str,
        files_per_point: u32,
        reflectograms_per_file: u32,
        timeout: Duration,
    ) -> Result<(), AcquisitionError>;
}

/// Runner invoking the real DAS capture executable.
pub struct ProcessAcquisition {
    program: PathBuf,
    data_dir: PathBuf,
}

impl ProcessAcquisition {
    /// Create a runner for `program`, writing per-point directories under
    /// `data_dir`.
    pub fn new(program: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Create the per-point directory and drop stale files from an earlier
    /// attempt so the emptiness check below stays meaningful.
    async fn prepare_output_dir(&self, dir: &Path) -> Result<(), AcquisitionError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?;
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                warn!(path = %entry.path().display(), "removing stale acquisition file");
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| AcquisitionError::Io(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn output_file_count(&self, dir: &Path) -> Result<usize, AcquisitionError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?;
        let mut count = 0;
        while let Some(_entry) = entries
            .next_entry()
            .await
            .map_err(|e| AcquisitionError::Io(e.to_string()))?
        {
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl AcquisitionRunner for ProcessAcquisition {
    async fn run(
        &self,
        filename_base: &str,
        files_per_point: u32,
        reflectograms_per_file: u32,
        timeout: Duration,
    ) -> Result<(), AcquisitionError> {
        let out_dir = self.data_dir.join(filename_base);
        self.prepare_output_dir(&out_dir).await?;

        debug!(
            program = %self.program.display(),
            dir = %out_dir.display(),
            files_per_point,
            reflectograms_per_file,
            "launching acquisition"
        );

        // kill_on_drop guarantees no orphaned capture process survives a
        // terminal transition, whichever path unwinds this future.
        let mut child = Command::new(&self.program)
            .arg("--dir")
            .arg(&out_dir)
            .arg("--nfiles")
            .arg(files_per_point.to_string())
            .arg("--nrefls")
            .arg(reflectograms_per_file.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AcquisitionError::Launch {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(AcquisitionError::Io(e.to_string())),
            Err(_elapsed) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(AcquisitionError::Timeout(timeout));
            }
        };

        if !status.success() {
            return Err(AcquisitionError::Exit {
                status: status.to_string(),
            });
        }

        if self.output_file_count(&out_dir).await? == 0 {
            return Err(AcquisitionError::NoOutput {
                dir: out_dir.display().to_string(),
            });
        }

        Ok(())
    }
}

/// In-memory runner for tests: records invocations, optionally failing at a
/// scripted point or taking a fixed time per run.
pub struct MockAcquisition {
    runs: Arc<Mutex<Vec<String>>>,
    fail_at: Option<usize>,
    run_delay: Duration,
}

impl MockAcquisition {
    /// A mock that succeeds instantly on every run.
    pub fn new() -> Self {
        Self {
            runs: Arc::new(Mutex::new(Vec::new())),
            fail_at: None,
            run_delay: Duration::ZERO,
        }
    }

    /// Fail the run with this 0-based ordinal.
    pub fn failing_at(mut self, run_index: usize) -> Self {
        self.fail_at = Some(run_index);
        self
    }

    /// Take `delay` per run before completing.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Filename bases of every run accepted so far, in order.
    pub fn runs(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockAcquisition {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AcquisitionRunner for MockAcquisition {
    async fn run(
        &self,
        filename_base: &str,
        _files_per_point: u32,
        _reflectograms_per_file: u32,
        _timeout: Duration,
    ) -> Result<(), AcquisitionError> {
        if self.run_delay > Duration::ZERO {
            tokio::time::sleep(self.run_delay).await;
        }
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if self.fail_at == Some(runs.len()) {
            return Err(AcquisitionError::NoOutput {
                dir: filename_base.to_string(),
            });
        }
        runs.push(filename_base.to_string());
        Ok(())
    }
}
