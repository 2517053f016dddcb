//! Command-line shell for the sweep controller.
//!
//! Loads settings and the last-used sweep parameters, starts one run, and
//! renders its events until a terminal state. Ctrl-C is forwarded as a
//! cooperative cancel. Exit status reflects the typed outcome: nonzero only
//! for a failed run or a startup error.

use anyhow::{bail, Context, Result};
use clap::Parser;
use pzt_sweep::acquisition::{AcquisitionRunner, MockAcquisition, ProcessAcquisition};
use pzt_sweep::config::{ConfigStore, Settings};
use pzt_sweep::controller::{SweepController, SweepEvent};
use pzt_sweep::device::{mock::MockGenerator, WaveformGenerator};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pzt-sweep",
    version,
    about = "Drive a piezo waveform generator through a parameter sweep with per-point DAS capture"
)]
struct Cli {
    /// Application settings file (JSON); built-in defaults when omitted
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Last-used sweep parameter file
    #[arg(long, default_value = "experiment_config.json")]
    config: PathBuf,

    /// Use simulated device and acquisition instead of hardware
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.settings.as_deref()).context("failed to load settings")?;
    let store = ConfigStore::new(&cli.config);
    let sweep = store.load();

    let device = build_device(&cli, &settings)?;

    let acquisition: Arc<dyn AcquisitionRunner> = if cli.mock {
        Arc::new(MockAcquisition::new())
    } else {
        Arc::new(ProcessAcquisition::new(
            settings.acquisition.program.clone(),
            settings.acquisition.data_dir.clone(),
        ))
    };

    let controller = Arc::new(SweepController::new(
        device,
        acquisition,
        settings.timing.clone(),
        settings.disconnect_on_finish,
    ));
    let mut events = controller.subscribe();

    controller
        .start(sweep.clone())
        .await
        .context("could not start sweep")?;

    // Persist the parameters of every run that actually started.
    if let Err(e) = store.save(&sweep) {
        warn!(error = %e, "failed to persist last-used sweep parameters");
    }

    let canceller = Arc::clone(&controller);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut failure = None;
    loop {
        match events.recv().await {
            Ok(SweepEvent::Started { total_points, at }) => {
                info!(total_points, start = %at, "run started");
            }
            Ok(SweepEvent::Progress {
                current_point_index,
                total_points,
            }) => {
                info!("point {current_point_index}/{total_points} done");
            }
            Ok(SweepEvent::Completed {
                total_points,
                elapsed,
            }) => {
                info!(total_points, ?elapsed, "run completed");
                break;
            }
            Ok(SweepEvent::Cancelled { completed_points }) => {
                info!(completed_points, "run cancelled");
                break;
            }
            Ok(SweepEvent::Failed { kind, reason }) => {
                failure = Some(format!("{kind} failure: {reason}"));
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    controller.join().await;

    if let Some(reason) = failure {
        bail!(reason);
    }
    Ok(())
}

fn build_device(cli: &Cli, settings: &Settings) -> Result<Box<dyn WaveformGenerator>> {
    if cli.mock {
        info!("running with simulated hardware");
        return Ok(Box::new(MockGenerator::new()));
    }

    #[cfg(feature = "instrument_serial")]
    {
        Ok(Box::new(pzt_sweep::device::serial::SerialGenerator::new(
            settings.device.port.clone(),
            settings.device.baud_rate,
        )))
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        let _ = settings;
        bail!("serial support not enabled, rebuild with --features instrument_serial or pass --mock")
    }
}
