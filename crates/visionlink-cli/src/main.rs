//! Command-line entry point for a VisionLink inspection station.
//!
//! # Usage
//!
//! Answer every trigger until Ctrl-C:
//! ```bash
//! visionlink run --config station.toml
//! ```
//!
//! Bench operation without a controller:
//! ```bash
//! visionlink run --mock
//! ```
//!
//! One-shot commands:
//! ```bash
//! visionlink status
//! visionlink cycle --assume-triggered
//! ```
//!
//! Camera and model are managed outside this binary; it inspects a still
//! frame with a detector that rotates through the configured classes.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use visionlink_core::constants::{STATUS_OFFSET, STATUS_TRIGGERED};
use visionlink_hardware::mock::{MockPlcHandle, ScriptedDetector};
use visionlink_hardware::{AnyFrameSource, StillFrameSource};
use visionlink_station::config::TransportKind;
use visionlink_station::{InspectionController, Station, StationConfig};

/// Still frame size used in place of a camera.
const FRAME_WIDTH: u32 = 640;
const FRAME_HEIGHT: u32 = 480;

/// How often the simulated line presents a part.
const MOCK_PART_INTERVAL: Duration = Duration::from_millis(500);

type Controller = InspectionController<AnyFrameSource, ScriptedDetector>;

#[derive(Parser)]
#[command(name = "visionlink", version)]
#[command(about = "Vision inspection station for an S7 trigger handshake", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the controller and answer every trigger until Ctrl-C
    Run {
        /// Configuration file (TOML); ./visionlink.toml is used when present
        #[arg(long)]
        config: Option<PathBuf>,

        /// Simulate the controller and its production line in-process
        #[arg(long)]
        mock: bool,
    },

    /// Connect once, print the station status as JSON and disconnect
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run a single inspection cycle and print its outcome
    Cycle {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Treat the trigger as asserted without reading it
        #[arg(long)]
        assume_triggered: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, mock } => {
            let mut config = load_config(config)?;
            if mock {
                config.plc.transport = TransportKind::Mock;
            }
            run(config).await
        }
        Commands::Status { config } => status(load_config(config)?).await,
        Commands::Cycle {
            config,
            assume_triggered,
        } => cycle(load_config(config)?, assume_triggered).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<StationConfig> {
    let config = StationConfig::load(path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging.filter);
    Ok(config)
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wire the controller described by `config`.
///
/// Returns the mock controller handle when the mock transport is selected.
fn build_controller(config: &StationConfig) -> Result<(Arc<Controller>, Option<MockPlcHandle>)> {
    let catalog = config.catalog().context("Invalid class list")?;
    let policy = config.cycle_policy().context("Invalid cycle policy")?;
    let frames = StillFrameSource::blank(FRAME_WIDTH, FRAME_HEIGHT)
        .context("Failed to build still frame")?;
    let detector = ScriptedDetector::rotating(catalog.len());

    if let Some(message) = placeholder_warning(config.plc.transport) {
        warn!(transport = ?config.plc.transport, "{message}");
    }

    let (registers, line) = config.register_protocol();
    info!(
        endpoint = %registers.link().endpoint(),
        transport = registers.link().transport_name(),
        classes = catalog.len(),
        "Controller configured"
    );

    let controller = InspectionController::new(
        registers,
        AnyFrameSource::Still(frames),
        detector,
        policy,
        catalog,
    );
    Ok((Arc::new(controller), line))
}

/// Warning for wiring the placeholder frame source and detector to a real
/// controller. The controller would receive rotating class ids, not
/// inspection results.
fn placeholder_warning(transport: TransportKind) -> Option<&'static str> {
    match transport {
        TransportKind::S7 => Some(
            "Still frame and scripted detector answer a real controller; results are placeholders",
        ),
        TransportKind::Mock => None,
    }
}

async fn run(config: StationConfig) -> Result<()> {
    let (controller, line) = build_controller(&config)?;

    let line_cancel = CancellationToken::new();
    let line_task = line.map(|line| {
        info!(
            interval_ms = MOCK_PART_INTERVAL.as_millis() as u64,
            "Simulating production line"
        );
        tokio::spawn(line.run_line(MOCK_PART_INTERVAL, line_cancel.clone()))
    });

    let handle = Station::start(controller, config.poll_settings());
    println!("{}", handle.status(false).await.headline());
    println!("Press Ctrl-C to stop");

    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");

    line_cancel.cancel();
    if let Some(task) = line_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "Simulated line ended abnormally");
    }

    let status = handle.status(false).await;
    let report = handle.shutdown().await.context("Shutdown failed")?;
    println!("{}", status.headline());
    println!(
        "cycles: {} completed, {} failed, {} cancelled, {} panicked",
        report.completed, report.failed, report.cancelled, report.panicked
    );
    Ok(())
}

async fn status(config: StationConfig) -> Result<()> {
    let (controller, _line) = build_controller(&config)?;

    controller.link().ensure_connected().await;
    let status = controller.status(true).await;
    controller.link().disconnect().await;

    let json = serde_json::to_string_pretty(&status).context("Failed to encode status")?;
    println!("{json}");
    if !status.connected {
        bail!(
            "controller {} unreachable: {}",
            status.endpoint,
            status.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn cycle(config: StationConfig, assume_triggered: bool) -> Result<()> {
    let (controller, line) = build_controller(&config)?;
    if let Some(line) = &line {
        // The simulated controller has a part waiting.
        line.set_word(STATUS_OFFSET, STATUS_TRIGGERED);
    }

    let hint = assume_triggered.then_some(true);
    let outcome = controller.attempt_cycle(hint).await;
    controller.link().disconnect().await;

    println!("{outcome}");
    if outcome.is_failure() {
        bail!("inspection cycle failed: {outcome}");
    }
    Ok(())
}
