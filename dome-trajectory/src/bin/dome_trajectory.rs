//! Dome trajectory controller CLI.
//!
//! Subcommands:
//! - `run`: run the controller against a simulated dome and telescope, taking
//!   operator commands from stdin
//! - `validate`: check a configuration document
//! - `list-configs`: list documents in the configuration directory

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dome_trajectory::algorithm::AlgorithmRegistry;
use dome_trajectory::config::validate;
use dome_trajectory::controller::{LifecycleCommand, SummaryState};
use dome_trajectory::service::{self, forward_dome_status, forward_targets, ControllerSettings};
use dome_trajectory::ControllerHandle;
use hardware::{FakeDome, FakeDomeConfig, PointingConfig, SimulatedPointing};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Dome trajectory controller
#[derive(Parser, Debug)]
#[command(name = "dome_trajectory")]
#[command(about = "Keep the dome aperture aligned with the telescope")]
#[command(version)]
struct Args {
    /// Configuration directory (defaults to $DOME_TRAJECTORY_CONFIG_DIR or ~/.dome_trajectory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run against a simulated dome and telescope
    Run {
        /// State to walk to on startup (Offline, Standby, Disabled, Enabled)
        #[arg(long, default_value = "Standby")]
        initial_state: SummaryState,

        /// Configuration selector used when starting in Disabled or Enabled
        #[arg(long, default_value = "")]
        selector: String,

        /// Consecutive dome command failures before entering Fault
        #[arg(long, default_value = "3")]
        max_delivery_failures: u32,

        /// Dome slew rate in degrees per second
        #[arg(long, default_value = "3.0")]
        dome_velocity: f64,

        /// Interval between telescope targets in milliseconds
        #[arg(long, default_value = "500")]
        target_interval_ms: u64,

        /// Targets between random telescope slews
        #[arg(long, default_value = "20")]
        slew_every: u32,

        /// Seed for the simulated telescope
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate a configuration document
    Validate {
        /// Path to the YAML document
        file: PathBuf,
    },

    /// List configuration documents
    ListConfigs,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Run {
            initial_state,
            selector,
            max_delivery_failures,
            dome_velocity,
            target_interval_ms,
            slew_every,
            seed,
        } => {
            let settings = ControllerSettings {
                config_dir: args.config_dir,
                initial_state,
                initial_selector: selector,
                max_delivery_failures,
                ..Default::default()
            };
            let dome_config = FakeDomeConfig {
                az_vel: dome_velocity,
                ..Default::default()
            };
            let pointing_config = PointingConfig {
                update_interval: Duration::from_millis(target_interval_ms.max(1)),
                slew_every,
                seed,
                ..Default::default()
            };
            run(settings, dome_config, pointing_config).await
        }
        Command::Validate { file } => {
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let config = validate(&AlgorithmRegistry::default(), &document)
                .with_context(|| format!("{} is not a valid configuration", file.display()))?;
            println!("algorithm: {}", config.name);
            print!("{}", config.parameters_yaml()?);
            Ok(())
        }
        Command::ListConfigs => {
            let settings = ControllerSettings {
                config_dir: args.config_dir,
                ..Default::default()
            };
            let storage = settings.storage();
            let names = storage
                .list_configs()
                .with_context(|| format!("failed to list {}", storage.root_path().display()))?;
            println!("{}:", storage.root_path().display());
            for name in names {
                println!("  {name}");
            }
            Ok(())
        }
    }
}

async fn run(
    settings: ControllerSettings,
    dome_config: FakeDomeConfig,
    pointing_config: PointingConfig,
) -> Result<()> {
    let (status_tx, status_rx) = mpsc::channel(64);
    let (_dome, link) = FakeDome::spawn(dome_config, status_tx);

    let controller = settings.build_controller(Box::new(link));
    info!(
        "Configuration directory: {}",
        settings.storage().root_path().display()
    );
    let events = controller.subscribe();
    tokio::spawn(print_events(events));

    let (handle, task) =
        service::spawn(controller, &settings).context("failed to reach initial state")?;

    let (target_tx, target_rx) = mpsc::channel(16);
    let pointing = SimulatedPointing::new(pointing_config).spawn(target_tx);
    tokio::spawn(forward_targets(target_rx, handle.clone()));
    tokio::spawn(forward_dome_status(status_rx, handle.clone()));

    println!("Commands: start [selector], enable, disable, standby, exitControl, status");
    operator_loop(&handle).await?;

    pointing.abort();
    task.await.context("controller task panicked")?;
    Ok(())
}

/// Read operator commands from stdin until exitControl, EOF or ctrl-c.
async fn operator_loop(handle: &ControllerHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };

        let Some(line) = line else {
            if let Err(e) = handle.exit_control().await {
                warn!("exitControl on shutdown: {}", e);
            }
            return Ok(());
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "status" {
            let snapshot = handle.current_snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            continue;
        }

        let command: LifecycleCommand = match line.parse() {
            Ok(command) => command,
            Err(e) => {
                println!("error: {e}");
                continue;
            }
        };
        let exiting = command == LifecycleCommand::ExitControl;

        match handle.command(command).await {
            Ok(()) => println!("ok"),
            Err(e) => println!("error: {e}"),
        }
        if exiting || handle.is_closed() {
            return Ok(());
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<dome_trajectory::ControllerEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("event: {json}"),
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Missed {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
