//! trunkplan
//!
//! Field tool for multi-RTL-SDR trunk-recorder sites.
//!
//! - `plan`: split the site's channels across receivers and render the
//!   recorder `sources` plus a site summary
//! - `analyze`: check an existing recorder config's coverage
//! - `devices`: give every receiver a unique serial and map serials to bands
//! - `calibrate`: sweep receiver gain against each band's control channel
//! - In `--simulate` mode, runs against in-memory receivers for local dev

mod backend;
mod commands;
mod operator;
mod service;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use trunkplan_core::config::TrunkplanConfig;

use crate::service::RecorderService;

/// Receiver planning and device management for trunk-recorder.
#[derive(Parser, Debug)]
#[command(name = "trunkplan", about = "Receiver planning for trunk-recorder sites", version)]
struct Cli {
    /// Configuration file (optional; defaults apply when missing).
    #[arg(long, global = true, default_value = "trunkplan.toml")]
    config: PathBuf,

    /// Use simulated receivers instead of the rtl-sdr tools.
    #[arg(long, global = true, default_value_t = false)]
    simulate: bool,

    /// Number of simulated receivers.
    #[arg(long, global = true, default_value_t = 3)]
    sim_devices: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Allocate receivers and write sources.json and siteinfo.json.
    Plan(PlanArgs),
    /// Report coverage of an existing recorder config.json.
    Analyze(AnalyzeArgs),
    /// Identify receivers, fix duplicate serials, update the device map.
    Devices(DevicesArgs),
    /// Measure and log the best gain per receiver.
    Calibrate(CalibrateArgs),
}

#[derive(Args, Debug)]
struct PlannerOverrides {
    /// Total digital recorders to spread across receivers.
    #[arg(long)]
    total_recorders: Option<u32>,

    /// Maximum number of receivers.
    #[arg(long)]
    max_devices: Option<usize>,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Channel list (MHz, `c` suffix for control) or JSON array.
    #[arg(long)]
    channels: PathBuf,

    /// Output directory.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    #[command(flatten)]
    planner: PlannerOverrides,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// trunk-recorder config.json to check.
    #[arg(long, default_value = "config.json")]
    recorder_config: PathBuf,

    /// Extra channels to check besides the config's control channels.
    #[arg(long)]
    channels: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DevicesArgs {
    #[arg(long)]
    channels: PathBuf,

    /// Rebuild serial → band assignments from scratch.
    #[arg(long, default_value_t = false)]
    regenerate: bool,

    #[command(flatten)]
    planner: PlannerOverrides,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    #[arg(long)]
    channels: PathBuf,

    /// Calibrate only the receiver with this serial.
    #[arg(long)]
    device: Option<String>,

    /// Results CSV (appended).
    #[arg(long)]
    results: Option<PathBuf>,

    #[command(flatten)]
    planner: PlannerOverrides,
}

impl PlannerOverrides {
    fn apply(&self, config: &mut TrunkplanConfig) {
        if let Some(total) = self.total_recorders {
            config.planner.total_recorders = total;
        }
        if let Some(max) = self.max_devices {
            config.planner.allocator.max_devices = max;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = TrunkplanConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing::info!(
        config = %cli.config.display(),
        simulate = cli.simulate,
        "trunkplan starting"
    );

    match cli.command {
        Command::Plan(args) => {
            args.planner.apply(&mut config);
            commands::plan(
                &config,
                &commands::PlanOptions {
                    channels: args.channels,
                    out_dir: args.out_dir,
                },
            )
        }
        Command::Analyze(args) => commands::analyze(&args.recorder_config, args.channels.as_deref()),
        Command::Devices(args) => {
            args.planner.apply(&mut config);
            let backend = backend::Backend::new(cli.simulate, cli.sim_devices);
            let service = RecorderService::new(&config.service, cli.simulate);
            commands::devices(&config, &backend, &service, &args.channels, args.regenerate).await
        }
        Command::Calibrate(args) => {
            args.planner.apply(&mut config);
            let backend = backend::Backend::new(cli.simulate, cli.sim_devices);
            let service = RecorderService::new(&config.service, cli.simulate);
            commands::calibrate(
                &config,
                &backend,
                &service,
                &commands::CalibrateOptions {
                    channels: args.channels,
                    device: args.device,
                    results: args.results,
                },
            )
            .await
        }
    }
}
