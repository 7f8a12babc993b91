//! CLI entry point for scan4d.
//!
//! This binary is a thin shell around the `scan4d` library crate: it loads
//! and validates [`scan4d::config::Settings`], builds a fully wired
//! [`scan4d::simulation::ScanRig`] (real or simulated hardware, selected by
//! `system.simulation_mode`), and drives one of three subcommands to
//! completion. The web/HTTP UI, YAML config hot-reload, and session
//! file-system layout remain out of scope — this shell only covers what a
//! scan needs to run from a terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scan4d::config::Settings;
use scan4d::coords::StereoConfig;
use scan4d::metadata::ManifestFormat;
use scan4d::orchestrator::ScanOptions;
use scan4d::pattern::PatternSpec;
use scan4d::persistence::{FilesystemImageStore, ImageStore, InMemoryImageStore};
use scan4d::position::AxisConfig;
use scan4d::validation;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scan4d", version, about = "4DOF photogrammetry scan controller")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "scan4d.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs a scan from a pattern file to completion, printing the final
    /// report as JSON.
    Scan {
        /// TOML pattern specification: one of `kind = "grid"`,
        /// `kind = "cylindrical"`, or `kind = "explicit"`.
        pattern: PathBuf,

        /// Identifier embedded in the final report and image filenames.
        /// Defaults to a freshly generated UUID.
        #[arg(long)]
        scan_id: Option<String>,

        /// Directory captured images and sidecars are written to.
        #[arg(long, default_value = "./captures")]
        output: PathBuf,

        /// Camera-positions manifest path (one row appended per image).
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Manifest row format.
        #[arg(long, default_value = "reality-capture")]
        manifest_format: ManifestFormatArg,

        /// Skip writing EXIF tags and XMP sidecars (manifest still written).
        #[arg(long)]
        no_exif: bool,
    },
    /// Homes all axes and exits.
    Home,
    /// Queries and prints the cached machine position.
    Status,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ManifestFormatArg {
    RealityCapture,
    Meshroom,
}

impl From<ManifestFormatArg> for ManifestFormat {
    fn from(value: ManifestFormatArg) -> Self {
        match value {
            ManifestFormatArg::RealityCapture => ManifestFormat::RealityCapture,
            ManifestFormatArg::Meshroom => ManifestFormat::Meshroom,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config).with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    scan4d::tracing_setup::init(&settings.system).map_err(|e| anyhow::anyhow!(e))?;
    validation::validate(&settings).context("validating configuration")?;

    let runtime = tokio::runtime::Runtime::new().context("starting Tokio runtime")?;
    runtime.block_on(run(cli.command, settings))
}

fn axis_list(settings: &Settings) -> Vec<(String, AxisConfig)> {
    settings.motion.axes.iter().map(|(name, axis)| (name.clone(), axis.clone().into())).collect()
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Home => {
            let rig = scan4d::simulation::build(&settings, Arc::new(InMemoryImageStore::new()) as Arc<dyn ImageStore>).await?;
            info!("homing all axes");
            rig.motion.home_all().await?;
            info!("homing complete");
            Ok(())
        }
        Command::Status => {
            let rig = scan4d::simulation::build(&settings, Arc::new(InMemoryImageStore::new()) as Arc<dyn ImageStore>).await?;
            let position = rig.motion.get_position().await?;
            println!("{}", serde_json::to_string_pretty(&position)?);
            Ok(())
        }
        Command::Scan { pattern, scan_id, output, manifest, manifest_format, no_exif } => {
            let pattern_toml = std::fs::read_to_string(&pattern).with_context(|| format!("reading pattern file {}", pattern.display()))?;
            let spec: PatternSpec = toml::from_str(&pattern_toml).context("parsing pattern file")?;

            let axes = axis_list(&settings);
            let axis_refs: Vec<(&str, &AxisConfig)> = axes.iter().map(|(name, axis)| (name.as_str(), axis)).collect();
            let scan_pattern = spec.generate(&axis_refs).context("generating scan pattern")?;

            let store: Arc<dyn ImageStore> = Arc::new(FilesystemImageStore::new(output));
            let rig = scan4d::simulation::build(&settings, store).await?;

            let cancel_handle = rig.orchestrator.clone();
            ctrlc::set_handler(move || {
                warn!("Ctrl-C received, cancelling scan at the next safe boundary");
                cancel_handle.cancel();
            })
            .context("installing Ctrl-C handler")?;

            let opts = ScanOptions {
                scan_id: scan_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                stereo: StereoConfig {
                    baseline_mm: settings.stereo.baseline_mm,
                    convergence_angle_deg: settings.stereo.convergence_angle_deg,
                },
                manifest_path: manifest,
                manifest_format: manifest_format.into(),
                write_exif_sidecars: !no_exif,
            };

            info!(points = scan_pattern.len(), "starting scan");
            let report = rig.orchestrator.run_scan(scan_pattern, opts).await?;
            let _ = rig.cameras.shutdown_all().await;

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
