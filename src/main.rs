use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

/// Classify bathymetric photons and write an ATL24 product
#[derive(Debug, Parser)]
#[command(name = "oceaneyes", version, about)]
struct Cli {
    /// Run settings JSON file
    settings: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = oceaneyes::RunSettings::load(&cli.settings)
        .with_context(|| format!("loading {}", cli.settings.display()))?;
    let report = oceaneyes::run(&settings).context("ensemble run failed")?;

    log::info!(
        "{} photons, {} bathymetry, written to {}",
        report.photons,
        report.stats.bathy_photons,
        report.output.display()
    );
    Ok(())
}
