//! # OS Jitter - Main Entry Point
//!
//! The binary performs these steps in order:
//! 1. **Initialize logging**: coloured diagnostics on stderr
//! 2. **Parse arguments**: measurement period, threshold, CPUs, policy
//! 3. **Check the platform**: invariant TSC and its frequency
//! 4. **Measure**: one pinned worker per CPU via `JitterRunner`
//! 5. **Report**: the table on stdout, optionally JSON to a file
//!
//! Any failure aborts before the table is printed and exits nonzero.

use anyhow::{Context, Result};
use clap::Parser;
use os_jitter::{
    cli::Args,
    config::MeasurementConfig,
    logging,
    results::{self, JitterResults, RunMetadata},
    system, utils,
};
use tracing::{info, warn};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose, args.quiet);

    info!("Starting OS jitter measurement v{}", os_jitter::VERSION);

    if args.skip_tsc_check {
        warn!("Skipping the TSC capability check");
    } else {
        system::check_tsc_capability().context("TSC capability check failed")?;
    }

    let tsc_khz = match args.tsc_khz {
        Some(khz) => khz,
        None => system::discover_tsc_khz()
            .context("Failed to determine the TSC frequency")?,
    };

    let online = system::online_cpus().context("Failed to enumerate online CPUs")?;
    let cpus =
        utils::resolve_cpus(&args.selected_cpus(), &online).context("Invalid CPU selection")?;

    let config =
        MeasurementConfig::from_args(&args, tsc_khz, cpus).context("Invalid configuration")?;
    if config.starves_system(&online) {
        warn!(
            "{} on every online CPU can starve the system for {}",
            config.sched_policy,
            utils::format_duration(config.duration)
        );
    }

    let states = run(config.clone())?;

    let rows = results::summarize(&states, &config);
    let mut stdout = std::io::stdout().lock();
    results::write_table(&mut stdout, &rows).context("Failed to write the report")?;

    if let Some(path) = &args.output_file {
        JitterResults::new(RunMetadata::new(&config, online.len()), rows)
            .write_json(path)
            .with_context(|| format!("Failed to write results to {:?}", path))?;
    }

    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn run(config: MeasurementConfig) -> Result<Vec<os_jitter::WorkerState>> {
    os_jitter::JitterRunner::new(config, os_jitter::Tsc)
        .run()
        .context("Measurement failed")
}

#[cfg(not(target_arch = "x86_64"))]
fn run(_config: MeasurementConfig) -> Result<Vec<os_jitter::WorkerState>> {
    anyhow::bail!("no supported tick source on {}", std::env::consts::ARCH)
}
