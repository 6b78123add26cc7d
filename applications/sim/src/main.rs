//! hwcodec-sim - run codec components against a shared hardware pool
use anyhow::Context;
use clap::Parser;
use hwcodec_sim::{Cli, SimConfig, Simulation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hwcodec=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SimConfig::load(&cli).context("Failed to load configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let simulation = Simulation::new(config)?;
    let reports = simulation.run()?;

    println!(
        "{:<16} {:>8} {:>10} {:>6} {:>12} {:>7}",
        "component", "frames", "bytes", "waits", "preemptions", "errors"
    );
    for report in &reports {
        println!(
            "{:<16} {:>8} {:>10} {:>6} {:>12} {:>7}",
            report.name,
            report.frames,
            report.bytes,
            report.waits,
            report.preemptions,
            report.errors
        );
    }
    Ok(())
}
