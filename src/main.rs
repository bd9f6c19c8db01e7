use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use residency::cli::{Cli, Command};
use residency::config::ResidencyConfig;
use residency::detect::HardwareInfo;
use residency::measure::MeasurementCycle;
use residency::sample::SysfsSampler;
use residency::sysfs::SysfsRoot;
use std::io::IsTerminal;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // RUST_LOG wins over -v
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = residency::config::load(cli.config.as_ref());
    let sysfs = cli.root.map(SysfsRoot::new).unwrap_or_else(SysfsRoot::system);

    match cli.command {
        Command::Report {
            interval_ms,
            iterations,
        } => cmd_report(&sysfs, config, interval_ms, iterations, cli.json)?,
        Command::Topology => cmd_topology(&sysfs, cli.json)?,
        Command::Completions { shell } => residency::cli::print_completions(shell),
    }

    Ok(())
}

fn cmd_report(
    sysfs: &SysfsRoot,
    mut config: ResidencyConfig,
    interval_ms: Option<u64>,
    iterations: Option<u32>,
    json: bool,
) -> Result<()> {
    if let Some(ms) = interval_ms {
        config.sampling.interval_ms = ms;
    }
    if let Some(n) = iterations {
        config.sampling.iterations = n;
    }
    if config.sampling.interval_ms == 0 {
        anyhow::bail!("interval must be at least 1 ms");
    }
    if !config.display.cstates && !config.display.pstates && !json {
        anyhow::bail!("both tables are disabled in the display configuration");
    }

    let hw = HardwareInfo::detect(sysfs);
    let tree = residency::detect::topology::enumerate(sysfs)
        .context("failed to enumerate CPU topology")?;
    let mut cycle = MeasurementCycle::new(tree, SysfsSampler::new(sysfs.clone()));
    let interval = Duration::from_millis(config.sampling.interval_ms);

    if !json {
        residency::output::print_cpu_summary(&hw);
        println!();
    }

    let show_spinner = !json && std::io::stderr().is_terminal();
    let mut iteration = 0u32;
    loop {
        iteration += 1;
        cycle.run(|| wait(interval, show_spinner))?;

        if json {
            let report = residency::output::report_json(&hw, cycle.tree(), iteration)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            residency::output::print_tables(cycle.tree(), &config.display, iteration);
        }

        if config.sampling.iterations != 0 && iteration >= config.sampling.iterations {
            break;
        }
    }

    Ok(())
}

fn wait(interval: Duration, show_spinner: bool) {
    if !show_spinner {
        std::thread::sleep(interval);
        return;
    }
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("measuring for {} ms", interval.as_millis()));
    spinner.enable_steady_tick(Duration::from_millis(80));
    std::thread::sleep(interval);
    spinner.finish_and_clear();
}

fn cmd_topology(sysfs: &SysfsRoot, json: bool) -> Result<()> {
    let tree = residency::detect::topology::enumerate(sysfs)
        .context("failed to enumerate CPU topology")?;

    if json {
        let value = residency::output::topology_json(&tree);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", "CPU topology".bold().underline());
    residency::output::print_topology(&tree);
    Ok(())
}
