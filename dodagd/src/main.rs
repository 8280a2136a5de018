use std::{error::Error, net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};
use dodag_metrics::{NoMetrics, PrometheusExporter};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod medium;
mod node;
mod report;
mod routes;
mod simulation;
mod topology;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LoggingFormat {
    /// Human readable, one line per event.
    #[default]
    Compact,
    /// Key value pairs, for machine processing.
    Logfmt,
    /// Like compact, without colors.
    Plain,
}

/// Simulate a network of RPL nodes over a lossy radio medium, and report the DODAG they form.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Path to the simulation file, in TOML. Defaults to dodagd/topology.toml in the user config
    /// directory.
    #[arg(short = 'c', long = "config-file")]
    config_file: Option<PathBuf>,

    /// Enable debug logging. Does nothing if `--silent` is set.
    #[arg(short = 'd', long = "debug", default_value_t = false)]
    debug: bool,

    /// Disable all logs except error logs.
    #[arg(long = "silent", default_value_t = false)]
    silent: bool,

    #[arg(long = "logging-format", value_enum, default_value_t = LoggingFormat::Compact)]
    logging_format: LoggingFormat,

    /// Simulated seconds to run, overrides the simulation file.
    #[arg(long = "duration")]
    duration: Option<u64>,

    /// Seed of the simulation, overrides the simulation file.
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Run against the wall clock instead of simulated time.
    #[arg(long = "realtime", default_value_t = false)]
    realtime: bool,

    /// Print the report as JSON instead of a table.
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    /// Also print the candidate parents of every node.
    #[arg(long = "neighbors", default_value_t = false)]
    neighbors: bool,

    /// The address on which to expose prometheus metrics, if desired.
    ///
    /// Setting this flag will attempt to start an HTTP server on the provided address, to serve
    /// prometheus metrics on the /metrics endpoint. The server keeps running after the
    /// simulation until the process is interrupted.
    #[arg(long = "metrics-api-address")]
    metrics_api_address: Option<SocketAddr>,
}

fn init_logging(silent: bool, debug: bool, format: LoggingFormat) {
    let level = if silent {
        LevelFilter::ERROR
    } else if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LoggingFormat::Compact => registry.with(fmt::layer().compact()).init(),
        LoggingFormat::Logfmt => registry.with(tracing_logfmt::layer()).init(),
        LoggingFormat::Plain => registry.with(fmt::layer().with_ansi(false)).init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.silent, cli.debug, cli.logging_format);

    let mut config = topology::load(cli.config_file.as_deref())?;
    if let Some(duration) = cli.duration {
        config.duration_secs = duration;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.realtime |= cli.realtime;
    if cli.metrics_api_address.is_some() {
        config.metrics_api_address = cli.metrics_api_address;
    }

    if !config.realtime {
        tokio::time::pause();
    }

    let reports = match config.metrics_api_address {
        Some(addr) => {
            let metrics = PrometheusExporter::new();
            metrics.clone().spawn(addr);
            simulation::run(&config, metrics).await?
        }
        None => simulation::run(&config, NoMetrics).await?,
    };

    if cli.json {
        report::print_json(&reports)?;
    } else {
        report::print_table(&reports, cli.neighbors);
    }

    if config.metrics_api_address.is_some() {
        info!("Simulation done, serving metrics until interrupted");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
