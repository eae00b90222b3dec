// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/rideau-sim

//! Rideau Canal ice sensor simulator
//!
//! Streams simulated ice, snow and temperature readings for each canal location
//! to Azure IoT Hub, or to the console with `--demo`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rideau_sim::{
    ConsoleChannel, DeliveryChannel, IotHubChannel, Location, Orchestrator, RunSummary, SimulatorConfig, NAME,
    VERSION,
};

/// Rideau Canal ice sensor simulator
#[derive(Parser, Debug)]
#[command(name = "rideau-sim")]
#[command(author = "Rideau Canal Monitoring Project")]
#[command(version = VERSION)]
#[command(about = "Simulated Rideau Canal ice sensors streaming to Azure IoT Hub")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only run this location (default: all configured locations)
    #[arg(short, long)]
    location: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Print readings to the console instead of sending them to IoT Hub
    #[arg(long)]
    demo: bool,

    /// Override the send interval, in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// List configured locations and exit
    #[arg(long)]
    list_locations: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // RUST_LOG wins when set; the MQTT client is noisy below warn
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives = if args.trace {
            log_level.to_string()
        } else {
            format!("{},rumqttc=warn", log_level)
        };
        EnvFilter::new(directives)
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{} v{}", NAME, VERSION);

    let config_path = args.config.unwrap_or_else(SimulatorConfig::default_path);
    let mut config = SimulatorConfig::load_or_default(&config_path)
        .with_context(|| format!("invalid configuration {:?}", config_path))?;

    if let Some(secs) = args.interval {
        config.send_interval = Duration::from_secs(secs);
        config.validate().context("invalid --interval")?;
    }

    if args.list_locations {
        for location in &config.locations {
            println!("{:<16} {:<20} {}", location.id, location.name, location.credential_env);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let locations = config.select(args.location.as_deref())?;
    info!("Configuration loaded from {:?}", config_path);
    info!("Send interval: {:?}", config.send_interval);
    info!("Demo mode: {}", args.demo);

    let config = Arc::new(config);
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        if args.demo {
            drive(config, &locations, |l: &Location| ConsoleChannel::new(&l.id)).await
        } else {
            drive(config, &locations, IotHubChannel::from_env).await
        }
    });

    report(&summary);
    Ok(ExitCode::from(summary.exit_code()))
}

async fn drive<C, F>(config: Arc<SimulatorConfig>, locations: &[Location], make_channel: F) -> RunSummary
where
    C: DeliveryChannel,
    F: FnMut(&Location) -> C,
{
    let orchestrator = Orchestrator::new(config);
    info!("Simulating {} location(s). Press Ctrl+C to stop", locations.len());
    orchestrator.run(locations, make_channel, ctrl_c()).await
}

/// Resolves on Ctrl+C; never resolves if the handler can't be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn report(summary: &RunSummary) {
    for r in &summary.reports {
        info!(
            location = %r.location,
            "{}: {} (sent {}, retries {}, dropped {}, reconnects {})",
            r.location, r.state, r.sent, r.retries, r.dropped, r.reconnects
        );
        if let Some(last_error) = &r.last_error {
            warn!(location = %r.location, "Last error: {}", last_error);
        }
    }
    if !summary.forced.is_empty() {
        error!("Forced to stop: {}", summary.forced.join(", "));
    }
    if summary.all_failed() {
        error!("No publisher could connect");
    }
    info!("Simulation stopped, {} message(s) delivered", summary.total_sent());
}
