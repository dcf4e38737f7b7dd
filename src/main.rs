//! ==============================================================================
//! main.rs - environmental metrics exporter entry point
//! ==============================================================================
//!
//! purpose:
//!     samples a temperature/humidity/pressure sensor on a fixed cadence and
//!     serves the latest values on a pull-based metrics endpoint.
//!
//! responsibilities:
//!     - parse the command line and load configuration
//!     - initialize logging
//!     - hand over to the supervisor, which owns the sampler, the web server
//!       and graceful shutdown
//!
//! architecture:
//!
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                     supervisor.rs                           │
//!     │  ┌─────────────┐                    ┌─────────────────────┐ │
//!     │  │ sampler     │                    │ metrics server      │ │
//!     │  │ (10s cycle) │                    │ (port 8080)         │ │
//!     │  └──────┬──────┘                    └──────────┬──────────┘ │
//!     │         │ write        ┌─────────┐      read   │            │
//!     │         └─────────────▶│  store  │◀────────────┘            │
//!     │                        └─────────┘                          │
//!     │     (one cancellation token stops both on SIGINT/SIGTERM)   │
//!     └─────────┬───────────────────────────────────────────────────┘
//!               │ ioctl
//!        ┌──────┴──────┐
//!        │ /dev/bme280 │
//!        └─────────────┘
//!
//! ==============================================================================

mod config;
mod domain;
mod exporter;
mod hal;
mod lifecycle;
mod sampler;
mod store;
mod supervisor;

use anyhow::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
envmon-exporter - environmental sensor metrics exporter

USAGE:
  envmon-exporter [--config <path>]

OPTIONS:
  -c, --config <path>  Configuration file (default: config/exporter.toml)
  -h, --help           Show this help
  -V, --version        Show version
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { config: Option<PathBuf> },
    Help,
    Version,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command> {
    let mut config = None;
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-V" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("{} requires a path", arg))?;
                config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(Command::Run { config })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let command = match parse_args(std::env::args().skip(1)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    // step 1: load configuration
    let (config, notes) = match command {
        Command::Help => {
            print!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Command::Version => {
            println!("envmon-exporter {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Command::Run { config: Some(path) } => match config::ExporterConfig::load(&path) {
            Ok(config) => (config, vec![format!("Loaded config from {}", path.display())]),
            Err(e) => {
                eprintln!("error: {:#}", e);
                return ExitCode::FAILURE;
            }
        },
        Command::Run { config: None } => config::ExporterConfig::load_or_default(),
    };

    // step 2: logging
    init_tracing(&config.logging.level);
    for note in &notes {
        tracing::info!("{}", note);
    }
    config.log_summary();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::ExporterConfig) -> Result<()> {
    // step 3: starting - sensor, listener, pid file
    let supervisor = supervisor::Supervisor::start(config).await?;

    // step 4: running until a termination signal
    supervisor.run().await
}
