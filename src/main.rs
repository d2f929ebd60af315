use std::path::PathBuf;

use aemet_weather::{AemetConfig, ForecastMode, WeatherReport, WeatherService};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

/// Current conditions and forecast from AEMET OpenData
#[derive(Parser, Debug)]
#[command(name = "aemet-weather", version)]
#[command(about = "Current conditions and multi-day forecast from AEMET OpenData")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "AEMET_CONFIG")]
    config: Option<PathBuf>,

    /// Forecast mode (hourly or daily), overrides the configuration
    #[arg(short, long)]
    mode: Option<ForecastMode>,

    /// Run a single update cycle and exit
    #[arg(long)]
    once: bool,
}

fn init_tracing(config: &AemetConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // logs go to stderr, reports to stdout
    if config.logging.format == "json" {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .json()
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .pretty()
            .init();
    }
}

fn print_report(report: &WeatherReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AemetConfig::load_from_path(args.config).context("Failed to load configuration")?;
    if let Some(mode) = args.mode {
        config.forecast.mode = mode;
    }
    init_tracing(&config);
    info!("Starting aemet-weather {}", aemet_weather::VERSION);

    let service = WeatherService::from_config(&config).map_err(|e| {
        let message = e.user_message();
        anyhow::Error::new(e).context(message)
    })?;

    if args.once {
        let report = service.update(Utc::now()).await.map_err(|e| {
            error!("{}", e.user_message());
            anyhow::Error::new(e)
        })?;
        return print_report(&report);
    }

    let mut interval = tokio::time::interval(config.update.interval());
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(report) = service.refresh(Utc::now()).await {
                    print_report(&report)?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
