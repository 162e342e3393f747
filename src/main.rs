// src/main.rs

//! The main entry point for the SpinelHub server application.

use anyhow::Result;
use spinelhub::config::{Config, LogFormat};
use spinelhub::server;
use std::env;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("SPINELHUB_BUILD_VERSION");
    const BUILD_PROFILE: &str = env!("SPINELHUB_BUILD_PROFILE");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("SpinelHub version {VERSION} ({BUILD_PROFILE})");
        return Ok(());
    }

    // An explicit --config path must exist; the default one is optional.
    let explicit_config = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config_path = explicit_config.unwrap_or(DEFAULT_CONFIG_PATH);

    let mut config = match Config::load(config_path, explicit_config.is_some()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) if port != 0 => config.port = port,
                _ => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    init_logging(&config);
    info!("Starting SpinelHub {} ({} build)", VERSION, BUILD_PROFILE);
    if explicit_config.is_none() && !Path::new(config_path).exists() {
        info!("No config file at '{}', using defaults.", config_path);
    }

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {:#}", e);
        return Err(e);
    }

    Ok(())
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &Config) {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let filter = EnvFilter::new(log_level);

    match config.log_format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(true),
            )
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}
