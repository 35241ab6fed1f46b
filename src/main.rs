// src/main.rs

//! The main entry point for the Vigil monitor daemon.

use anyhow::Result;
use std::env;
use tracing::{error, info};
use vigil::config::MonitorConfig;
use vigil::monitor;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("vigil {VERSION}");
        return Ok(());
    }

    // The configuration path can be provided via a --config flag; otherwise
    // it defaults to "vigil.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("vigil.toml");

    // Default to verbose output for the monitor's own modules.
    let log_level =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,vigil=debug".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();

    let config = match MonitorConfig::from_file(config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    info!(
        "Vigil starting on {}:{} with {} master(s) to monitor.",
        config.host,
        config.port,
        config.masters.len()
    );

    if let Err(e) = monitor::run(config).await {
        error!("monitor runtime error: {e}");
        return Err(e);
    }
    Ok(())
}
