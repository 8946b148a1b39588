use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use logflume_config::RuntimeConfig;

/// Log aggregation pipeline: durable ingest, search and realtime fan-out
#[derive(Parser)]
#[command(name = "logflume")]
#[command(version)]
#[command(about = "Log aggregation pipeline server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build tokio runtime and run async server
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
        RuntimeConfig::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);
    config.validate()?;

    // Step 3: Run server with resolved config
    logflume_server::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(port) = cli.port {
        config.server.listen_addr = format!("0.0.0.0:{}", port);
    }

    if let Some(level) = &cli.log_level {
        config.server.log_level = level.clone();
    }
}
