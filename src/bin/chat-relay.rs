use chat_relay::config::RelayConfig;
use chat_relay::error::Result;
use chat_relay::service::server::start_server;
use chat_relay::utils::logging::init_logging;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Broadcast chat relay", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the file and environment
    #[arg(short, long)]
    address: Option<String>,

    /// Drop clients idle for this many milliseconds
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env()?;

    if let Some(address) = &cli.address {
        config.server.address = address.clone();
    }
    if let Some(ms) = cli.idle_timeout_ms {
        config.server.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
    }

    config.validate_strict()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    if cli.print_config {
        println!(
            "{}",
            toml::to_string_pretty(&config).unwrap_or_else(|_| RelayConfig::example_config())
        );
        return Ok(());
    }

    init_logging(&config.logging)?;
    info!(app = %config.logging.app_name, "starting relay");

    if let Err(err) = start_server(config.server).await {
        error!(error = %err, "relay exited with error");
        return Err(err);
    }
    Ok(())
}
