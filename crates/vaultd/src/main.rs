//! vaultd: pocketvault housekeeping daemon
//!
//! Usage:
//!   vaultd [--config /etc/pocketvault/vault.toml] [--once]
//!
//! Every `sweep_interval_secs` it purges files trashed past the retention
//! window and, when enabled, reconciles blobs on disk with the metadata store.

mod daemon;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "vaultd", version, about = "pocketvault housekeeping daemon")]
struct Cli {
    /// Path to vault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "VAULT_CONFIG",
        default_value = "/etc/pocketvault/vault.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "VAULT_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "VAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = vault_core::config::load_or_default(&cli.config)?;

    let level = cli.log.unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.unwrap_or(match config.daemon.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vaultd starting"
    );

    if cli.once {
        daemon::run_once(config).await
    } else {
        daemon::run(config).await
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
