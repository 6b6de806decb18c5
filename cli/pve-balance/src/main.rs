//! pve-balance - Balance VMs in a Proxmox Virtual Environment cluster.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pve_balance::backend::ProxmoxCluster;
use pve_balance::cli::{parse_log_level, Cli};
use pve_balance::client::ProxmoxClient;
use pve_balance::config::{Config, LogFormat};
use pve_balance::error::{self, CliError};
use pve_balance::output;
use pvebal_balance::{BalanceOptions, Balancer};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let (config, config_path) = Config::load(cli.config.as_deref())?;
    init_tracing(&cli, &config)?;

    info!(path = %config_path.display(), "Configuration loaded");

    let credentials = config.pve.credentials()?;
    let api_url = config.pve.api_url(&cli.host);
    let client = ProxmoxClient::connect(&api_url, &credentials, config.pve.verify_ssl)
        .await
        .with_context(|| format!("Failed to connect to {}", api_url))?;
    let cluster = ProxmoxCluster::new(client);

    let options = BalanceOptions {
        exclude: cli.exclude.iter().cloned().collect(),
        threshold: cli.threshold.unwrap_or(config.balance.threshold),
        dry: cli.dry,
        executor: config.balance.executor_config(cli.wait),
    };

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, no further migrations will be started");
            let _ = shutdown_tx.send(true);
        }
    });

    let report = Balancer::new(options).run(&cluster, shutdown_rx).await?;
    output::print_report(&report, cli.format);

    if let Some(execution) = &report.execution {
        if !execution.failed.is_empty() {
            return Err(CliError::MigrationsFailed {
                count: execution.failed.len(),
            }
            .into());
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over `--loglevel`, which wins over the config file.
fn init_tracing(cli: &Cli, config: &Config) -> Result<()> {
    let level = match (cli.loglevel, config.log.level.as_deref()) {
        (Some(level), _) => level,
        (None, Some(level)) => parse_log_level(level)
            .map_err(|e| CliError::config(format!("[log] level: {e}")))?,
        (None, None) => LevelFilter::INFO,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.to_string().into());
    let (json, text) = match config.log.format {
        LogFormat::Json => (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();

    Ok(())
}
