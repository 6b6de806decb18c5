//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::output::OutputFormat;

/// Balance VMs in a Proxmox Virtual Environment cluster.
#[derive(Debug, Parser)]
#[command(name = "pve-balance")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Proxmox VE host to connect to.
    pub host: String,

    /// Exclude these cluster nodes from the target calculations.
    ///
    /// All VMs are migrated off excluded nodes and none are migrated onto
    /// them.
    #[arg(long, value_name = "NODE")]
    pub exclude: Vec<String>,

    /// Just calculate the migrations, but don't execute them.
    #[arg(long)]
    pub dry: bool,

    /// Wait for all migrations to finish before exiting.
    #[arg(long)]
    pub wait: bool,

    /// Log level (trace, debug, info, warning, error or a numeric level).
    #[arg(long, value_name = "LEVEL", value_parser = parse_log_level)]
    pub loglevel: Option<LevelFilter>,

    /// Config file to use instead of searching the default locations.
    #[arg(long, value_name = "PATH", env = "PVE_BALANCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Convergence tolerance in bytes (overrides the config file).
    #[arg(long, value_name = "BYTES")]
    pub threshold: Option<u64>,

    /// Output format for the plan.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

/// Parse a level name or a numeric level as used by syslog-style tools
/// (10 = debug ... 50 = critical).
pub fn parse_log_level(level: &str) -> Result<LevelFilter, String> {
    let filter = match level.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" | "critical" | "fatal" => LevelFilter::ERROR,
        other => match other.parse::<u32>() {
            Ok(0..=9) => LevelFilter::TRACE,
            Ok(10..=19) => LevelFilter::DEBUG,
            Ok(20..=29) => LevelFilter::INFO,
            Ok(30..=39) => LevelFilter::WARN,
            Ok(_) => LevelFilter::ERROR,
            Err(_) => return Err(format!("{level} is not a valid loglevel")),
        },
    };
    Ok(filter)
}
