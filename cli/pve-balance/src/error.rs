//! Error handling and display for the CLI.

use std::path::PathBuf;

use colored::Colorize;
use pvebal_balance::{BackendError, BalanceError, ExecuteError};
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Authentication with the Proxmox API failed.")]
    NotAuthenticated,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Could not read config from any of the searched locations")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{count} migrations failed")]
    MigrationsFailed { count: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl From<CliError> for BackendError {
    fn from(err: CliError) -> Self {
        match err {
            CliError::Network(e) => BackendError::request(e.to_string()),
            CliError::Api { .. } | CliError::NotAuthenticated => {
                BackendError::response(err.to_string())
            }
            other => BackendError::Other(other.to_string()),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NotAuthenticated => {
                eprintln!(
                    "\n{}",
                    "Hint: Check user and password or token in the [pve] config section.".yellow()
                );
            }
            CliError::Api { status: 403, .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: The API user needs VM.Migrate and Sys.Audit privileges.".yellow()
                );
            }
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the host name, the [pve] port and verify_ssl.".yellow()
                );
            }
            CliError::ConfigNotFound { searched } => {
                for path in searched {
                    eprintln!("  {}", path.display());
                }
            }
            CliError::MigrationsFailed { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Inspect the failed tasks in the Proxmox task log.".yellow()
                );
            }
            _ => {}
        }
    }

    if let Some(balance_err) = err.downcast_ref::<BalanceError>() {
        match balance_err {
            BalanceError::NoCapacity { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: At least one node with memory must stay out of --exclude.".yellow()
                );
            }
            BalanceError::Execute(ExecuteError::Stalled { .. }) => {
                eprintln!(
                    "\n{}",
                    "Hint: Raise [balance] stall_timeout_secs or set it to 0.".yellow()
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_maps_to_response_error() {
        let err: BackendError = CliError::api(500, "VM 100 not running").into();
        assert!(matches!(err, BackendError::Response(_)));
        assert!(err.to_string().contains("VM 100 not running"));
    }

    #[test]
    fn test_config_error_maps_to_other() {
        let err: BackendError = CliError::config("no credentials").into();
        assert!(matches!(err, BackendError::Other(_)));
    }
}
