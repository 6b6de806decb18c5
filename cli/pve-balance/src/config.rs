//! Configuration file loading.
//!
//! The config file is TOML with three sections:
//! - `[pve]`: API credentials and connection settings
//! - `[balance]`: planner and scheduler tuning
//! - `[log]`: default log level and format

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use pvebal_balance::{ExecutorConfig, DEFAULT_THRESHOLD};
use serde::Deserialize;

use crate::client::Credentials;
use crate::error::CliError;

/// Configuration file name.
pub const CONFIG_FILE: &str = "pve-balance.toml";

/// System-wide config directory.
const SYSTEM_CONFIG_DIR: &str = "/etc";

/// Locations searched for the config file, in order.
///
/// An explicit path replaces the search list.
pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }

    let mut paths = vec![Path::new(".").join(CONFIG_FILE)];
    if let Some(dirs) = ProjectDirs::from("", "", "pve-balance") {
        paths.push(dirs.config_dir().join(CONFIG_FILE));
    }
    paths.push(Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE));
    paths
}

/// Full CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub pve: PveConfig,
    pub balance: BalanceConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load the first config file found in [`search_paths`].
    ///
    /// Returns the config and the path it was read from.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf)> {
        let searched = search_paths(explicit);

        let Some(path) = searched.iter().find(|path| path.is_file()) else {
            return Err(CliError::ConfigNotFound { searched }.into());
        };

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;

        Ok((config, path.clone()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.pve.credentials()?;
        Ok(config)
    }
}

/// `[pve]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PveConfig {
    /// API user, including the realm.
    pub user: String,

    pub password: Option<String>,

    /// API token id (the part after `!`).
    pub token_name: Option<String>,

    pub token_value: Option<String>,

    pub port: u16,

    /// Verify the server's TLS certificate.
    pub verify_ssl: bool,
}

impl Default for PveConfig {
    fn default() -> Self {
        Self {
            user: "root@pam".to_string(),
            password: None,
            token_name: None,
            token_value: None,
            port: 8006,
            verify_ssl: true,
        }
    }
}

impl PveConfig {
    /// API token credentials take precedence over a password.
    pub fn credentials(&self) -> Result<Credentials, CliError> {
        match (&self.token_name, &self.token_value, &self.password) {
            (Some(name), Some(value), _) => Ok(Credentials::Token {
                user: self.user.clone(),
                name: name.clone(),
                value: value.clone(),
            }),
            (Some(_), None, _) | (None, Some(_), _) => Err(CliError::config(
                "token_name and token_value must be set together",
            )),
            (None, None, Some(password)) => Ok(Credentials::Password {
                user: self.user.clone(),
                password: password.clone(),
            }),
            (None, None, None) => Err(CliError::config(
                "[pve] needs either password or token_name and token_value",
            )),
        }
    }

    /// Base URL of the JSON API on `host`.
    pub fn api_url(&self, host: &str) -> String {
        format!("https://{}:{}/api2/json", host, self.port)
    }
}

/// `[balance]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalanceConfig {
    /// Convergence tolerance in bytes.
    pub threshold: u64,

    pub poll_interval_secs: u64,

    /// Longest wait for any migration to finish. 0 waits forever.
    pub stall_timeout_secs: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            poll_interval_secs: 1,
            stall_timeout_secs: 3600,
        }
    }
}

impl BalanceConfig {
    pub fn executor_config(&self, wait: bool) -> ExecutorConfig {
        ExecutorConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            stall_timeout: (self.stall_timeout_secs > 0)
                .then(|| Duration::from_secs(self.stall_timeout_secs)),
            wait,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml("[pve]\npassword = \"secret\"\n").unwrap();

        assert_eq!(config.pve.user, "root@pam");
        assert_eq!(config.pve.port, 8006);
        assert!(config.pve.verify_ssl);
        assert_eq!(config.balance.threshold, DEFAULT_THRESHOLD);
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.log.level.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [pve]
            user = "balance@pve"
            token_name = "balancer"
            token_value = "00000000-0000-0000-0000-000000000000"
            port = 443
            verify_ssl = false

            [balance]
            threshold = 536870912
            poll_interval_secs = 5
            stall_timeout_secs = 0

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.pve.credentials().unwrap(),
            Credentials::Token { ref name, .. } if name == "balancer"
        ));
        assert_eq!(config.pve.api_url("pve1"), "https://pve1:443/api2/json");
        assert_eq!(config.balance.threshold, 512 * 1024 * 1024);
        assert_eq!(config.log.format, LogFormat::Json);

        let executor = config.balance.executor_config(true);
        assert_eq!(executor.poll_interval, Duration::from_secs(5));
        assert!(executor.stall_timeout.is_none());
        assert!(executor.wait);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let err = Config::from_toml("[pve]\nuser = \"root@pam\"\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Config(_))
        ));
    }

    #[test]
    fn test_half_token_rejected() {
        let err = Config::from_toml("[pve]\ntoken_name = \"x\"\npassword = \"y\"\n").unwrap_err();
        assert!(err.to_string().contains("together"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::from_toml("[pve]\npassword = \"x\"\nhots = \"pve1\"\n").is_err());
    }

    #[test]
    fn test_search_paths_in_order() {
        let paths = search_paths(None);
        assert_eq!(paths.first().unwrap(), &Path::new(".").join(CONFIG_FILE));
        assert_eq!(paths.last().unwrap(), &Path::new("/etc").join(CONFIG_FILE));

        let explicit = search_paths(Some(Path::new("/tmp/other.toml")));
        assert_eq!(explicit, vec![PathBuf::from("/tmp/other.toml")]);
    }

    #[test]
    fn test_load_reports_searched_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(CONFIG_FILE);

        let err = Config::load(Some(&missing)).unwrap_err();
        match err.downcast_ref::<CliError>() {
            Some(CliError::ConfigNotFound { searched }) => assert_eq!(searched, &vec![missing]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[pve]\npassword = \"secret\"\n[balance]\nthreshold = 1\n").unwrap();

        let (config, loaded_from) = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.balance.threshold, 1);
    }
}
