//! Broker configuration.
//!
//! [`BrokerConfigToml`] mirrors the on-disk file with every field optional;
//! [`BrokerConfig`] is the resolved form the broker runs with.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::BrokerError;

/// File name of the privileged helper, looked up next to the running executable.
pub const DEFAULT_HELPER_NAME: &str = "runas-helper";

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(3_000);

pub const DEFAULT_REPLY_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Bound on writing a run request to a helper that is not draining its stdin.
pub const DEFAULT_REQUEST_WRITE_TIMEOUT: Duration = Duration::from_millis(1_000);

/// Environment variables passed through to the helper. Everything else is dropped.
pub const DEFAULT_FORWARD_ENV: [&str; 3] = ["PATH", "LANG", "LC_ALL"];

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfigToml {
    /// Absolute path of the helper binary. Overrides `helper_name`.
    pub helper_path: Option<PathBuf>,

    /// Helper file name resolved against the broker's own install directory.
    pub helper_name: Option<String>,

    /// How long an authenticate-only attempt waits for the helper to exit.
    pub probe_timeout_ms: Option<u64>,

    /// Upper bound for reading the reply frame once the helper has exited.
    pub reply_read_timeout_ms: Option<u64>,

    /// How long an authenticate-and-run attempt may spend writing its request.
    pub request_write_timeout_ms: Option<u64>,

    pub forward_env: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub helper_path: Option<PathBuf>,
    pub helper_name: String,
    pub probe_timeout: Duration,
    pub reply_read_timeout: Duration,
    pub request_write_timeout: Duration,
    pub forward_env: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            helper_path: None,
            helper_name: DEFAULT_HELPER_NAME.to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            reply_read_timeout: DEFAULT_REPLY_READ_TIMEOUT,
            request_write_timeout: DEFAULT_REQUEST_WRITE_TIMEOUT,
            forward_env: Vec::from(DEFAULT_FORWARD_ENV.map(str::to_string)),
        }
    }
}

impl BrokerConfig {
    /// Read and resolve a TOML config file.
    pub fn load(path: &Path) -> Result<Self, BrokerError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            BrokerError::config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, BrokerError> {
        let config_toml: BrokerConfigToml = toml::from_str(contents)
            .map_err(|err| BrokerError::config(format!("invalid broker config: {err}")))?;
        Self::try_from(config_toml)
    }

    /// Config that runs the helper at an explicit absolute path.
    pub fn with_helper_path(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: Some(helper_path.into()),
            ..Self::default()
        }
    }
}

impl TryFrom<BrokerConfigToml> for BrokerConfig {
    type Error = BrokerError;

    fn try_from(config_toml: BrokerConfigToml) -> Result<Self, Self::Error> {
        let BrokerConfigToml {
            helper_path,
            helper_name,
            probe_timeout_ms,
            reply_read_timeout_ms,
            request_write_timeout_ms,
            forward_env,
        } = config_toml;

        if let Some(path) = &helper_path
            && !path.is_absolute()
        {
            return Err(BrokerError::config(format!(
                "helper_path must be absolute, got {}",
                path.display()
            )));
        }

        let defaults = Self::default();
        let helper_name = match helper_name {
            Some(name) if name.is_empty() || name.contains(std::path::MAIN_SEPARATOR) => {
                return Err(BrokerError::config(format!(
                    "helper_name must be a bare file name, got {name:?}"
                )));
            }
            Some(name) => name,
            None => defaults.helper_name,
        };

        Ok(Self {
            helper_path,
            helper_name,
            probe_timeout: probe_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.probe_timeout),
            reply_read_timeout: reply_read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reply_read_timeout),
            request_write_timeout: request_write_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_write_timeout),
            forward_env: forward_env.unwrap_or(defaults.forward_env),
        })
    }
}
