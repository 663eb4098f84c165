//! Configuration of the runner itself.
//!
//! Loads an optional TOML file, fills in defaults and applies environment
//! variable overrides. Profiles are configured separately (see
//! [`crate::profile`]).

use crate::dump::DumpSettings;
use crate::remote::HostKeyPolicy;
use crate::utils::paths::expand_tilde;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_LOG_LEVEL: &str = "BACKUP_RUNNER_LOG_LEVEL";
pub const ENV_KNOWN_HOSTS: &str = "BACKUP_RUNNER_KNOWN_HOSTS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub ssh: SshConfig,
    pub dump: DumpSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// OpenSSH known_hosts file used to verify servers
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,

    /// Disable only for throwaway test hosts
    #[serde(default = "default_verify_host_key")]
    pub verify_host_key: bool,

    /// Timeout of every blocking SSH call, 0 waits forever
    #[serde(default)]
    pub timeout_secs: u64,
}

// Default values
fn default_log_level() -> String {
    "info".to_string()
}

fn default_known_hosts() -> String {
    "~/.ssh/known_hosts".to_string()
}

fn default_verify_host_key() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            known_hosts: default_known_hosts(),
            verify_host_key: default_verify_host_key(),
            timeout_secs: 0,
        }
    }
}

impl SshConfig {
    pub fn host_key_policy(&self) -> HostKeyPolicy {
        if self.verify_host_key {
            HostKeyPolicy::Verify {
                known_hosts: expand_tilde(&self.known_hosts),
            }
        } else {
            HostKeyPolicy::AcceptAny
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, otherwise defaults, then apply overrides from
    /// the environment (and a `.env` file, if present).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log.level = level;
        }
        if let Some(known_hosts) = lookup(ENV_KNOWN_HOSTS).filter(|v| !v.is_empty()) {
            self.ssh.known_hosts = known_hosts;
        }
    }
}
