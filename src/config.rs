use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{KickerError, Result};

pub const DEFAULT_MAX_CONCURRENT_NUM: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountSection,
    #[serde(default)]
    pub kicker: KickerSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// AWS account information.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountSection {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub profile: String,
}

/// Command-kicker settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KickerSection {
    #[serde(default)]
    pub max_concurrent_num: usize,
    /// Shell command fired when a job is skipped because its lifetime expired.
    #[serde(default)]
    pub life_time_trigger: String,
    #[serde(default)]
    pub stats_port: u16,
    #[serde(default)]
    pub stats_socket: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub queue_name: String,
}

/// Lock and throttle table names. Empty means the null implementation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub lock_table: String,
    #[serde(default)]
    pub throttle_table: String,
}

impl Config {
    /// Load configuration from a TOML file and apply defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| KickerError::Config(format!("failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| KickerError::Config(format!("failed to parse config file: {}", e)))?;

        if config.kicker.max_concurrent_num == 0 {
            config.kicker.max_concurrent_num = DEFAULT_MAX_CONCURRENT_NUM;
        }

        Ok(config)
    }

    pub fn set_stats_port(&mut self, port: u16) -> Result<()> {
        if !self.kicker.stats_socket.is_empty() {
            return Err(KickerError::Config(
                "stats api unix domain socket is already set, unset stats_socket to use a tcp listener".into(),
            ));
        }
        self.kicker.stats_port = port;
        Ok(())
    }

    pub fn set_stats_socket(&mut self, sock: String) -> Result<()> {
        if self.kicker.stats_port != 0 {
            return Err(KickerError::Config(
                "stats api port is already set, unset stats_port to use a unix domain socket".into(),
            ));
        }
        self.kicker.stats_socket = sock;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue.queue_name.is_empty() {
            return Err(KickerError::Config("queue_name is required".into()));
        }

        if self.account.id.is_empty() {
            return Err(KickerError::Config("aws account id is required".into()));
        }

        if self.account.region.is_empty() {
            return Err(KickerError::Config("aws region is required".into()));
        }

        if self.kicker.stats_port != 0 && !self.kicker.stats_socket.is_empty() {
            return Err(KickerError::Config(
                "could not specify both stats api port and unix domain socket".into(),
            ));
        }

        Ok(())
    }
}
