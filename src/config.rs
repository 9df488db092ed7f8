//! Command-line and file configuration for the naming server.
//!
//! CLI flags are parsed with [`clap`]; an optional TOML file parsed with
//! [`serde`]/[`toml`] supplies the same fields. A flag passed on the command
//! line always wins over the file; the file wins over the hardcoded default.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::{NsError, Result};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = ".";
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_CLIENTS: usize = 100;

/// Command-line arguments. Every field besides `config` is optional so the
/// merge logic in [`Config::load`] can tell "not passed" from "passed the
/// default value".
#[derive(Parser, Debug, Default)]
#[command(name = "naming-server", about = "Naming Server for a distributed file system")]
pub struct Cli {
    /// TCP port the dispatcher listens on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Path to an optional TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base directory containing registry.dat, cache/, and backups/.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Seconds between heartbeat sweeps of the storage-server fleet.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,

    /// Seconds of silence before an active storage server is marked failed.
    #[arg(long)]
    pub heartbeat_timeout_secs: Option<u64>,

    /// Soft cap on concurrent client connections.
    #[arg(long)]
    pub max_clients: Option<usize>,
}

/// Mirror of [`Cli`] deserialized from a TOML file.
#[derive(Deserialize, Default, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub heartbeat_interval_secs: Option<u64>,
    pub heartbeat_timeout_secs: Option<u64>,
    pub max_clients: Option<usize>,
}

/// Fully resolved, immutable server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub max_clients: usize,
}

impl Config {
    /// Merge CLI flags over an optional config file over hardcoded defaults.
    pub fn load(cli: Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                toml::from_str::<FileConfig>(&text)
                    .map_err(|e| NsError::Persistence(format!("{}: {e}", path.display())))?
            }
            None => FileConfig::default(),
        };

        Ok(Config {
            port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
            data_dir: cli
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            heartbeat_interval_secs: cli
                .heartbeat_interval_secs
                .or(file.heartbeat_interval_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout_secs: cli
                .heartbeat_timeout_secs
                .or(file.heartbeat_timeout_secs)
                .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            max_clients: cli.max_clients.or(file.max_clients).unwrap_or(DEFAULT_MAX_CLIENTS),
        })
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.dat")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_file_overrides_default() {
        let file = FileConfig { port: Some(9000), ..Default::default() };
        let cli = Cli { port: Some(7000), ..Default::default() };
        let merged_port = cli.port.or(file.port).unwrap_or(DEFAULT_PORT);
        assert_eq!(merged_port, 7000);

        let cli_no_port = Cli::default();
        let merged_from_file = cli_no_port.port.or(file.port).unwrap_or(DEFAULT_PORT);
        assert_eq!(merged_from_file, 9000);
    }

    #[test]
    fn defaults_apply_when_nothing_set() {
        let cfg = Config::load(Cli::default()).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.max_clients, DEFAULT_MAX_CLIENTS);
    }
}
