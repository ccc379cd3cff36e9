//! Command line and environment for the monitor.
//!
//! Every option can also come from the environment (`SWS_SERVER_URL`,
//! `SWS_HOST`, `SWS_SCOPE`, `SWS_PREFIX`, `SWS_ADDRESSING`, `SWS_OFFLINE`).
//! `--config <file>` loads a JSON [`SyncConfig`] instead and ignores the rest.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use sws_sync::{Addressing, ConfigError, OfflinePolicy, Routing, SyncConfig};

/// Console peer for a state-sync server
#[derive(Parser, Debug)]
#[command(name = "sws-monitor")]
#[command(version)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Full ws:// or wss:// URL (wins over --host)
    #[arg(long, env = "SWS_SERVER_URL", value_name = "URL")]
    pub server_url: Option<String>,

    /// Connect to ws://<HOST>:50080
    #[arg(long, env = "SWS_HOST")]
    pub host: Option<String>,

    /// Scope routing with this local scope
    #[arg(long, env = "SWS_SCOPE", conflicts_with = "prefix")]
    pub scope: Option<String>,

    /// Prefix routing with this local prefix (e.g. "tp1.")
    #[arg(long, env = "SWS_PREFIX")]
    pub prefix: Option<String>,

    #[arg(long, env = "SWS_ADDRESSING", value_enum, default_value = "flat")]
    pub addressing: AddressingArg,

    /// What happens to edits made while disconnected
    #[arg(long, env = "SWS_OFFLINE", value_enum, default_value = "queue")]
    pub offline: OfflineArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingArg {
    /// Typed registries keyed by id
    Flat,
    /// One document addressed by path
    Path,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineArg {
    Queue,
    Drop,
}

impl From<AddressingArg> for Addressing {
    fn from(arg: AddressingArg) -> Self {
        match arg {
            AddressingArg::Flat => Addressing::Flat,
            AddressingArg::Path => Addressing::Path,
        }
    }
}

impl From<OfflineArg> for OfflinePolicy {
    fn from(arg: OfflineArg) -> Self {
        match arg {
            OfflineArg::Queue => OfflinePolicy::Queue,
            OfflineArg::Drop => OfflinePolicy::Drop,
        }
    }
}

impl Cli {
    /// Build and validate the engine configuration.
    pub fn into_config(self) -> Result<SyncConfig, ConfigError> {
        if let Some(file) = self.config {
            let json = std::fs::read_to_string(&file)
                .map_err(|e| ConfigError::Parse(format!("{}: {e}", file.display())))?;
            return SyncConfig::from_json(&json);
        }

        let base = match (self.server_url, self.host) {
            (Some(url), _) => SyncConfig::new(url),
            (None, Some(host)) => SyncConfig::for_host(&host),
            (None, None) => return Err(ConfigError::MissingServerUrl),
        };
        let routing = match (self.scope, self.prefix) {
            (Some(local_scope), _) => Routing::Scope { local_scope },
            (None, Some(local_prefix)) => Routing::Prefix { local_prefix },
            (None, None) => Routing::None,
        };

        let config = SyncConfig {
            routing,
            addressing: self.addressing.into(),
            offline: self.offline.into(),
            ..base
        };
        config.validate()?;
        Ok(config)
    }
}
