//! Operator configuration, read from a TOML file
use chrono::{DateTime, Utc};
use ethers::{types::H160, utils::to_checksum};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

use dvrf_core::{
    primitives::{is_valid_threshold, minimum_threshold, Address, TxKind},
    AdminConfig, NodeConfig, SettlePolicy,
};

use crate::contract::GasLimits;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub node: NodeSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub contract_address: Address,
    /// Read from the provider when not set
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default = "default_confirmations")]
    pub confirmations: usize,
    #[serde(default = "default_tx_timeout_secs")]
    pub tx_timeout_secs: u64,
    #[serde(default)]
    pub gas: GasConfig,
}

/// `default` applies to every transaction, any other key names a
/// transaction kind (`submit_public_params = 30000000`)
#[derive(Clone, Debug, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_gas")]
    pub default: u64,
    #[serde(flatten)]
    pub overrides: BTreeMap<String, u64>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            default: default_gas(),
            overrides: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    pub threshold: u64,
    pub members: u64,
    /// When set, the engine is configured with `config <t> <n> <degree>` on startup
    #[serde(default)]
    pub degree: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_round_interval_secs")]
    pub round_interval_secs: u64,
    /// RFC 3339 timestamp before which no round is opened
    #[serde(default)]
    pub round_start: Option<DateTime<Utc>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            round_interval_secs: default_round_interval_secs(),
            round_start: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// The engine's working directory
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Relative to `workdir`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_settle_attempts")]
    pub settle_attempts: u32,
    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            workdir: default_workdir(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            settle_attempts: default_settle_attempts(),
            settle_interval_ms: default_settle_interval_ms(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSection {
    #[serde(default)]
    pub nodes: Vec<Address>,
    #[serde(default)]
    pub strict_consistency: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSection {
    /// Defaults to `member_<address>` with the EIP-55 checksummed address
    #[serde(default)]
    pub key_file: Option<String>,
}

fn default_confirmations() -> usize {
    1
}

fn default_tx_timeout_secs() -> u64 {
    120
}

fn default_gas() -> u64 {
    10_000_000
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_round_interval_secs() -> u64 {
    3600
}

fn default_binary() -> PathBuf {
    PathBuf::from("./target/release/client")
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_settle_attempts() -> u32 {
    10
}

fn default_settle_interval_ms() -> u64 {
    200
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parses and validates a configuration file's contents
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ProtocolConfig {
            threshold, members, ..
        } = self.protocol;
        if !is_valid_threshold(threshold as usize, members as usize) {
            return Err(ConfigError::Invalid(format!(
                "threshold {} is outside [{}, {}] for {} members",
                threshold,
                minimum_threshold(members as usize),
                members,
                members
            )));
        }
        if self.schedule.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be positive".into()));
        }
        if self.schedule.round_interval_secs == 0 {
            return Err(ConfigError::Invalid("round_interval_secs must be positive".into()));
        }
        if self.engine.settle_attempts < 2 {
            return Err(ConfigError::Invalid("settle_attempts must be at least 2".into()));
        }
        if !self.admin.nodes.is_empty() && self.admin.nodes.len() as u64 != members {
            return Err(ConfigError::Invalid(format!(
                "{} admin nodes configured for {} members",
                self.admin.nodes.len(),
                members
            )));
        }
        self.gas_limits()?;
        Ok(())
    }

    pub fn gas_limits(&self) -> Result<GasLimits, ConfigError> {
        let mut overrides = BTreeMap::new();
        for (name, limit) in &self.ledger.gas.overrides {
            let kind = TxKind::ALL
                .iter()
                .find(|kind| kind.as_str() == name)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown transaction kind `{}` in [ledger.gas]", name)))?;
            overrides.insert(*kind, *limit);
        }
        Ok(GasLimits {
            default: self.ledger.gas.default,
            overrides,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.schedule.poll_interval_secs)
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger.tx_timeout_secs)
    }

    pub fn data_root(&self) -> PathBuf {
        self.engine.workdir.join(&self.engine.data_dir)
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        SettlePolicy {
            attempts: self.engine.settle_attempts,
            interval: Duration::from_millis(self.engine.settle_interval_ms),
        }
    }

    pub fn admin_config(&self) -> AdminConfig {
        AdminConfig {
            nodes: self.admin.nodes.clone(),
            threshold: self.protocol.threshold,
            members: self.protocol.members,
            round_interval: Duration::from_secs(self.schedule.round_interval_secs),
            round_start: self.schedule.round_start,
            strict_consistency: self.admin.strict_consistency,
        }
    }

    pub fn node_config(&self, address: Address) -> NodeConfig {
        let key_file = self
            .node
            .key_file
            .clone()
            .unwrap_or_else(|| format!("member_{}", to_checksum(&H160(address.0), None)));
        NodeConfig {
            key_file,
            threshold: self.protocol.threshold,
            members: self.protocol.members,
        }
    }
}
