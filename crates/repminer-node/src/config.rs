//! Node configuration.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `REPMINER_*` environment variables (`REPMINER_ORACLE_PORT=3002`).

use crate::error::{NodeError, Result};
use crate::observability::LogFormat;
use alloy_primitives::{Address, U256};
use repminer_core::default_minimum_stake;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix of environment variables read by [`NodeConfig::load`].
pub const ENV_PREFIX: &str = "REPMINER";

/// Configuration for the miner client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the client mines as (hex).
    pub miner_address: String,
    /// JSON-RPC endpoint of the ledger.
    pub rpc_url: String,
    /// Block to replay reputation history from when syncing.
    pub starting_block: u64,
    /// Where the reputation tree is persisted.
    pub state_path: PathBuf,
    /// Start the mining loop on initialise.
    pub auto_run: bool,
    /// Serve the reputation oracle.
    pub oracle: bool,
    /// Oracle listen port.
    pub oracle_port: u16,
    /// Treat a failed block pass as fatal.
    pub exit_on_error: bool,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,
    /// Stake per entry index in wei, as a decimal string.
    pub minimum_stake: String,
    /// Gas price service; the default price is used when unset.
    pub gas_oracle_url: Option<String>,
    /// Field of the gas price document to read.
    pub gas_oracle_speed: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            miner_address: Address::ZERO.to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            starting_block: 0,
            state_path: PathBuf::from("./reputationStates.sqlite"),
            auto_run: true,
            oracle: true,
            oracle_port: 3000,
            exit_on_error: false,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            minimum_stake: default_minimum_stake().to_string(),
            gas_oracle_url: None,
            gas_oracle_speed: "safeLow".to_string(),
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from defaults, `path` and the process
    /// environment, then validates it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`NodeConfig::load`], reading variables from `env` instead of
    /// the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: NodeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values the client cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(NodeError::Config("rpc_url must not be empty".into()));
        }
        if self.minimum_stake()?.is_zero() {
            return Err(NodeError::Config("minimum_stake must be positive".into()));
        }
        if self.oracle && self.oracle_port == 0 {
            return Err(NodeError::Config(
                "oracle_port must be set when the oracle is enabled".into(),
            ));
        }
        self.miner()?;
        Ok(())
    }

    /// Parsed miner address.
    pub fn miner(&self) -> Result<Address> {
        Address::from_str(self.miner_address.trim())
            .map_err(|e| NodeError::Config(format!("invalid miner_address: {e}")))
    }

    /// Parsed minimum stake.
    pub fn minimum_stake(&self) -> Result<U256> {
        U256::from_str(self.minimum_stake.trim())
            .map_err(|e| NodeError::Config(format!("invalid minimum_stake: {e}")))
    }

    /// Parsed log format.
    pub fn log_format(&self) -> LogFormat {
        LogFormat::parse(&self.log_format)
    }
}
