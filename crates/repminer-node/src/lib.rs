//! # Repminer Node
//!
//! The runnable half of the reputation miner: configuration, logging, the
//! reputation oracle and the [`MinerClient`] facade that starts mining.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        MinerClient                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌───────────────────────┐     ┌──────────────────────────┐ │
//! │  │     Coordinator       │     │     Reputation Oracle    │ │
//! │  │  • block passes       │     │  • GET /, /network       │ │
//! │  │  • log passes         │     │  • proofs by root hash   │ │
//! │  └──────────┬────────────┘     └────────────┬─────────────┘ │
//! │             │                               │               │
//! │  ┌──────────▼────────────┐     ┌────────────▼─────────────┐ │
//! │  │     ChainGateway      │     │    ReputationEngine      │ │
//! │  └───────────────────────┘     └──────────────────────────┘ │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`client`] - Start-up sync, mining loop and oracle lifecycle
//! - [`config`] - Layered node configuration
//! - [`gas`] - Gas price service client
//! - [`oracle`] - Reputation oracle HTTP API
//! - [`observability`] - Structured logging
//!
//! ## Example
//!
//! ```rust,ignore
//! use repminer_node::{config::NodeConfig, gas::gas_oracle_from_config, MinerClient};
//!
//! let config = NodeConfig::load(Some("repminer.yaml".as_ref()))?;
//! repminer_node::observability::init_logging(
//!     &config.log_level,
//!     config.log_format() == repminer_node::observability::LogFormat::Json,
//! );
//! let gas = gas_oracle_from_config(&config)?;
//! let client = MinerClient::initialise(config, gateway, engine, gas).await?;
//! client.wait().await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod gas;
pub mod observability;
pub mod oracle;

pub use client::MinerClient;
pub use config::NodeConfig;
pub use error::{NodeError, Result};
