//! Mining error types.

use alloy_primitives::B256;
use thiserror::Error;

/// Errors that can occur while mining.
#[derive(Debug, Error)]
pub enum MiningError {
    /// A read or write against the ledger failed.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The reputation engine failed.
    #[error("reputation engine error: {0}")]
    Engine(String),

    /// A transaction was mined but reverted.
    #[error("transaction {hash} reverted: {action}")]
    TransactionReverted {
        /// Transaction hash.
        hash: B256,
        /// Action the transaction carried.
        action: String,
    },

    /// The gas price service could not be used.
    #[error("gas oracle error: {0}")]
    GasOracle(String),

    /// Mining parameters were invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A block pass failed while running in fail-fast mode.
    #[error("fatal error during block checks: {0}")]
    Fatal(String),

    /// An event channel closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// A specialized Result type for mining operations.
pub type Result<T> = std::result::Result<T, MiningError>;
