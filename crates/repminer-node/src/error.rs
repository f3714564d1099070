//! Node error types.

use repminer_core::MiningError;
use thiserror::Error;

/// Errors raised while configuring or running the miner client.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A socket or file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The mining loop failed.
    #[error(transparent)]
    Mining(#[from] MiningError),
}

impl From<config::ConfigError> for NodeError {
    fn from(e: config::ConfigError) -> Self {
        NodeError::Config(e.to_string())
    }
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
