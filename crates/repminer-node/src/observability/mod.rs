//! # Observability Module
//!
//! Structured logging for the miner client. Every component logs through
//! `tracing` with structured fields; this module installs the subscriber.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use repminer_node::observability::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::parse("json") == LogFormat::Json);
//! ```

mod logging;

pub use logging::{init_logging, LogFormat};
