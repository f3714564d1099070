//! Reputation Mining Core
//!
//! This crate holds the decision-making half of the reputation miner: when
//! to submit, what to do next in a dispute, and how block and log events are
//! serialized against each other.
//!
//! # Architecture
//!
//! The ledger and the reputation tree are reached through two traits, so the
//! logic here runs the same against a live chain or the in-memory doubles:
//!
//! - [`ChainGateway`]: typed reads of the mining cycle, transaction
//!   submission and the block / cycle-complete event streams
//! - [`ReputationEngine`]: root hashes, proofs and dispute payloads
//!
//! # Components
//!
//! - [`compute_eligible_slots`]: the miner's twelve earliest entry slots
//! - [`decide_action`]: the single dispute step to take for a block
//! - [`TransactionSender`]: priced, one-shot transaction submission
//! - [`Coordinator`]: the pass gate over block and log processing
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  New block   │────▶│  Block pass  │────▶│   Snapshot   │
//! │              │     │  (gated)     │     │  (ledger)    │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌────────────────────────────┘
//!                      ▼
//!               ┌──────────────┐     ┌──────────────┐
//!               │ decide_action│────▶│  One tx      │
//!               └──────────────┘     └──────────────┘
//!
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Cycle        │────▶│  Log pass    │────▶│ Apply log,   │
//! │ complete     │     │  (gated)     │     │ persist,     │
//! └──────────────┘     └──────────────┘     │ new slots    │
//!                                           └──────────────┘
//! ```

mod coordinator;
mod dispute;
mod engine;
mod error;
mod gateway;
mod scheduler;
mod transaction;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use coordinator::{
    default_minimum_stake, BlockOutcome, Coordinator, MinerConfig, PassState, ProgressView,
};
pub use dispute::{
    decide_action, Action, DisputePosition, LedgerSnapshot, Opponent, SubmissionCheck,
};
pub use engine::{
    BinarySearchResponse, BinarySearchResult, ChallengeResponse, JustificationProof,
    ReputationEngine,
};
pub use error::{MiningError, Result};
pub use gateway::{ChainGateway, CycleCall, Topic, TransactionReceipt, TransactionRequest};
pub use scheduler::{compute_eligible_slots, entry_hash, SlotInputs};
pub use transaction::{
    prepare_call, FixedGasPrice, GasPrice, GasPriceOracle, TransactionSender, DEFAULT_GAS_PRICE,
    GAS_PRICE_REFRESH,
};
