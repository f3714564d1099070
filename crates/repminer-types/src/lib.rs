//! Common types used throughout `repminer`.
//!
//! This crate provides the data model shared by the reputation mining
//! client: the ledger's view of a mining cycle and its dispute rounds, the
//! miner's submission slots, and the reputation keys served by the oracle.

mod cycle;
mod reputation;

pub use alloy_primitives::{Address, B256, U256};
pub use cycle::{BlockHeader, CycleCompleted, DisputeEntry, Submission, SubmissionSlot};
pub use reputation::{KeyError, ReputationKey, ReputationProof, ReputationValue};

/// Length of a mining cycle in seconds.
pub const MINING_CYCLE_DURATION: u64 = 24 * 60 * 60;

/// Maximum number of submissions the ledger accepts for one hash per cycle.
pub const MAX_SUBMISSIONS_PER_CYCLE: usize = 12;

/// Seconds an opponent may stay silent before it can be invalidated.
pub const MINER_RESPONSE_TIMEOUT: u64 = 600;

/// Divisor mapping a 256-bit entry hash onto `[0, cycle_duration)`.
pub fn entry_hash_divisor(cycle_duration: u64) -> U256 {
    U256::MAX / U256::from(cycle_duration.max(1))
}
