//! Submission scheduling.
//!
//! Every unit of minimum stake gives the miner one entry index. Each entry
//! becomes submittable at a pseudo-random offset into the cycle derived from
//! `keccak256(miner ‖ entryIndex ‖ rootHash)`, the same value the ledger
//! checks, so any two honest nodes agree on the schedule.

use crate::engine::ReputationEngine;
use crate::error::{MiningError, Result};
use crate::gateway::ChainGateway;
use alloy_primitives::{keccak256, Address, B256, U256};
use repminer_types::{entry_hash_divisor, SubmissionSlot, MAX_SUBMISSIONS_PER_CYCLE};
use std::collections::BinaryHeap;

/// Inputs to the slot computation, fetched once per cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInputs {
    /// Miner address.
    pub miner: Address,
    /// Stake locked by the miner.
    pub staked_balance: U256,
    /// Stake required per entry.
    pub minimum_stake: U256,
    /// Root hash the miner will submit.
    pub root_hash: B256,
    /// Window-open timestamp of the active cycle.
    pub window_open_timestamp: u64,
    /// Cycle length in seconds.
    pub cycle_duration: u64,
}

impl SlotInputs {
    /// Reads stake and window from the ledger and the root hash from the engine.
    pub async fn fetch<G, E>(
        gateway: &G,
        engine: &E,
        miner: Address,
        minimum_stake: U256,
        cycle_duration: u64,
    ) -> Result<Self>
    where
        G: ChainGateway + ?Sized,
        E: ReputationEngine + ?Sized,
    {
        let cycle = gateway.active_cycle().await?;
        let staked_balance = gateway.staked_balance(miner).await?;
        let window_open_timestamp = gateway.window_open_timestamp(cycle).await?;
        let root_hash = engine.root_hash().await?;

        Ok(Self {
            miner,
            staked_balance,
            minimum_stake,
            root_hash,
            window_open_timestamp,
            cycle_duration,
        })
    }

    /// Number of entry indices the stake pays for.
    pub fn entry_count(&self) -> u64 {
        if self.minimum_stake.is_zero() {
            return 0;
        }
        (self.staked_balance / self.minimum_stake).saturating_to::<u64>()
    }
}

/// Hash deciding when `entry_index` becomes submittable.
pub fn entry_hash(miner: Address, entry_index: u64, root_hash: B256) -> B256 {
    let mut packed = [0u8; 20 + 32 + 32];
    packed[..20].copy_from_slice(miner.as_slice());
    packed[20..52].copy_from_slice(&U256::from(entry_index).to_be_bytes::<32>());
    packed[52..].copy_from_slice(root_hash.as_slice());
    keccak256(packed)
}

/// Computes the earliest submission slots for this cycle.
///
/// Returns at most [`MAX_SUBMISSIONS_PER_CYCLE`] slots sorted by eligible
/// timestamp; equal timestamps keep ascending entry order.
pub fn compute_eligible_slots(inputs: &SlotInputs) -> Result<Vec<SubmissionSlot>> {
    if inputs.minimum_stake.is_zero() {
        return Err(MiningError::InvalidConfig("minimum stake is zero".into()));
    }
    if inputs.cycle_duration == 0 {
        return Err(MiningError::InvalidConfig("cycle duration is zero".into()));
    }

    let divisor = entry_hash_divisor(inputs.cycle_duration);
    let count = inputs.entry_count();

    // Max-heap of the best candidates seen so far; the worst is evicted.
    let mut best: BinaryHeap<(u64, u64)> =
        BinaryHeap::with_capacity(MAX_SUBMISSIONS_PER_CYCLE + 1);
    for entry_index in 1..=count {
        let hash = entry_hash(inputs.miner, entry_index, inputs.root_hash);
        let delay = (U256::from_be_bytes(hash.0) / divisor).saturating_to::<u64>();
        let eligible_timestamp = inputs.window_open_timestamp.saturating_add(delay);

        best.push((eligible_timestamp, entry_index));
        if best.len() > MAX_SUBMISSIONS_PER_CYCLE {
            best.pop();
        }
    }

    let slots: Vec<SubmissionSlot> = best
        .into_sorted_vec()
        .into_iter()
        .map(|(eligible_timestamp, entry_index)| SubmissionSlot {
            entry_index,
            eligible_timestamp,
        })
        .collect();

    tracing::debug!(
        miner = %inputs.miner,
        entries = count,
        slots = slots.len(),
        first = slots.first().map(|s| s.eligible_timestamp),
        "computed submission slots"
    );

    Ok(slots)
}
