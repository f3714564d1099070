//! Mining cycle types mirrored from the ledger.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// One of this miner's eligible entries for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionSlot {
    /// 1-based entry index, bounded by staked balance / minimum stake.
    pub entry_index: u64,
    /// Earliest block timestamp at which the entry may be submitted.
    pub eligible_timestamp: u64,
}

impl SubmissionSlot {
    /// Returns true if a block with `timestamp` may carry this entry.
    pub fn is_due(&self, timestamp: u64) -> bool {
        timestamp >= self.eligible_timestamp
    }
}

/// The ledger's record of a submitted hash inside a dispute round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeEntry {
    /// Address that first submitted this hash.
    pub first_submitter: Address,
    /// Timestamp of the last response from this side.
    pub last_response_timestamp: u64,
    /// Number of dispute steps completed.
    pub challenge_step_completed: u64,
    /// Lower bound of the binary search.
    pub lower_bound: U256,
    /// Upper bound of the binary search.
    pub upper_bound: U256,
    /// Intermediate reputation state hash at the current search point.
    pub intermediate_reputation_hash: B256,
    /// Node count of the intermediate reputation state.
    pub intermediate_reputation_n_nodes: U256,
    /// Target hash the search is narrowing towards.
    pub target_hash_during_search: B256,
}

impl DisputeEntry {
    /// Returns true once the binary search has narrowed to a single point.
    pub fn search_narrowed(&self) -> bool {
        self.upper_bound == self.lower_bound
    }
}

/// A submitted (hash, node count, justification root) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    /// Proposed reputation root hash.
    pub proposed_new_root_hash: B256,
    /// Number of nodes in the proposed tree.
    pub n_nodes: U256,
    /// Justification root hash.
    pub jrh: B256,
    /// Number of nodes in the justification tree; zero until confirmed.
    pub jrh_n_nodes: U256,
}

impl Submission {
    /// Returns true for the ledger's zero value ("no submission").
    pub fn is_empty(&self) -> bool {
        self.proposed_new_root_hash == B256::ZERO
    }

    /// Returns true if both submissions propose the same triple.
    pub fn same_proposal(&self, other: &Submission) -> bool {
        self.proposed_new_root_hash == other.proposed_new_root_hash
            && self.n_nodes == other.n_nodes
            && self.jrh == other.jrh
    }
}

/// Minimal block header as seen by the miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
}

/// Notification that the ledger confirmed a cycle's root hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleCompleted {
    /// Confirmed reputation root hash.
    pub hash: B256,
    /// Node count of the confirmed tree.
    pub n_nodes: U256,
    /// Block the confirmation was mined in.
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_submission_is_empty() {
        assert!(Submission::default().is_empty());

        let submission = Submission {
            proposed_new_root_hash: B256::repeat_byte(0x11),
            n_nodes: U256::from(3),
            jrh: B256::repeat_byte(0x22),
            jrh_n_nodes: U256::ZERO,
        };
        assert!(!submission.is_empty());
    }

    #[test]
    fn test_same_proposal_ignores_jrh_node_count() {
        let a = Submission {
            proposed_new_root_hash: B256::repeat_byte(0x11),
            n_nodes: U256::from(3),
            jrh: B256::repeat_byte(0x22),
            jrh_n_nodes: U256::ZERO,
        };
        let b = Submission {
            jrh_n_nodes: U256::from(8),
            ..a
        };
        assert!(a.same_proposal(&b));

        let c = Submission {
            n_nodes: U256::from(4),
            ..a
        };
        assert!(!a.same_proposal(&c));
    }

    #[test]
    fn test_slot_due_at_eligible_timestamp() {
        let slot = SubmissionSlot {
            entry_index: 1,
            eligible_timestamp: 1_000,
        };
        assert!(!slot.is_due(999));
        assert!(slot.is_due(1_000));
        assert!(slot.is_due(1_001));
    }

    #[test]
    fn test_dispute_entry_serde_uses_camel_case() {
        let entry = DisputeEntry {
            challenge_step_completed: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["challengeStepCompleted"], 2);
        assert!(json.get("lowerBound").is_some());
    }
}
