//! Reputation engine interface.
//!
//! The engine owns the reputation tree. The miner only asks it for hashes,
//! proofs and the payloads each dispute step needs; how the tree is built
//! and stored is up to the implementation.

use crate::error::Result;
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use repminer_types::{DisputeEntry, ReputationKey, ReputationProof, ReputationValue, Submission};

/// Proof that the justification tree starts and ends where it claims.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JustificationProof {
    /// Branch mask proving the first justification leaf.
    pub branch_mask_1: U256,
    /// Siblings for the first justification leaf.
    pub siblings_1: Vec<B256>,
    /// Branch mask proving the last justification leaf.
    pub branch_mask_2: U256,
    /// Siblings for the last justification leaf.
    pub siblings_2: Vec<B256>,
}

/// One step of the binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinarySearchResponse {
    /// Encoded justification leaf at the search point.
    pub jh_intermediate_value: Bytes,
    /// Branch mask of the leaf.
    pub branch_mask: U256,
    /// Siblings of the leaf.
    pub siblings: Vec<B256>,
}

/// Proof of the point where the binary search stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinarySearchResult {
    /// Encoded justification leaf at the agreed point.
    pub jh_intermediate_value: Bytes,
    /// Branch mask of the leaf.
    pub branch_mask: U256,
    /// Siblings of the leaf.
    pub siblings: Vec<B256>,
}

/// Proof of the single disputed reputation update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeResponse {
    /// Numeric arguments (indices, branch masks, amounts).
    pub u: Vec<U256>,
    /// Hash arguments.
    pub b32: Vec<B256>,
    /// Merkle sibling lists, one per proven leaf.
    pub siblings: Vec<Vec<B256>>,
}

/// The reputation tree as used by the miner.
#[async_trait]
pub trait ReputationEngine: Send + Sync {
    /// Loads persisted state, returning its root hash if any was found.
    async fn load_state(&self) -> Result<Option<B256>>;

    /// Rebuilds the tree by replaying the ledger from `from_block`.
    async fn sync(&self, from_block: u64) -> Result<()>;

    /// Current root hash.
    async fn root_hash(&self) -> Result<B256>;

    /// Number of nodes in the current tree.
    async fn n_nodes(&self) -> Result<U256>;

    /// Root hash of the justification tree for the current update.
    async fn justification_root_hash(&self) -> Result<B256>;

    /// The (hash, nNodes, jrh) triple this miner proposes.
    async fn proposal(&self) -> Result<Submission> {
        Ok(Submission {
            proposed_new_root_hash: self.root_hash().await?,
            n_nodes: self.n_nodes().await?,
            jrh: self.justification_root_hash().await?,
            jrh_n_nodes: U256::ZERO,
        })
    }

    /// Applies the reputation log held by `cycle` to the tree.
    async fn apply_pending_log(&self, cycle: Address) -> Result<()>;

    /// Persists the current tree.
    async fn persist_state(&self) -> Result<()>;

    /// Proof for `key` under the current root; `None` if absent.
    async fn proof(&self, key: &ReputationKey) -> Result<Option<ReputationProof>>;

    /// Proof for `key` under an older root; `None` if it cannot be proven.
    async fn historical_proof(
        &self,
        root_hash: B256,
        key: &ReputationKey,
    ) -> Result<Option<ReputationProof>>;

    /// Every reputation in the current tree.
    async fn reputations(&self) -> Result<Vec<(ReputationKey, ReputationValue)>>;

    /// Proof payload for confirming our justification root hash.
    async fn justification_proof(
        &self,
        cycle: Address,
        round: u64,
        index: u64,
    ) -> Result<JustificationProof>;

    /// Next binary search step for our entry.
    async fn binary_search_response(
        &self,
        cycle: Address,
        round: u64,
        index: u64,
        entry: &DisputeEntry,
    ) -> Result<BinarySearchResponse>;

    /// Proof of where our binary search ended.
    async fn binary_search_result(
        &self,
        cycle: Address,
        round: u64,
        index: u64,
        entry: &DisputeEntry,
    ) -> Result<BinarySearchResult>;

    /// Proof of the disputed update.
    async fn challenge_response(
        &self,
        cycle: Address,
        round: u64,
        index: u64,
        entry: &DisputeEntry,
    ) -> Result<ChallengeResponse>;
}
