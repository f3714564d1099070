//! Chain gateway interface.
//!
//! The gateway is the miner's only view of the remote ledger: typed reads of
//! the mining cycle contracts, transaction submission, and the two event
//! streams the coordinator consumes.

use crate::engine::{BinarySearchResponse, BinarySearchResult, ChallengeResponse, JustificationProof};
use crate::error::Result;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use repminer_types::{BlockHeader, CycleCompleted, DisputeEntry, Submission};
use tokio::sync::mpsc;

/// Event streams exposed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// New block notifications.
    NewBlock,
    /// Reputation mining cycle completion logs.
    CycleComplete,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::NewBlock => write!(f, "block"),
            Topic::CycleComplete => write!(f, "ReputationMiningCycleComplete"),
        }
    }
}

/// A state-changing call against the active mining cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleCall {
    /// Submit our root hash for an eligible entry.
    SubmitRootHash {
        /// Proposed root hash.
        new_hash: B256,
        /// Node count of the proposed tree.
        n_nodes: U256,
        /// Justification root hash.
        jrh: B256,
        /// Entry index being used.
        entry_index: u64,
    },
    /// Invalidate the submission at `(round, index)`.
    InvalidateHash {
        /// Dispute round.
        round: u64,
        /// Index within the round.
        index: u64,
    },
    /// Confirm our justification root hash.
    ConfirmJustificationRootHash {
        /// Dispute round.
        round: u64,
        /// Our index within the round.
        index: u64,
        /// Proof payload.
        proof: JustificationProof,
    },
    /// Take one binary search step.
    RespondToBinarySearchForChallenge {
        /// Dispute round.
        round: u64,
        /// Our index within the round.
        index: u64,
        /// Response payload.
        response: BinarySearchResponse,
    },
    /// Confirm where the binary search ended.
    ConfirmBinarySearchResult {
        /// Dispute round.
        round: u64,
        /// Our index within the round.
        index: u64,
        /// Result payload.
        result: BinarySearchResult,
    },
    /// Prove the disputed update.
    RespondToChallenge {
        /// Dispute round.
        round: u64,
        /// Our index within the round.
        index: u64,
        /// Challenge payload.
        response: ChallengeResponse,
    },
    /// Confirm the last hash standing.
    ConfirmNewHash {
        /// Round holding the surviving hash.
        round: u64,
    },
}

impl CycleCall {
    /// Contract method name, used in logs.
    pub fn method(&self) -> &'static str {
        match self {
            CycleCall::SubmitRootHash { .. } => "submitRootHash",
            CycleCall::InvalidateHash { .. } => "invalidateHash",
            CycleCall::ConfirmJustificationRootHash { .. } => "confirmJustificationRootHash",
            CycleCall::RespondToBinarySearchForChallenge { .. } => {
                "respondToBinarySearchForChallenge"
            }
            CycleCall::ConfirmBinarySearchResult { .. } => "confirmBinarySearchResult",
            CycleCall::RespondToChallenge { .. } => "respondToChallenge",
            CycleCall::ConfirmNewHash { .. } => "confirmNewHash",
        }
    }
}

/// A fully priced transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Mining cycle contract the call targets.
    pub to: Address,
    /// The call.
    pub call: CycleCall,
    /// Gas price in wei.
    pub gas_price: U256,
    /// Gas limit.
    pub gas_limit: U256,
}

/// Receipt of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub hash: B256,
    /// Block the transaction was mined in.
    pub block_number: u64,
    /// Whether execution succeeded.
    pub success: bool,
}

/// Read/write access to the remote ledger.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Subscribes to new block numbers.
    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<u64>>;

    /// Subscribes to cycle completion logs.
    async fn subscribe_cycle_complete(&self) -> Result<mpsc::Receiver<CycleCompleted>>;

    /// Removes every listener registered for `topic`.
    fn remove_listeners(&self, topic: Topic);

    /// Number of listeners currently registered for `topic`.
    fn listener_count(&self, topic: Topic) -> usize;

    /// Fetches a block header.
    async fn block(&self, number: u64) -> Result<BlockHeader>;

    /// Address of the cycle currently accepting submissions.
    async fn active_cycle(&self) -> Result<Address>;

    /// Address of the cycle currently collecting reputation updates.
    async fn inactive_cycle(&self) -> Result<Address>;

    /// Root hash most recently confirmed on the ledger.
    async fn reputation_root_hash(&self) -> Result<B256>;

    /// Stake locked by `miner`.
    async fn staked_balance(&self, miner: Address) -> Result<U256>;

    /// Timestamp at which the cycle's submission window opened.
    async fn window_open_timestamp(&self, cycle: Address) -> Result<u64>;

    /// Number of unique hashes submitted to the cycle.
    async fn n_unique_submitted_hashes(&self, cycle: Address) -> Result<u64>;

    /// Number of submitted hashes that have been invalidated.
    async fn n_invalidated_hashes(&self, cycle: Address) -> Result<u64>;

    /// Number of submissions made for a (hash, nNodes, jrh) triple.
    async fn n_submissions_for_hash(
        &self,
        cycle: Address,
        hash: B256,
        n_nodes: U256,
        jrh: B256,
    ) -> Result<u64>;

    /// Whether `miner` already used `entry_index` for `hash`.
    async fn entry_submitted(
        &self,
        cycle: Address,
        miner: Address,
        entry_index: u64,
        hash: B256,
    ) -> Result<bool>;

    /// Number of dispute rounds opened so far.
    async fn n_dispute_rounds(&self, cycle: Address) -> Result<u64>;

    /// Entries of one dispute round.
    async fn dispute_round(&self, cycle: Address, round: u64) -> Result<Vec<DisputeEntry>>;

    /// Submission recorded for `submitter`; the zero value if none.
    async fn submission(&self, cycle: Address, submitter: Address) -> Result<Submission>;

    /// Whether every pairing in `round` has been resolved.
    async fn challenge_round_complete(&self, cycle: Address, round: u64) -> Result<bool>;

    /// Estimates the gas a call would use.
    async fn estimate_gas(&self, cycle: Address, call: &CycleCall) -> Result<U256>;

    /// Signs and sends a transaction, waiting for it to be mined.
    async fn send_transaction(&self, request: TransactionRequest) -> Result<TransactionReceipt>;
}
