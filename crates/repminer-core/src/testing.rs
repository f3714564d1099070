//! In-memory ledger and reputation engine.
//!
//! Both doubles keep their state behind a `parking_lot` mutex and expose
//! setters for every value the miner reads, so tests can stage any point of
//! a mining cycle without a chain.

use crate::engine::{
    BinarySearchResponse, BinarySearchResult, ChallengeResponse, JustificationProof,
    ReputationEngine,
};
use crate::error::{MiningError, Result};
use crate::gateway::{ChainGateway, CycleCall, Topic, TransactionReceipt, TransactionRequest};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use repminer_types::{
    BlockHeader, CycleCompleted, DisputeEntry, ReputationKey, ReputationProof, ReputationValue,
    Submission,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;

/// Window-open timestamp of the default active cycle.
pub const DEFAULT_WINDOW_OPEN: u64 = 1_700_000_000;

const LISTENER_CAPACITY: usize = 64;

#[derive(Debug)]
struct LedgerState {
    time: u64,
    active_cycle: Address,
    inactive_cycle: Address,
    reputation_root_hash: B256,
    stakes: HashMap<Address, U256>,
    window_open_timestamp: u64,
    n_unique_submitted_hashes: u64,
    n_invalidated_hashes: u64,
    submissions: HashMap<Address, Submission>,
    submissions_for_hash: HashMap<(B256, U256, B256), u64>,
    used_entries: HashSet<(Address, u64, B256)>,
    rounds: Vec<Vec<DisputeEntry>>,
    completed_rounds: HashSet<u64>,
    gas_estimate: U256,
    revert_next: bool,
    sent: Vec<TransactionRequest>,
    block_listeners: Vec<mpsc::Sender<u64>>,
    cycle_listeners: Vec<mpsc::Sender<CycleCompleted>>,
    leak_listeners: bool,
    block_delay: Option<Duration>,
    fail_reads: bool,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            time: DEFAULT_WINDOW_OPEN,
            active_cycle: Address::repeat_byte(0xc1),
            inactive_cycle: Address::repeat_byte(0xc2),
            reputation_root_hash: B256::ZERO,
            stakes: HashMap::new(),
            window_open_timestamp: DEFAULT_WINDOW_OPEN,
            n_unique_submitted_hashes: 0,
            n_invalidated_hashes: 0,
            submissions: HashMap::new(),
            submissions_for_hash: HashMap::new(),
            used_entries: HashSet::new(),
            rounds: Vec::new(),
            completed_rounds: HashSet::new(),
            gas_estimate: U256::from(250_000u64),
            revert_next: false,
            sent: Vec::new(),
            block_listeners: Vec::new(),
            cycle_listeners: Vec::new(),
            leak_listeners: false,
            block_delay: None,
            fail_reads: false,
        }
    }
}

/// A ledger held in memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    /// Creates a ledger whose active cycle opened at [`DEFAULT_WINDOW_OPEN`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timestamp reported for every block.
    pub fn set_time(&self, timestamp: u64) {
        self.state.lock().time = timestamp;
    }

    /// Sets the active cycle's window-open timestamp.
    pub fn set_window_open(&self, timestamp: u64) {
        self.state.lock().window_open_timestamp = timestamp;
    }

    /// Sets `miner`'s stake.
    pub fn set_stake(&self, miner: Address, amount: U256) {
        self.state.lock().stakes.insert(miner, amount);
    }

    /// Sets the confirmed root hash.
    pub fn set_reputation_root_hash(&self, hash: B256) {
        self.state.lock().reputation_root_hash = hash;
    }

    /// Sets the unique and invalidated hash counts.
    pub fn set_counts(&self, unique: u64, invalidated: u64) {
        let mut state = self.state.lock();
        state.n_unique_submitted_hashes = unique;
        state.n_invalidated_hashes = invalidated;
    }

    /// Records `submission` for `submitter`.
    pub fn set_submission(&self, submitter: Address, submission: Submission) {
        self.state.lock().submissions.insert(submitter, submission);
    }

    /// Replaces the entries of `round`, opening rounds up to it.
    pub fn set_dispute_round(&self, round: u64, entries: Vec<DisputeEntry>) {
        let mut state = self.state.lock();
        let round = round as usize;
        if state.rounds.len() <= round {
            state.rounds.resize(round + 1, Vec::new());
        }
        state.rounds[round] = entries;
    }

    /// Marks `round` as resolved.
    pub fn complete_round(&self, round: u64) {
        self.state.lock().completed_rounds.insert(round);
    }

    /// Sets the submission count for a (hash, nNodes, jrh) triple.
    pub fn set_submissions_for_hash(&self, proposal: &Submission, count: u64) {
        self.state.lock().submissions_for_hash.insert(
            (proposal.proposed_new_root_hash, proposal.n_nodes, proposal.jrh),
            count,
        );
    }

    /// Marks `entry_index` as used by `miner` for `hash`.
    pub fn mark_entry_submitted(&self, miner: Address, entry_index: u64, hash: B256) {
        self.state
            .lock()
            .used_entries
            .insert((miner, entry_index, hash));
    }

    /// Sets the gas estimate returned for every call.
    pub fn set_gas_estimate(&self, gas: U256) {
        self.state.lock().gas_estimate = gas;
    }

    /// Makes the next transaction revert.
    pub fn revert_next_transaction(&self) {
        self.state.lock().revert_next = true;
    }

    /// Every transaction sent so far.
    pub fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.state.lock().sent.clone()
    }

    /// Delays block header reads.
    pub fn set_block_delay(&self, delay: Duration) {
        self.state.lock().block_delay = Some(delay);
    }

    /// Makes every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Makes `remove_listeners` a no-op.
    pub fn leak_listeners(&self, leak: bool) {
        self.state.lock().leak_listeners = leak;
    }

    /// Delivers a block number to every block listener.
    pub async fn emit_block(&self, number: u64) {
        let listeners = self.state.lock().block_listeners.clone();
        for listener in listeners {
            let _ = listener.send(number).await;
        }
    }

    /// Delivers a cycle completion to every cycle listener.
    pub async fn emit_cycle_complete(&self, event: CycleCompleted) {
        let listeners = self.state.lock().cycle_listeners.clone();
        for listener in listeners {
            let _ = listener.send(event).await;
        }
    }

    fn read<T>(&self, f: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(MiningError::Gateway("ledger unavailable".into()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl ChainGateway for MemoryLedger {
    async fn subscribe_blocks(&self) -> Result<mpsc::Receiver<u64>> {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        self.state.lock().block_listeners.push(tx);
        Ok(rx)
    }

    async fn subscribe_cycle_complete(&self) -> Result<mpsc::Receiver<CycleCompleted>> {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        self.state.lock().cycle_listeners.push(tx);
        Ok(rx)
    }

    fn remove_listeners(&self, topic: Topic) {
        let mut state = self.state.lock();
        if state.leak_listeners {
            return;
        }
        match topic {
            Topic::NewBlock => state.block_listeners.clear(),
            Topic::CycleComplete => state.cycle_listeners.clear(),
        }
    }

    fn listener_count(&self, topic: Topic) -> usize {
        let state = self.state.lock();
        match topic {
            Topic::NewBlock => state.block_listeners.len(),
            Topic::CycleComplete => state.cycle_listeners.len(),
        }
    }

    async fn block(&self, number: u64) -> Result<BlockHeader> {
        let delay = self.state.lock().block_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.read(|s| BlockHeader {
            number,
            timestamp: s.time,
        })
    }

    async fn active_cycle(&self) -> Result<Address> {
        self.read(|s| s.active_cycle)
    }

    async fn inactive_cycle(&self) -> Result<Address> {
        self.read(|s| s.inactive_cycle)
    }

    async fn reputation_root_hash(&self) -> Result<B256> {
        self.read(|s| s.reputation_root_hash)
    }

    async fn staked_balance(&self, miner: Address) -> Result<U256> {
        self.read(|s| s.stakes.get(&miner).copied().unwrap_or_default())
    }

    async fn window_open_timestamp(&self, _cycle: Address) -> Result<u64> {
        self.read(|s| s.window_open_timestamp)
    }

    async fn n_unique_submitted_hashes(&self, _cycle: Address) -> Result<u64> {
        self.read(|s| s.n_unique_submitted_hashes)
    }

    async fn n_invalidated_hashes(&self, _cycle: Address) -> Result<u64> {
        self.read(|s| s.n_invalidated_hashes)
    }

    async fn n_submissions_for_hash(
        &self,
        _cycle: Address,
        hash: B256,
        n_nodes: U256,
        jrh: B256,
    ) -> Result<u64> {
        self.read(|s| {
            s.submissions_for_hash
                .get(&(hash, n_nodes, jrh))
                .copied()
                .unwrap_or(0)
        })
    }

    async fn entry_submitted(
        &self,
        _cycle: Address,
        miner: Address,
        entry_index: u64,
        hash: B256,
    ) -> Result<bool> {
        self.read(|s| s.used_entries.contains(&(miner, entry_index, hash)))
    }

    async fn n_dispute_rounds(&self, _cycle: Address) -> Result<u64> {
        self.read(|s| s.rounds.len() as u64)
    }

    async fn dispute_round(&self, _cycle: Address, round: u64) -> Result<Vec<DisputeEntry>> {
        self.read(|s| s.rounds.get(round as usize).cloned().unwrap_or_default())
    }

    async fn submission(&self, _cycle: Address, submitter: Address) -> Result<Submission> {
        self.read(|s| s.submissions.get(&submitter).copied().unwrap_or_default())
    }

    async fn challenge_round_complete(&self, _cycle: Address, round: u64) -> Result<bool> {
        self.read(|s| s.completed_rounds.contains(&round))
    }

    async fn estimate_gas(&self, _cycle: Address, _call: &CycleCall) -> Result<U256> {
        self.read(|s| s.gas_estimate)
    }

    async fn send_transaction(&self, request: TransactionRequest) -> Result<TransactionReceipt> {
        let mut state = self.state.lock();
        let success = !std::mem::take(&mut state.revert_next);

        if success {
            if let CycleCall::SubmitRootHash {
                new_hash,
                n_nodes,
                jrh,
                ..
            } = &request.call
            {
                *state
                    .submissions_for_hash
                    .entry((*new_hash, *n_nodes, *jrh))
                    .or_insert(0) += 1;
            }
        }

        state.sent.push(request);
        let nonce = state.sent.len() as u64;
        Ok(TransactionReceipt {
            hash: keccak256(nonce.to_be_bytes()),
            block_number: nonce,
            success,
        })
    }
}

#[derive(Debug)]
struct EngineState {
    root_hash: B256,
    n_nodes: U256,
    jrh: B256,
    reputations: BTreeMap<ReputationKey, ReputationValue>,
    history: HashMap<B256, BTreeMap<ReputationKey, ReputationValue>>,
    pending: Option<(B256, BTreeMap<ReputationKey, ReputationValue>)>,
    saved_root: Option<B256>,
    synced_from: Option<u64>,
    applied_logs: usize,
    persisted: usize,
    apply_delay: Option<Duration>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            root_hash: B256::repeat_byte(0x11),
            n_nodes: U256::from(4u64),
            jrh: B256::repeat_byte(0x22),
            reputations: BTreeMap::new(),
            history: HashMap::new(),
            pending: None,
            saved_root: None,
            synced_from: None,
            applied_logs: 0,
            persisted: 0,
            apply_delay: None,
        }
    }
}

/// A reputation engine held in memory.
///
/// Proofs are not real Merkle proofs: the sibling list is the root hash the
/// proof was taken under, which is enough to tell current proofs from
/// historical ones.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<EngineState>,
}

impl MemoryEngine {
    /// Creates an engine with a fixed non-zero root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current root hash and node count.
    pub fn set_root(&self, root_hash: B256, n_nodes: U256) {
        let mut state = self.state.lock();
        state.root_hash = root_hash;
        state.n_nodes = n_nodes;
    }

    /// Sets the justification root hash.
    pub fn set_justification_root_hash(&self, jrh: B256) {
        self.state.lock().jrh = jrh;
    }

    /// Inserts a reputation into the current tree.
    pub fn insert_reputation(&self, key: ReputationKey, value: ReputationValue) {
        self.state.lock().reputations.insert(key, value);
    }

    /// Stages the root that the next applied log produces.
    pub fn queue_root(&self, root_hash: B256) {
        let mut state = self.state.lock();
        let reputations = state.reputations.clone();
        state.pending = Some((root_hash, reputations));
    }

    /// Sets the root returned by `load_state`.
    pub fn set_saved_root(&self, root_hash: Option<B256>) {
        self.state.lock().saved_root = root_hash;
    }

    /// Delays every `apply_pending_log`.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.state.lock().apply_delay = Some(delay);
    }

    /// Number of logs applied.
    pub fn applied_logs(&self) -> usize {
        self.state.lock().applied_logs
    }

    /// Number of times state was persisted.
    pub fn persist_count(&self) -> usize {
        self.state.lock().persisted
    }

    /// Block the last sync started from.
    pub fn synced_from(&self) -> Option<u64> {
        self.state.lock().synced_from
    }

    fn proof_from(
        root_hash: B256,
        reputations: &BTreeMap<ReputationKey, ReputationValue>,
        key: &ReputationKey,
    ) -> Option<ReputationProof> {
        reputations.get(key).map(|value| ReputationProof {
            branch_mask: U256::from(1u8),
            siblings: vec![root_hash],
            key: key.encode(),
            value: value.encode(),
        })
    }
}

#[async_trait]
impl ReputationEngine for MemoryEngine {
    async fn load_state(&self) -> Result<Option<B256>> {
        let mut state = self.state.lock();
        if let Some(root) = state.saved_root {
            state.root_hash = root;
        }
        Ok(state.saved_root)
    }

    async fn sync(&self, from_block: u64) -> Result<()> {
        self.state.lock().synced_from = Some(from_block);
        Ok(())
    }

    async fn root_hash(&self) -> Result<B256> {
        Ok(self.state.lock().root_hash)
    }

    async fn n_nodes(&self) -> Result<U256> {
        Ok(self.state.lock().n_nodes)
    }

    async fn justification_root_hash(&self) -> Result<B256> {
        Ok(self.state.lock().jrh)
    }

    async fn apply_pending_log(&self, _cycle: Address) -> Result<()> {
        let delay = self.state.lock().apply_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some((root_hash, reputations)) = state.pending.take() {
            let previous_root = state.root_hash;
            let previous = std::mem::replace(&mut state.reputations, reputations);
            state.history.insert(previous_root, previous);
            state.root_hash = root_hash;
        }
        state.applied_logs += 1;
        Ok(())
    }

    async fn persist_state(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.saved_root = Some(state.root_hash);
        state.persisted += 1;
        Ok(())
    }

    async fn proof(&self, key: &ReputationKey) -> Result<Option<ReputationProof>> {
        let state = self.state.lock();
        Ok(Self::proof_from(state.root_hash, &state.reputations, key))
    }

    async fn historical_proof(
        &self,
        root_hash: B256,
        key: &ReputationKey,
    ) -> Result<Option<ReputationProof>> {
        let state = self.state.lock();
        Ok(state
            .history
            .get(&root_hash)
            .and_then(|reputations| Self::proof_from(root_hash, reputations, key)))
    }

    async fn reputations(&self) -> Result<Vec<(ReputationKey, ReputationValue)>> {
        let state = self.state.lock();
        Ok(state.reputations.iter().map(|(k, v)| (*k, *v)).collect())
    }

    async fn justification_proof(
        &self,
        _cycle: Address,
        round: u64,
        index: u64,
    ) -> Result<JustificationProof> {
        let state = self.state.lock();
        Ok(JustificationProof {
            branch_mask_1: U256::from(round),
            siblings_1: vec![state.jrh],
            branch_mask_2: U256::from(index),
            siblings_2: vec![state.root_hash],
        })
    }

    async fn binary_search_response(
        &self,
        _cycle: Address,
        _round: u64,
        _index: u64,
        entry: &DisputeEntry,
    ) -> Result<BinarySearchResponse> {
        Ok(BinarySearchResponse {
            jh_intermediate_value: Bytes::copy_from_slice(
                entry.target_hash_during_search.as_slice(),
            ),
            branch_mask: entry.lower_bound,
            siblings: vec![entry.target_hash_during_search],
        })
    }

    async fn binary_search_result(
        &self,
        _cycle: Address,
        _round: u64,
        _index: u64,
        entry: &DisputeEntry,
    ) -> Result<BinarySearchResult> {
        Ok(BinarySearchResult {
            jh_intermediate_value: Bytes::copy_from_slice(
                entry.intermediate_reputation_hash.as_slice(),
            ),
            branch_mask: entry.lower_bound,
            siblings: vec![entry.intermediate_reputation_hash],
        })
    }

    async fn challenge_response(
        &self,
        _cycle: Address,
        _round: u64,
        _index: u64,
        entry: &DisputeEntry,
    ) -> Result<ChallengeResponse> {
        Ok(ChallengeResponse {
            u: vec![entry.lower_bound, entry.upper_bound],
            b32: vec![entry.intermediate_reputation_hash],
            siblings: vec![Vec::new()],
        })
    }
}
