//! Pass coordination.
//!
//! Two event streams mutate the miner's progress: new blocks, which drive
//! the dispute state machine, and cycle completions, which rebuild the tree
//! and the slot list. The [`Coordinator`] makes sure at most one of those
//! passes runs at a time.
//!
//! # Gate
//!
//! The pass locks live in a `watch` channel. Taking a lock is a single
//! check-and-set inside [`watch::Sender::send_if_modified`], done before the
//! pass reaches its first `.await`, so two passes can never both observe the
//! gate as free. Releasing a lock notifies everyone waiting on the channel.
//!
//! # Policy
//!
//! - A block tick that finds either lock held is dropped, not queued. Ticks
//!   re-derive everything from the ledger, so the next one catches up.
//! - A cycle completion that finds the log lock held is a duplicate: it is
//!   logged and ignored.
//! - A cycle completion that finds the block lock held takes the log lock
//!   (blocking further ticks) and waits for the block pass to finish.

use crate::dispute::{decide_action, Action, LedgerSnapshot};
use crate::engine::ReputationEngine;
use crate::error::{MiningError, Result};
use crate::gateway::{ChainGateway, Topic};
use crate::scheduler::{compute_eligible_slots, SlotInputs};
use crate::transaction::{prepare_call, GasPrice, GasPriceOracle, TransactionSender};
use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use repminer_types::{CycleCompleted, SubmissionSlot, MINING_CYCLE_DURATION};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Stake required per entry index: 2000 tokens with 18 decimals.
pub fn default_minimum_stake() -> U256 {
    U256::from(2_000u64) * U256::from(10u64).pow(U256::from(18u64))
}

/// Parameters of the mining loop.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Address this client mines as.
    pub miner: Address,
    /// Stake required per entry index.
    pub minimum_stake: U256,
    /// Cycle length in seconds.
    pub cycle_duration: u64,
    /// Treat a failed block pass as fatal.
    pub exit_on_error: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            miner: Address::ZERO,
            minimum_stake: default_minimum_stake(),
            cycle_duration: MINING_CYCLE_DURATION,
            exit_on_error: false,
        }
    }
}

/// State of the pass locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassState {
    /// A block pass is running.
    pub locked_for_block_processing: bool,
    /// A log pass is running.
    pub locked_for_log_processing: bool,
    /// Shutdown has begun; no new passes start.
    pub closed: bool,
}

impl PassState {
    /// Returns true if neither pass is running.
    pub fn idle(&self) -> bool {
        !self.locked_for_block_processing && !self.locked_for_log_processing
    }
}

/// Result of offering a block tick to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Another pass held the gate; the tick was dropped.
    Skipped,
    /// The pass ran and took `Action`.
    Completed(Action),
    /// The pass failed and the error was logged.
    Failed,
}

/// Read-only view of the miner's progress through the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressView {
    /// Slots already used.
    pub submission_index: usize,
    /// The cycle's slot list.
    pub best12_submissions: Vec<SubmissionSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Block,
    Log,
}

enum Acquire<'a> {
    Acquired(PassGuard<'a>),
    Busy,
    Closed,
}

/// Releases a pass lock when dropped.
struct PassGuard<'a> {
    gate: &'a watch::Sender<PassState>,
    pass: Pass,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        let pass = self.pass;
        self.gate.send_modify(|state| match pass {
            Pass::Block => state.locked_for_block_processing = false,
            Pass::Log => state.locked_for_log_processing = false,
        });
    }
}

#[derive(Debug, Default)]
struct ClientProgress {
    submission_index: usize,
    best12_submissions: Vec<SubmissionSlot>,
    gas_price: GasPrice,
}

/// Serializes block and log passes over the miner's progress.
pub struct Coordinator<G: ?Sized, E: ?Sized> {
    config: MinerConfig,
    gateway: Arc<G>,
    engine: Arc<E>,
    gas_oracle: Arc<dyn GasPriceOracle>,
    sender: TransactionSender<G>,
    gate: watch::Sender<PassState>,
    progress: Mutex<ClientProgress>,
}

impl<G, E> Coordinator<G, E>
where
    G: ChainGateway + ?Sized + 'static,
    E: ReputationEngine + ?Sized + 'static,
{
    /// Creates a coordinator with an empty slot list.
    pub fn new(
        config: MinerConfig,
        gateway: Arc<G>,
        engine: Arc<E>,
        gas_oracle: Arc<dyn GasPriceOracle>,
    ) -> Self {
        let (gate, _) = watch::channel(PassState::default());
        Self {
            config,
            sender: TransactionSender::new(gateway.clone()),
            gateway,
            engine,
            gas_oracle,
            gate,
            progress: Mutex::new(ClientProgress::default()),
        }
    }

    /// Current state of the pass locks.
    pub fn pass_state(&self) -> PassState {
        *self.gate.borrow()
    }

    /// Watches the pass locks.
    pub fn subscribe_pass_state(&self) -> watch::Receiver<PassState> {
        self.gate.subscribe()
    }

    /// Snapshot of the miner's progress.
    pub fn progress(&self) -> ProgressView {
        let progress = self.progress.lock();
        ProgressView {
            submission_index: progress.submission_index,
            best12_submissions: progress.best12_submissions.clone(),
        }
    }

    fn try_acquire(&self, pass: Pass) -> Acquire<'_> {
        let mut closed = false;
        let acquired = self.gate.send_if_modified(|state| {
            if state.closed {
                closed = true;
                return false;
            }
            match pass {
                Pass::Block => {
                    if state.locked_for_block_processing || state.locked_for_log_processing {
                        return false;
                    }
                    state.locked_for_block_processing = true;
                }
                Pass::Log => {
                    if state.locked_for_log_processing {
                        return false;
                    }
                    state.locked_for_log_processing = true;
                }
            }
            true
        });

        if acquired {
            Acquire::Acquired(PassGuard {
                gate: &self.gate,
                pass,
            })
        } else if closed {
            Acquire::Closed
        } else {
            Acquire::Busy
        }
    }

    /// Runs a block pass for `block_number` unless another pass is running.
    ///
    /// Errors are logged and swallowed unless the coordinator is configured
    /// to exit on error, in which case [`MiningError::Fatal`] is returned.
    pub async fn on_block(&self, block_number: u64) -> Result<BlockOutcome> {
        let _guard = match self.try_acquire(Pass::Block) {
            Acquire::Acquired(guard) => guard,
            Acquire::Busy | Acquire::Closed => {
                tracing::debug!(block = block_number, "pass in progress, skipping block");
                return Ok(BlockOutcome::Skipped);
            }
        };

        match self.block_pass(block_number).await {
            Ok(action) => Ok(BlockOutcome::Completed(action)),
            Err(e) => {
                tracing::error!(block = block_number, error = %e, "error during block checks");
                if self.config.exit_on_error {
                    return Err(MiningError::Fatal(e.to_string()));
                }
                Ok(BlockOutcome::Failed)
            }
        }
    }

    async fn block_pass(&self, block_number: u64) -> Result<Action> {
        let block = self.gateway.block(block_number).await?;
        let cycle = self.gateway.active_cycle().await?;
        let gas_price = self.current_gas_price().await;
        let proposal = self.engine.proposal().await?;

        let next_slot = {
            let progress = self.progress.lock();
            progress
                .best12_submissions
                .get(progress.submission_index)
                .copied()
        };

        let snapshot = LedgerSnapshot::fetch(
            &*self.gateway,
            cycle,
            self.config.miner,
            block.timestamp,
            self.config.cycle_duration,
            &proposal,
            next_slot.as_ref(),
        )
        .await?;

        let action = decide_action(&snapshot, next_slot.as_ref());
        if action == Action::NoAction {
            return Ok(action);
        }

        // Progress moves before the transaction is sent: a rejected
        // submission still consumes its slot.
        {
            let mut progress = self.progress.lock();
            match action {
                Action::Submit { .. } => progress.submission_index += 1,
                Action::ConfirmFinalHash { .. } => {
                    progress.best12_submissions.clear();
                    progress.submission_index = 0;
                }
                _ => {}
            }
        }

        tracing::info!(
            block = block.number,
            timestamp = block.timestamp,
            action = action.name(),
            ?action,
            "taking action"
        );

        if let Some(call) = prepare_call(&*self.engine, &snapshot, &proposal, action).await? {
            self.sender.send(cycle, call, gas_price).await?;
        }

        Ok(action)
    }

    async fn current_gas_price(&self) -> U256 {
        let cached = self.progress.lock().gas_price;
        if !cached.is_stale(Instant::now()) {
            return cached.price;
        }

        let fresh = GasPrice::refresh(&*self.gas_oracle).await;
        self.progress.lock().gas_price = fresh;
        tracing::debug!(gas_price = %fresh.price, "updated gas price");
        fresh.price
    }

    /// Processes a cycle completion: applies the new log, persists the tree
    /// and recomputes the slot list.
    ///
    /// Returns `false` if the event was ignored.
    pub async fn on_cycle_complete(&self, event: CycleCompleted) -> Result<bool> {
        let _guard = match self.try_acquire(Pass::Log) {
            Acquire::Acquired(guard) => guard,
            Acquire::Busy => {
                tracing::warn!(
                    hash = %event.hash,
                    "cycle completion received while already processing a log, ignoring"
                );
                return Ok(false);
            }
            Acquire::Closed => return Ok(false),
        };

        self.wait_for(|state| !state.locked_for_block_processing)
            .await?;

        tracing::info!(
            hash = %event.hash,
            n_nodes = %event.n_nodes,
            block = event.block_number,
            "mining cycle complete, processing reputation log"
        );

        let cycle = self.gateway.active_cycle().await?;
        self.engine.apply_pending_log(cycle).await?;
        self.engine.persist_state().await?;
        self.recompute_slots().await?;

        Ok(true)
    }

    /// Recomputes the slot list under the log lock.
    ///
    /// Used at start-up, before block ticks are flowing.
    pub async fn reload_slots(&self) -> Result<()> {
        let _guard = match self.try_acquire(Pass::Log) {
            Acquire::Acquired(guard) => guard,
            Acquire::Busy => {
                tracing::warn!("log pass in progress, slot list not reloaded");
                return Ok(());
            }
            Acquire::Closed => return Ok(()),
        };

        self.wait_for(|state| !state.locked_for_block_processing)
            .await?;
        self.recompute_slots().await
    }

    async fn recompute_slots(&self) -> Result<()> {
        let inputs = SlotInputs::fetch(
            &*self.gateway,
            &*self.engine,
            self.config.miner,
            self.config.minimum_stake,
            self.config.cycle_duration,
        )
        .await?;
        let slots = compute_eligible_slots(&inputs)?;

        tracing::info!(
            root_hash = %inputs.root_hash,
            slots = slots.len(),
            next_eligible = slots.first().map(|s| s.eligible_timestamp),
            "submission slots recomputed"
        );

        let mut progress = self.progress.lock();
        progress.best12_submissions = slots;
        progress.submission_index = 0;
        Ok(())
    }

    async fn wait_for(&self, ready: impl FnMut(&PassState) -> bool) -> Result<()> {
        let mut rx = self.gate.subscribe();
        rx.wait_for(ready)
            .await
            .map(|_| ())
            .map_err(|_| MiningError::ChannelClosed)
    }

    /// Stops the coordinator.
    ///
    /// New passes are refused, both listeners are removed from the gateway,
    /// and the call returns once any in-flight pass has finished.
    pub async fn shutdown(&self) {
        self.gate.send_modify(|state| state.closed = true);
        self.release_listeners();

        if self.wait_for(PassState::idle).await.is_err() {
            tracing::error!("pass state channel closed during shutdown");
        }

        tracing::info!("coordinator stopped");
    }

    fn release_listeners(&self) {
        for topic in [Topic::NewBlock, Topic::CycleComplete] {
            self.gateway.remove_listeners(topic);
            let remaining = self.gateway.listener_count(topic);
            if remaining != 0 {
                tracing::error!(
                    %topic,
                    remaining,
                    "listener not removed on shutdown"
                );
            }
        }
    }

    /// Drives the coordinator from the two event streams until shutdown.
    ///
    /// Every event is handed to its own task, which first tries the gate;
    /// a busy gate therefore drops block ticks rather than queueing them.
    /// Returns [`MiningError::Fatal`] when a block pass fails in fail-fast
    /// mode, after removing the listeners and letting running passes finish.
    pub async fn run(
        self: Arc<Self>,
        mut blocks: mpsc::Receiver<u64>,
        mut cycles: mpsc::Receiver<CycleCompleted>,
    ) -> Result<()> {
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<MiningError>();
        let mut closed_rx = self.gate.subscribe();
        let mut passes = JoinSet::new();
        let mut blocks_open = true;
        let mut cycles_open = true;

        tracing::info!(miner = %self.config.miner, "coordinator running");

        while blocks_open || cycles_open {
            tokio::select! {
                Some(err) = fatal_rx.recv() => {
                    self.gate.send_modify(|state| state.closed = true);
                    self.release_listeners();
                    while passes.join_next().await.is_some() {}
                    return Err(err);
                }
                block = blocks.recv(), if blocks_open => match block {
                    Some(number) => {
                        let this = self.clone();
                        let fatal_tx = fatal_tx.clone();
                        passes.spawn(async move {
                            if let Err(e) = this.on_block(number).await {
                                let _ = fatal_tx.send(e);
                            }
                        });
                    }
                    None => blocks_open = false,
                },
                event = cycles.recv(), if cycles_open => match event {
                    Some(event) => {
                        let this = self.clone();
                        passes.spawn(async move {
                            if let Err(e) = this.on_cycle_complete(event).await {
                                tracing::error!(error = %e, "error processing reputation log");
                            }
                        });
                    }
                    None => cycles_open = false,
                },
                Some(_) = passes.join_next(), if !passes.is_empty() => {}
                _ = async { closed_rx.wait_for(|state| state.closed).await.map(|_| ()) } => break,
            }
        }

        while passes.join_next().await.is_some() {}

        // A fatal error from the last passes still counts.
        if let Ok(err) = fatal_rx.try_recv() {
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CycleCall;
    use crate::testing::{MemoryEngine, MemoryLedger};
    use crate::transaction::FixedGasPrice;
    use alloy_primitives::B256;
    use repminer_types::{DisputeEntry, Submission};
    use std::time::Duration;

    const MINER: Address = Address::repeat_byte(0xaa);

    fn coordinator(
        ledger: &Arc<MemoryLedger>,
        engine: &Arc<MemoryEngine>,
        exit_on_error: bool,
    ) -> Arc<Coordinator<MemoryLedger, MemoryEngine>> {
        let config = MinerConfig {
            miner: MINER,
            exit_on_error,
            ..Default::default()
        };
        Arc::new(Coordinator::new(
            config,
            ledger.clone(),
            engine.clone(),
            Arc::new(FixedGasPrice::default()),
        ))
    }

    fn staked_ledger(units: u64) -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_stake(MINER, U256::from(units) * default_minimum_stake());
        ledger
    }

    #[tokio::test]
    async fn test_reload_slots_resets_index() {
        let ledger = staked_ledger(20);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);

        coordinator.reload_slots().await.unwrap();
        let progress = coordinator.progress();
        assert_eq!(progress.best12_submissions.len(), 12);
        assert_eq!(progress.submission_index, 0);
        assert!(coordinator.pass_state().idle());
    }

    #[tokio::test]
    async fn test_block_pass_submits_due_slot_and_advances_index() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);
        coordinator.reload_slots().await.unwrap();

        let first = coordinator.progress().best12_submissions[0];
        ledger.set_time(first.eligible_timestamp);

        let outcome = coordinator.on_block(1).await.unwrap();
        assert_eq!(
            outcome,
            BlockOutcome::Completed(Action::Submit {
                entry_index: first.entry_index
            })
        );
        assert_eq!(coordinator.progress().submission_index, 1);

        let sent = ledger.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert!(matches!(
            sent[0].call,
            CycleCall::SubmitRootHash { entry_index, .. } if entry_index == first.entry_index
        ));
    }

    #[tokio::test]
    async fn test_rejected_submission_still_advances_index() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);
        coordinator.reload_slots().await.unwrap();

        let first = coordinator.progress().best12_submissions[0];
        ledger.set_time(first.eligible_timestamp);
        ledger.revert_next_transaction();

        assert_eq!(coordinator.on_block(1).await.unwrap(), BlockOutcome::Failed);
        assert_eq!(coordinator.progress().submission_index, 1);
    }

    #[tokio::test]
    async fn test_one_action_per_tick() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);
        coordinator.reload_slots().await.unwrap();

        // Every slot is due and the opponent has timed out; only the
        // submission goes out on this tick.
        let last = *coordinator.progress().best12_submissions.last().unwrap();
        ledger.set_time(last.eligible_timestamp + 10_000);
        ledger.set_counts(2, 0);
        let ours = engine.proposal().await.unwrap();
        ledger.set_submission(MINER, ours);
        ledger.set_submission(
            Address::repeat_byte(0xbb),
            Submission {
                proposed_new_root_hash: B256::repeat_byte(0x99),
                ..ours
            },
        );
        ledger.set_dispute_round(
            0,
            vec![
                DisputeEntry {
                    first_submitter: MINER,
                    ..Default::default()
                },
                DisputeEntry {
                    first_submitter: Address::repeat_byte(0xbb),
                    ..Default::default()
                },
            ],
        );

        let outcome = coordinator.on_block(1).await.unwrap();
        assert!(matches!(
            outcome,
            BlockOutcome::Completed(Action::Submit { .. })
        ));
        assert_eq!(ledger.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_block_skipped_while_log_pass_running() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        engine.set_apply_delay(Duration::from_millis(200));
        let coordinator = coordinator(&ledger, &engine, false);

        let log_pass = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .on_cycle_complete(CycleCompleted {
                        hash: B256::repeat_byte(0x01),
                        n_nodes: U256::from(1),
                        block_number: 1,
                    })
                    .await
            })
        };

        let mut state = coordinator.subscribe_pass_state();
        state
            .wait_for(|s| s.locked_for_log_processing)
            .await
            .unwrap();

        assert_eq!(coordinator.on_block(2).await.unwrap(), BlockOutcome::Skipped);
        assert!(ledger.sent_transactions().is_empty());

        assert!(log_pass.await.unwrap().unwrap());
        assert_eq!(engine.applied_logs(), 1);
        assert_eq!(engine.persist_count(), 1);
        assert!(coordinator.pass_state().idle());
    }

    #[tokio::test]
    async fn test_duplicate_cycle_complete_ignored() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        engine.set_apply_delay(Duration::from_millis(200));
        let coordinator = coordinator(&ledger, &engine, false);

        let event = CycleCompleted {
            hash: B256::repeat_byte(0x01),
            n_nodes: U256::from(1),
            block_number: 1,
        };
        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.on_cycle_complete(event).await })
        };

        let mut state = coordinator.subscribe_pass_state();
        state
            .wait_for(|s| s.locked_for_log_processing)
            .await
            .unwrap();

        assert!(!coordinator.on_cycle_complete(event).await.unwrap());
        assert!(first.await.unwrap().unwrap());
        assert_eq!(engine.applied_logs(), 1);
    }

    #[tokio::test]
    async fn test_log_pass_waits_for_block_pass() {
        let ledger = staked_ledger(3);
        ledger.set_block_delay(Duration::from_millis(200));
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);

        let block_pass = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.on_block(1).await })
        };
        let mut state = coordinator.subscribe_pass_state();
        state
            .wait_for(|s| s.locked_for_block_processing)
            .await
            .unwrap();

        let log_pass = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .on_cycle_complete(CycleCompleted {
                        hash: B256::repeat_byte(0x01),
                        n_nodes: U256::from(1),
                        block_number: 1,
                    })
                    .await
            })
        };

        state
            .wait_for(|s| s.locked_for_log_processing)
            .await
            .unwrap();
        assert_eq!(engine.applied_logs(), 0);

        assert!(matches!(
            block_pass.await.unwrap().unwrap(),
            BlockOutcome::Completed(_)
        ));
        assert!(log_pass.await.unwrap().unwrap());
        assert_eq!(engine.applied_logs(), 1);
    }

    #[tokio::test]
    async fn test_failed_pass_is_swallowed_or_fatal() {
        let ledger = staked_ledger(3);
        ledger.fail_reads(true);
        let engine = Arc::new(MemoryEngine::new());

        let lenient = coordinator(&ledger, &engine, false);
        assert_eq!(lenient.on_block(1).await.unwrap(), BlockOutcome::Failed);
        assert!(lenient.pass_state().idle());

        let strict = coordinator(&ledger, &engine, true);
        assert!(matches!(
            strict.on_block(1).await,
            Err(MiningError::Fatal(_))
        ));
        assert!(strict.pass_state().idle());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_pass() {
        let ledger = staked_ledger(3);
        ledger.set_block_delay(Duration::from_millis(300));
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);

        let block_pass = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.on_block(1).await })
        };
        let mut state = coordinator.subscribe_pass_state();
        state
            .wait_for(|s| s.locked_for_block_processing)
            .await
            .unwrap();

        coordinator.shutdown().await;
        assert!(coordinator.pass_state().idle());
        assert!(matches!(
            block_pass.await.unwrap().unwrap(),
            BlockOutcome::Completed(_)
        ));

        // Nothing starts once shutdown has begun.
        assert_eq!(coordinator.on_block(2).await.unwrap(), BlockOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_shutdown_flags_leaked_listeners() {
        let ledger = staked_ledger(1);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);

        let _blocks = ledger.subscribe_blocks().await.unwrap();
        let _cycles = ledger.subscribe_cycle_complete().await.unwrap();
        ledger.leak_listeners(true);

        // Completes even though the gateway keeps its listeners.
        coordinator.shutdown().await;
        assert_eq!(ledger.listener_count(Topic::NewBlock), 1);
        assert!(coordinator.pass_state().closed);
    }

    #[tokio::test]
    async fn test_run_dispatches_events_and_stops_on_shutdown() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, false);
        coordinator.reload_slots().await.unwrap();

        let blocks = ledger.subscribe_blocks().await.unwrap();
        let cycles = ledger.subscribe_cycle_complete().await.unwrap();
        let runner = tokio::spawn(coordinator.clone().run(blocks, cycles));

        let first = coordinator.progress().best12_submissions[0];
        ledger.set_time(first.eligible_timestamp);
        ledger.emit_block(1).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while ledger.sent_transactions().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        coordinator.shutdown().await;
        runner.await.unwrap().unwrap();
        assert_eq!(ledger.listener_count(Topic::NewBlock), 0);
    }

    #[tokio::test]
    async fn test_run_returns_fatal_error() {
        let ledger = staked_ledger(3);
        ledger.fail_reads(true);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, true);

        let blocks = ledger.subscribe_blocks().await.unwrap();
        let cycles = ledger.subscribe_cycle_complete().await.unwrap();
        let runner = tokio::spawn(coordinator.clone().run(blocks, cycles));

        ledger.emit_block(1).await;
        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(MiningError::Fatal(_))));
        assert!(coordinator.pass_state().closed);
    }

    #[tokio::test]
    async fn test_fatal_run_finishes_waiting_log_pass_and_removes_listeners() {
        let ledger = staked_ledger(3);
        let engine = Arc::new(MemoryEngine::new());
        let coordinator = coordinator(&ledger, &engine, true);
        coordinator.reload_slots().await.unwrap();

        let first = coordinator.progress().best12_submissions[0];
        ledger.set_time(first.eligible_timestamp);
        ledger.revert_next_transaction();
        ledger.set_block_delay(Duration::from_millis(200));

        let blocks = ledger.subscribe_blocks().await.unwrap();
        let cycles = ledger.subscribe_cycle_complete().await.unwrap();
        let runner = tokio::spawn(coordinator.clone().run(blocks, cycles));

        let mut state = coordinator.subscribe_pass_state();
        ledger.emit_block(1).await;
        state
            .wait_for(|s| s.locked_for_block_processing)
            .await
            .unwrap();
        ledger
            .emit_cycle_complete(CycleCompleted {
                hash: B256::repeat_byte(0x01),
                n_nodes: U256::from(1),
                block_number: 1,
            })
            .await;
        state
            .wait_for(|s| s.locked_for_log_processing)
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(MiningError::Fatal(_))));
        assert_eq!(engine.applied_logs(), 1);
        assert!(coordinator.pass_state().idle());
        assert_eq!(ledger.listener_count(Topic::NewBlock), 0);
        assert_eq!(ledger.listener_count(Topic::CycleComplete), 0);
    }
}
