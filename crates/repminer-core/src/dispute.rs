//! Dispute state machine.
//!
//! Nothing about dispute progress is kept locally. Every block the miner
//! re-reads the cycle from the ledger into a [`LedgerSnapshot`] and
//! [`decide_action`] picks at most one step from it. A restarted client
//! therefore resumes exactly where the ledger says it is.

use crate::error::Result;
use crate::gateway::ChainGateway;
use alloy_primitives::{Address, U256};
use repminer_types::{
    DisputeEntry, Submission, SubmissionSlot, MAX_SUBMISSIONS_PER_CYCLE, MINER_RESPONSE_TIMEOUT,
};
use std::collections::HashMap;

/// The single protocol step chosen for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Submit our root hash using `entry_index`.
    Submit {
        /// Entry index of the slot being used.
        entry_index: u64,
    },
    /// Invalidate the submission at `(round, index)`.
    InvalidateOpponent {
        /// Dispute round.
        round: u64,
        /// Opponent's index in the round.
        index: u64,
    },
    /// Confirm our justification root hash.
    ConfirmJustificationRoot {
        /// Dispute round.
        round: u64,
        /// Our index in the round.
        index: u64,
    },
    /// Take the next binary search step.
    RespondToBinarySearch {
        /// Dispute round.
        round: u64,
        /// Our index in the round.
        index: u64,
    },
    /// Confirm where the binary search ended.
    ConfirmBinarySearchResult {
        /// Dispute round.
        round: u64,
        /// Our index in the round.
        index: u64,
    },
    /// Prove the disputed update.
    RespondToChallenge {
        /// Dispute round.
        round: u64,
        /// Our index in the round.
        index: u64,
    },
    /// Confirm the last hash standing.
    ConfirmFinalHash {
        /// Round holding the surviving hash.
        round: u64,
    },
    /// Nothing to do this block.
    NoAction,
}

impl Action {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Submit { .. } => "submit",
            Action::InvalidateOpponent { .. } => "invalidate_opponent",
            Action::ConfirmJustificationRoot { .. } => "confirm_justification_root",
            Action::RespondToBinarySearch { .. } => "respond_to_binary_search",
            Action::ConfirmBinarySearchResult { .. } => "confirm_binary_search_result",
            Action::RespondToChallenge { .. } => "respond_to_challenge",
            Action::ConfirmFinalHash { .. } => "confirm_final_hash",
            Action::NoAction => "none",
        }
    }
}

/// Ledger answers needed to decide whether a due slot may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionCheck {
    /// Submissions already made for our (hash, nNodes, jrh) triple.
    pub submissions_for_hash: u64,
    /// Whether the due entry index was already used for our hash.
    pub entry_submitted: bool,
}

/// The opponent paired with us in the current round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opponent {
    /// Opponent's index in the round.
    pub index: u64,
    /// Opponent's dispute entry.
    pub entry: DisputeEntry,
    /// Opponent's submission.
    pub submission: Submission,
}

/// Where our hash sits in the dispute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisputePosition {
    /// Latest round our hash appears in.
    pub round: u64,
    /// Our index in that round.
    pub index: u64,
    /// Our dispute entry.
    pub entry: DisputeEntry,
    /// The submission record carrying our JRH progress.
    pub submission: Submission,
    /// Our opponent; `None` when the paired slot is empty.
    pub opponent: Option<Opponent>,
    /// Whether the previous round has been resolved (true in round 0).
    pub previous_round_complete: bool,
}

/// Everything the state machine reads from the ledger for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Active mining cycle.
    pub cycle: Address,
    /// Timestamp of the block being processed.
    pub block_timestamp: u64,
    /// When the cycle's submission window opened.
    pub window_open_timestamp: u64,
    /// Cycle length in seconds.
    pub cycle_duration: u64,
    /// Unique hashes submitted this cycle.
    pub n_unique_submitted_hashes: u64,
    /// Hashes invalidated this cycle.
    pub n_invalidated_hashes: u64,
    /// Dispute rounds opened so far.
    pub n_dispute_rounds: u64,
    /// Present only when our next slot is due.
    pub submission_check: Option<SubmissionCheck>,
    /// Present once our hash is in a dispute round.
    pub position: Option<DisputePosition>,
}

impl LedgerSnapshot {
    /// Reads the snapshot for `block_timestamp`.
    ///
    /// `proposal` is the triple we submit; `next_slot` is the slot at our
    /// current submission index, if any remain.
    pub async fn fetch<G>(
        gateway: &G,
        cycle: Address,
        miner: Address,
        block_timestamp: u64,
        cycle_duration: u64,
        proposal: &Submission,
        next_slot: Option<&SubmissionSlot>,
    ) -> Result<Self>
    where
        G: ChainGateway + ?Sized,
    {
        let window_open_timestamp = gateway.window_open_timestamp(cycle).await?;
        let n_unique_submitted_hashes = gateway.n_unique_submitted_hashes(cycle).await?;
        let n_invalidated_hashes = gateway.n_invalidated_hashes(cycle).await?;
        let n_dispute_rounds = gateway.n_dispute_rounds(cycle).await?;

        let submission_check = match next_slot {
            Some(slot) if slot.is_due(block_timestamp) => {
                let submissions_for_hash = gateway
                    .n_submissions_for_hash(
                        cycle,
                        proposal.proposed_new_root_hash,
                        proposal.n_nodes,
                        proposal.jrh,
                    )
                    .await?;
                let entry_submitted = gateway
                    .entry_submitted(
                        cycle,
                        miner,
                        slot.entry_index,
                        proposal.proposed_new_root_hash,
                    )
                    .await?;
                Some(SubmissionCheck {
                    submissions_for_hash,
                    entry_submitted,
                })
            }
            _ => None,
        };

        let position = locate(gateway, cycle, proposal, n_dispute_rounds).await?;

        Ok(Self {
            cycle,
            block_timestamp,
            window_open_timestamp,
            cycle_duration,
            n_unique_submitted_hashes,
            n_invalidated_hashes,
            n_dispute_rounds,
            submission_check,
            position,
        })
    }

    /// Hashes still standing.
    pub fn remaining_hashes(&self) -> u64 {
        self.n_unique_submitted_hashes
            .saturating_sub(self.n_invalidated_hashes)
    }

    /// Whether the submission window has been open a full cycle.
    pub fn window_elapsed(&self) -> bool {
        self.block_timestamp.saturating_sub(self.window_open_timestamp) >= self.cycle_duration
    }
}

/// Finds the latest round holding an entry whose first submitter proposed
/// the same triple as `ours`, together with its opponent.
///
/// The entry need not be our own submission.
async fn locate<G>(
    gateway: &G,
    cycle: Address,
    ours: &Submission,
    n_rounds: u64,
) -> Result<Option<DisputePosition>>
where
    G: ChainGateway + ?Sized,
{
    let mut submissions: HashMap<Address, Submission> = HashMap::new();
    let mut found: Option<(u64, u64, Vec<DisputeEntry>)> = None;

    for round in 0..n_rounds {
        let entries = gateway.dispute_round(cycle, round).await?;
        for (index, entry) in entries.iter().enumerate() {
            let submission = match submissions.get(&entry.first_submitter) {
                Some(s) => *s,
                None => {
                    let s = gateway.submission(cycle, entry.first_submitter).await?;
                    submissions.insert(entry.first_submitter, s);
                    s
                }
            };
            if submission.same_proposal(ours) {
                found = Some((round, index as u64, entries.clone()));
                break;
            }
        }
    }

    let Some((round, index, entries)) = found else {
        return Ok(None);
    };

    let entry = entries[index as usize].clone();
    let submission = submissions
        .get(&entry.first_submitter)
        .copied()
        .unwrap_or_default();

    let opponent_index = index ^ 1;
    let opponent = match entries.get(opponent_index as usize) {
        Some(opp_entry) => {
            let opp_submission = match submissions.get(&opp_entry.first_submitter) {
                Some(s) => *s,
                None => gateway.submission(cycle, opp_entry.first_submitter).await?,
            };
            (!opp_submission.is_empty()).then(|| Opponent {
                index: opponent_index,
                entry: opp_entry.clone(),
                submission: opp_submission,
            })
        }
        None => None,
    };

    let previous_round_complete = if round == 0 {
        true
    } else {
        gateway.challenge_round_complete(cycle, round - 1).await?
    };

    Ok(Some(DisputePosition {
        round,
        index,
        entry,
        submission,
        opponent,
        previous_round_complete,
    }))
}

/// `2^(step - offset)`; zero when the exponent is negative.
fn search_span(step: u64, offset: u64) -> U256 {
    match step.checked_sub(offset) {
        None => U256::ZERO,
        Some(exp) if exp >= 256 => U256::MAX,
        Some(exp) => U256::from(1u8) << (exp as usize),
    }
}

/// Chooses the single action to take for this block.
pub fn decide_action(snapshot: &LedgerSnapshot, next_slot: Option<&SubmissionSlot>) -> Action {
    // Submission phase.
    if let (Some(slot), Some(check)) = (next_slot, snapshot.submission_check) {
        if slot.is_due(snapshot.block_timestamp)
            && check.submissions_for_hash < MAX_SUBMISSIONS_PER_CYCLE as u64
            && !check.entry_submitted
        {
            return Action::Submit {
                entry_index: slot.entry_index,
            };
        }
    }

    // Settlement.
    if snapshot.remaining_hashes() == 1 && snapshot.window_elapsed() {
        return Action::ConfirmFinalHash {
            round: snapshot.n_dispute_rounds.saturating_sub(1),
        };
    }

    if snapshot.remaining_hashes() < 2 {
        return Action::NoAction;
    }
    let Some(position) = &snapshot.position else {
        return Action::NoAction;
    };
    let (round, index) = (position.round, position.index);

    let Some(opponent) = &position.opponent else {
        // Without an opponent we advance by default, once the round allows it.
        if round == 0 && !snapshot.window_elapsed() {
            return Action::NoAction;
        }
        if round > 0 && !position.previous_round_complete {
            return Action::NoAction;
        }
        return Action::InvalidateOpponent {
            round,
            index: index ^ 1,
        };
    };

    let silent_for = snapshot
        .block_timestamp
        .saturating_sub(opponent.entry.last_response_timestamp);
    if silent_for >= MINER_RESPONSE_TIMEOUT {
        return Action::InvalidateOpponent {
            round,
            index: opponent.index,
        };
    }

    let entry = &position.entry;
    let jrh_n_nodes = position.submission.jrh_n_nodes;
    let opp_entry = &opponent.entry;
    let opp_jrh_n_nodes = opponent.submission.jrh_n_nodes;

    if jrh_n_nodes.is_zero() {
        return Action::ConfirmJustificationRoot { round, index };
    }

    if !opp_jrh_n_nodes.is_zero()
        && !entry.search_narrowed()
        && opp_entry.challenge_step_completed >= entry.challenge_step_completed
    {
        return Action::RespondToBinarySearch { round, index };
    }

    if opp_entry.search_narrowed()
        && entry.search_narrowed()
        && search_span(entry.challenge_step_completed, 2) <= jrh_n_nodes
    {
        return Action::ConfirmBinarySearchResult { round, index };
    }

    if search_span(opp_entry.challenge_step_completed, 2) > opp_jrh_n_nodes
        && search_span(entry.challenge_step_completed, 2) > jrh_n_nodes
        && search_span(entry.challenge_step_completed, 3) <= jrh_n_nodes
    {
        return Action::RespondToChallenge { round, index };
    }

    Action::NoAction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryLedger, DEFAULT_WINDOW_OPEN};
    use alloy_primitives::B256;
    use repminer_types::MINING_CYCLE_DURATION;

    const OPEN: u64 = DEFAULT_WINDOW_OPEN;
    const MINER: Address = Address::repeat_byte(0xaa);

    fn submission(tag: u8, jrh_n_nodes: u64) -> Submission {
        Submission {
            proposed_new_root_hash: B256::repeat_byte(tag),
            n_nodes: U256::from(10),
            jrh: B256::repeat_byte(tag.wrapping_add(1)),
            jrh_n_nodes: U256::from(jrh_n_nodes),
        }
    }

    fn entry(step: u64, lower: u64, upper: u64, last_response: u64) -> DisputeEntry {
        DisputeEntry {
            first_submitter: Address::repeat_byte(0x01),
            last_response_timestamp: last_response,
            challenge_step_completed: step,
            lower_bound: U256::from(lower),
            upper_bound: U256::from(upper),
            ..Default::default()
        }
    }

    fn snapshot(now: u64) -> LedgerSnapshot {
        LedgerSnapshot {
            cycle: Address::repeat_byte(0xcc),
            block_timestamp: now,
            window_open_timestamp: OPEN,
            cycle_duration: MINING_CYCLE_DURATION,
            n_unique_submitted_hashes: 2,
            n_invalidated_hashes: 0,
            n_dispute_rounds: 1,
            submission_check: None,
            position: None,
        }
    }

    fn disputed(
        now: u64,
        ours: (DisputeEntry, Submission),
        theirs: (DisputeEntry, Submission),
    ) -> LedgerSnapshot {
        LedgerSnapshot {
            position: Some(DisputePosition {
                round: 0,
                index: 0,
                entry: ours.0,
                submission: ours.1,
                opponent: Some(Opponent {
                    index: 1,
                    entry: theirs.0,
                    submission: theirs.1,
                }),
                previous_round_complete: true,
            }),
            ..snapshot(now)
        }
    }

    fn lone(now: u64, round: u64, previous_round_complete: bool) -> LedgerSnapshot {
        LedgerSnapshot {
            n_dispute_rounds: round + 1,
            position: Some(DisputePosition {
                round,
                index: 2,
                entry: entry(1, 0, 8, now),
                submission: submission(0xaa, 0),
                opponent: None,
                previous_round_complete,
            }),
            ..snapshot(now)
        }
    }

    #[test]
    fn test_submit_when_slot_due() {
        let slot = SubmissionSlot {
            entry_index: 4,
            eligible_timestamp: OPEN + 10,
        };
        let mut snap = snapshot(OPEN + 10);
        snap.submission_check = Some(SubmissionCheck {
            submissions_for_hash: 11,
            entry_submitted: false,
        });
        assert_eq!(
            decide_action(&snap, Some(&slot)),
            Action::Submit { entry_index: 4 }
        );
    }

    #[test]
    fn test_no_submit_before_slot_or_when_full() {
        let slot = SubmissionSlot {
            entry_index: 4,
            eligible_timestamp: OPEN + 10,
        };
        let check = SubmissionCheck {
            submissions_for_hash: 0,
            entry_submitted: false,
        };

        let mut early = snapshot(OPEN + 9);
        early.submission_check = Some(check);
        assert_eq!(decide_action(&early, Some(&slot)), Action::NoAction);

        let mut full = snapshot(OPEN + 10);
        full.submission_check = Some(SubmissionCheck {
            submissions_for_hash: 12,
            ..check
        });
        assert_eq!(decide_action(&full, Some(&slot)), Action::NoAction);

        let mut used = snapshot(OPEN + 10);
        used.submission_check = Some(SubmissionCheck {
            entry_submitted: true,
            ..check
        });
        assert_eq!(decide_action(&used, Some(&slot)), Action::NoAction);
    }

    #[test]
    fn test_confirm_final_hash_ignores_dispute_fields() {
        let now = OPEN + MINING_CYCLE_DURATION;
        let mut snap = disputed(
            now,
            (entry(2, 0, 8, now), submission(0xaa, 0)),
            (entry(2, 0, 8, now), submission(0xbb, 0)),
        );
        snap.n_unique_submitted_hashes = 3;
        snap.n_invalidated_hashes = 2;
        snap.n_dispute_rounds = 2;
        assert_eq!(
            decide_action(&snap, None),
            Action::ConfirmFinalHash { round: 1 }
        );
    }

    #[test]
    fn test_last_hash_waits_for_window() {
        let mut snap = snapshot(OPEN + MINING_CYCLE_DURATION - 1);
        snap.n_unique_submitted_hashes = 1;
        assert_eq!(decide_action(&snap, None), Action::NoAction);
    }

    #[test]
    fn test_round_zero_without_opponent_waits_for_window() {
        let snap = lone(OPEN + MINING_CYCLE_DURATION - 1, 0, true);
        assert_eq!(decide_action(&snap, None), Action::NoAction);

        let snap = lone(OPEN + MINING_CYCLE_DURATION, 0, true);
        assert_eq!(
            decide_action(&snap, None),
            Action::InvalidateOpponent { round: 0, index: 3 }
        );
    }

    #[test]
    fn test_later_round_without_opponent_waits_for_previous_round() {
        let now = OPEN + MINING_CYCLE_DURATION + 100;
        assert_eq!(decide_action(&lone(now, 2, false), None), Action::NoAction);
        assert_eq!(
            decide_action(&lone(now, 2, true), None),
            Action::InvalidateOpponent { round: 2, index: 3 }
        );
    }

    #[test]
    fn test_opponent_timeout_boundary() {
        let now = OPEN + 5_000;
        let ours = (entry(1, 0, 8, now), submission(0xaa, 0));

        let timed_out = disputed(
            now,
            ours.clone(),
            (entry(1, 0, 8, now - 600), submission(0xbb, 0)),
        );
        assert_eq!(
            decide_action(&timed_out, None),
            Action::InvalidateOpponent { round: 0, index: 1 }
        );

        let still_alive = disputed(
            now,
            ours,
            (entry(1, 0, 8, now - 599), submission(0xbb, 0)),
        );
        assert_eq!(
            decide_action(&still_alive, None),
            Action::ConfirmJustificationRoot { round: 0, index: 0 }
        );
    }

    #[test]
    fn test_binary_search_waits_for_opponent() {
        let now = OPEN + 5_000;
        let ours = (entry(3, 0, 8, now), submission(0xaa, 16));

        let opp_unconfirmed = disputed(
            now,
            ours.clone(),
            (entry(1, 0, 8, now), submission(0xbb, 0)),
        );
        assert_eq!(decide_action(&opp_unconfirmed, None), Action::NoAction);

        let opp_behind = disputed(
            now,
            ours.clone(),
            (entry(2, 0, 8, now), submission(0xbb, 16)),
        );
        assert_eq!(decide_action(&opp_behind, None), Action::NoAction);

        let opp_level = disputed(now, ours, (entry(3, 0, 8, now), submission(0xbb, 16)));
        assert_eq!(
            decide_action(&opp_level, None),
            Action::RespondToBinarySearch { round: 0, index: 0 }
        );
    }

    #[test]
    fn test_confirm_binary_search_result() {
        let now = OPEN + 5_000;
        // Four search steps on a 16-node justification tree.
        let snap = disputed(
            now,
            (entry(6, 5, 5, now), submission(0xaa, 16)),
            (entry(6, 5, 5, now), submission(0xbb, 16)),
        );
        assert_eq!(
            decide_action(&snap, None),
            Action::ConfirmBinarySearchResult { round: 0, index: 0 }
        );
    }

    #[test]
    fn test_respond_to_challenge_after_both_confirmed() {
        let now = OPEN + 5_000;
        let snap = disputed(
            now,
            (entry(7, 5, 5, now), submission(0xaa, 16)),
            (entry(7, 5, 5, now), submission(0xbb, 16)),
        );
        assert_eq!(
            decide_action(&snap, None),
            Action::RespondToChallenge { round: 0, index: 0 }
        );

        // Already responded: nothing left to do until the round resolves.
        let done = disputed(
            now,
            (entry(8, 5, 5, now), submission(0xaa, 16)),
            (entry(7, 5, 5, now), submission(0xbb, 16)),
        );
        assert_eq!(decide_action(&done, None), Action::NoAction);
    }

    #[test]
    fn test_no_position_no_action() {
        assert_eq!(decide_action(&snapshot(OPEN + 10), None), Action::NoAction);
    }

    async fn fetch_for(ledger: &MemoryLedger, now: u64, proposal: &Submission) -> LedgerSnapshot {
        LedgerSnapshot::fetch(
            ledger,
            ledger.active_cycle().await.unwrap(),
            MINER,
            now,
            MINING_CYCLE_DURATION,
            proposal,
            None,
        )
        .await
        .unwrap()
    }

    fn stage_pair(ledger: &MemoryLedger, first: (Address, Submission), rival_silent_since: u64) {
        let rival = Address::repeat_byte(0x22);
        ledger.set_counts(2, 0);
        ledger.set_submission(first.0, first.1);
        ledger.set_submission(rival, submission(0xbb, 0));
        ledger.set_dispute_round(
            0,
            vec![
                DisputeEntry {
                    first_submitter: first.0,
                    ..entry(1, 0, 8, rival_silent_since)
                },
                DisputeEntry {
                    first_submitter: rival,
                    ..entry(1, 0, 8, rival_silent_since)
                },
            ],
        );
    }

    #[tokio::test]
    async fn test_defends_our_hash_submitted_by_another_miner() {
        let ledger = MemoryLedger::new();
        let now = OPEN + 5_000;
        let proposal = submission(0xaa, 0);
        stage_pair(&ledger, (Address::repeat_byte(0x11), proposal), now - 700);

        let snapshot = fetch_for(&ledger, now, &proposal).await;
        let position = snapshot.position.clone().unwrap();
        assert_eq!((position.round, position.index), (0, 0));
        assert_eq!(position.opponent.as_ref().map(|o| o.index), Some(1));
        assert_eq!(
            decide_action(&snapshot, None),
            Action::InvalidateOpponent { round: 0, index: 1 }
        );
    }

    #[tokio::test]
    async fn test_position_follows_local_proposal_not_own_record() {
        let ledger = MemoryLedger::new();
        let now = OPEN + 5_000;
        let proposal = submission(0xaa, 0);
        stage_pair(&ledger, (Address::repeat_byte(0x11), proposal), now);
        // Our own record points at a hash the local tree no longer proposes.
        ledger.set_submission(MINER, submission(0x55, 0));

        let snapshot = fetch_for(&ledger, now, &proposal).await;
        let position = snapshot.position.unwrap();
        assert_eq!(position.index, 0);
        assert!(position.submission.same_proposal(&proposal));

        let unknown = fetch_for(&ledger, now, &submission(0x66, 0)).await;
        assert!(unknown.position.is_none());
    }

    #[test]
    fn test_search_span() {
        assert_eq!(search_span(1, 2), U256::ZERO);
        assert_eq!(search_span(2, 2), U256::from(1));
        assert_eq!(search_span(6, 2), U256::from(16));
        assert_eq!(search_span(300, 2), U256::MAX);
    }
}
