//! Fuzz target for the dispute state machine.
//!
//! Any ledger snapshot, however inconsistent, must produce an action
//! without panicking.

#![no_main]

use alloy_primitives::{Address, B256, U256};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use repminer_core::{decide_action, DisputePosition, LedgerSnapshot, Opponent, SubmissionCheck};
use repminer_types::{DisputeEntry, Submission, SubmissionSlot};

#[derive(Debug, Arbitrary)]
struct Side {
    index: u64,
    last_response: u64,
    step: u64,
    lower: u64,
    upper: u64,
    jrh_n_nodes: u64,
}

impl Side {
    fn entry(&self) -> DisputeEntry {
        DisputeEntry {
            last_response_timestamp: self.last_response,
            challenge_step_completed: self.step,
            lower_bound: U256::from(self.lower),
            upper_bound: U256::from(self.upper),
            ..Default::default()
        }
    }

    fn submission(&self) -> Submission {
        Submission {
            proposed_new_root_hash: B256::repeat_byte(1),
            jrh_n_nodes: U256::from(self.jrh_n_nodes),
            ..Default::default()
        }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    block_timestamp: u64,
    window_open_timestamp: u64,
    cycle_duration: u64,
    unique: u64,
    invalidated: u64,
    rounds: u64,
    slot: Option<(u64, u64)>,
    check: Option<(u64, bool)>,
    round: u64,
    ours: Option<Side>,
    theirs: Option<Side>,
    previous_round_complete: bool,
}

fuzz_target!(|input: Input| {
    let position = input.ours.as_ref().map(|ours| DisputePosition {
        round: input.round,
        index: ours.index,
        entry: ours.entry(),
        submission: ours.submission(),
        opponent: input.theirs.as_ref().map(|theirs| Opponent {
            index: theirs.index,
            entry: theirs.entry(),
            submission: theirs.submission(),
        }),
        previous_round_complete: input.previous_round_complete,
    });

    let snapshot = LedgerSnapshot {
        cycle: Address::ZERO,
        block_timestamp: input.block_timestamp,
        window_open_timestamp: input.window_open_timestamp,
        cycle_duration: input.cycle_duration,
        n_unique_submitted_hashes: input.unique,
        n_invalidated_hashes: input.invalidated,
        n_dispute_rounds: input.rounds,
        submission_check: input.check.map(|(submissions_for_hash, entry_submitted)| {
            SubmissionCheck {
                submissions_for_hash,
                entry_submitted,
            }
        }),
        position,
    };

    let slot = input.slot.map(|(entry_index, eligible_timestamp)| SubmissionSlot {
        entry_index,
        eligible_timestamp,
    });
    let _ = decide_action(&snapshot, slot.as_ref());
});
