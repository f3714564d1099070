//! Transaction submission helpers.
//!
//! Each action becomes exactly one transaction, priced from a cached gas
//! price and sent once. Nothing is retried here: the next block re-derives
//! the situation from the ledger and tries again if the step still applies.

use crate::dispute::{Action, LedgerSnapshot};
use crate::engine::ReputationEngine;
use crate::error::{MiningError, Result};
use crate::gateway::{ChainGateway, CycleCall, TransactionReceipt, TransactionRequest};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use repminer_types::Submission;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Gas price used when the fee service cannot be reached (20 gwei).
pub const DEFAULT_GAS_PRICE: u64 = 20_000_000_000;

/// How long a fetched gas price stays fresh.
pub const GAS_PRICE_REFRESH: Duration = Duration::from_secs(5 * 60);

/// Source of gas prices, in wei.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Current recommended gas price.
    async fn gas_price(&self) -> Result<U256>;
}

/// An oracle that always answers with the same price.
#[derive(Debug, Clone, Copy)]
pub struct FixedGasPrice(pub U256);

impl Default for FixedGasPrice {
    fn default() -> Self {
        Self(U256::from(DEFAULT_GAS_PRICE))
    }
}

#[async_trait]
impl GasPriceOracle for FixedGasPrice {
    async fn gas_price(&self) -> Result<U256> {
        Ok(self.0)
    }
}

/// Last gas price fetched and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPrice {
    /// Price in wei.
    pub price: U256,
    /// When the price was fetched; `None` until the first fetch.
    pub fetched_at: Option<Instant>,
}

impl Default for GasPrice {
    fn default() -> Self {
        Self {
            price: U256::from(DEFAULT_GAS_PRICE),
            fetched_at: None,
        }
    }
}

impl GasPrice {
    /// Returns true if the price should be refreshed.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.fetched_at {
            None => true,
            Some(at) => now.duration_since(at) >= GAS_PRICE_REFRESH,
        }
    }

    /// Fetches a fresh price, falling back to the default on any error.
    pub async fn refresh(oracle: &dyn GasPriceOracle) -> Self {
        let price = match oracle.gas_price().await {
            Ok(price) if !price.is_zero() => price,
            Ok(_) => {
                tracing::warn!("gas oracle returned zero, using default gas price");
                U256::from(DEFAULT_GAS_PRICE)
            }
            Err(e) => {
                tracing::warn!(error = %e, "gas oracle unavailable, using default gas price");
                U256::from(DEFAULT_GAS_PRICE)
            }
        };

        Self {
            price,
            fetched_at: Some(Instant::now()),
        }
    }
}

/// Sends one priced transaction per call and checks its receipt.
pub struct TransactionSender<G: ?Sized> {
    gateway: Arc<G>,
}

impl<G: ChainGateway + ?Sized> TransactionSender<G> {
    /// Creates a sender over `gateway`.
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Estimates, submits and awaits `call` against `cycle`.
    pub async fn send(
        &self,
        cycle: Address,
        call: CycleCall,
        gas_price: U256,
    ) -> Result<TransactionReceipt> {
        let estimate = self.gateway.estimate_gas(cycle, &call).await?;
        // 20% headroom over the estimate.
        let gas_limit = estimate * U256::from(12) / U256::from(10);
        let method = call.method();

        tracing::info!(
            method,
            cycle = %cycle,
            %gas_price,
            %gas_limit,
            "sending transaction"
        );

        let receipt = self
            .gateway
            .send_transaction(TransactionRequest {
                to: cycle,
                call,
                gas_price,
                gas_limit,
            })
            .await?;

        if !receipt.success {
            return Err(MiningError::TransactionReverted {
                hash: receipt.hash,
                action: method.to_string(),
            });
        }

        tracing::info!(
            method,
            tx_hash = %receipt.hash,
            block = receipt.block_number,
            "transaction mined"
        );

        Ok(receipt)
    }
}

/// Builds the contract call for `action`, asking the engine for proofs.
///
/// Returns `None` for [`Action::NoAction`].
pub async fn prepare_call<E>(
    engine: &E,
    snapshot: &LedgerSnapshot,
    proposal: &Submission,
    action: Action,
) -> Result<Option<CycleCall>>
where
    E: ReputationEngine + ?Sized,
{
    let cycle = snapshot.cycle;
    let entry = || {
        snapshot
            .position
            .as_ref()
            .map(|p| p.entry.clone())
            .ok_or_else(|| MiningError::Gateway("no dispute entry for this miner".into()))
    };

    let call = match action {
        Action::NoAction => return Ok(None),
        Action::Submit { entry_index } => CycleCall::SubmitRootHash {
            new_hash: proposal.proposed_new_root_hash,
            n_nodes: proposal.n_nodes,
            jrh: proposal.jrh,
            entry_index,
        },
        Action::InvalidateOpponent { round, index } => CycleCall::InvalidateHash { round, index },
        Action::ConfirmJustificationRoot { round, index } => {
            CycleCall::ConfirmJustificationRootHash {
                round,
                index,
                proof: engine.justification_proof(cycle, round, index).await?,
            }
        }
        Action::RespondToBinarySearch { round, index } => {
            let entry = entry()?;
            CycleCall::RespondToBinarySearchForChallenge {
                round,
                index,
                response: engine
                    .binary_search_response(cycle, round, index, &entry)
                    .await?,
            }
        }
        Action::ConfirmBinarySearchResult { round, index } => {
            let entry = entry()?;
            CycleCall::ConfirmBinarySearchResult {
                round,
                index,
                result: engine
                    .binary_search_result(cycle, round, index, &entry)
                    .await?,
            }
        }
        Action::RespondToChallenge { round, index } => {
            let entry = entry()?;
            CycleCall::RespondToChallenge {
                round,
                index,
                response: engine.challenge_response(cycle, round, index, &entry).await?,
            }
        }
        Action::ConfirmFinalHash { round } => CycleCall::ConfirmNewHash { round },
    };

    Ok(Some(call))
}
