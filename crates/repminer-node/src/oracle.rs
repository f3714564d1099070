//! Reputation oracle HTTP API.
//!
//! Serves reputations and their Merkle proofs from the local tree so that
//! clients can build transactions that need a proven reputation.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/health` | `{status, version}` |
//! | GET | `/` | current root hash and every reputation |
//! | GET | `/network` | active and inactive mining cycle addresses |
//! | GET | `/{rootHash}/{colony}/{skillId}/{user}` | value with proof |
//! | GET | `/{rootHash}/{colony}/{skillId}/{user}/noProof` | value only |

use alloy_primitives::{Address, Bytes, B256, U256};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use repminer_core::{ChainGateway, MiningError, ReputationEngine};
use repminer_types::{KeyError, ReputationKey, ReputationProof};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared by the oracle handlers.
#[derive(Clone)]
pub struct OracleState {
    /// Ledger access, for cycle addresses.
    pub gateway: Arc<dyn ChainGateway>,
    /// The reputation tree.
    pub engine: Arc<dyn ReputationEngine>,
}

/// Oracle error type.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A path segment could not be parsed.
    #[error("{0}")]
    BadRequest(String),
    /// The colony, skill or user did not form a reputation key.
    #[error("invalid reputation key: {0}")]
    InvalidKey(#[from] KeyError),
    /// No reputation under the requested root and key.
    #[error("Requested reputation does not exist or invalid request")]
    NotFound,
    /// The ledger or the reputation engine failed.
    #[error(transparent)]
    Mining(#[from] MiningError),
}

impl IntoResponse for OracleError {
    fn into_response(self) -> Response {
        let status = match &self {
            OracleError::BadRequest(_) | OracleError::InvalidKey(_) | OracleError::NotFound => {
                StatusCode::BAD_REQUEST
            }
            OracleError::Mining(e) => {
                tracing::error!(error = %e, "oracle request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct ReputationEntry {
    key: Bytes,
    value: Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeResponse {
    root_hash: B256,
    reputations: Vec<ReputationEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkResponse {
    active_reputation_mining_cycle: Address,
    inactive_reputation_mining_cycle: Address,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProofResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    branch_mask: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    siblings: Option<Vec<B256>>,
    key: Bytes,
    value: Bytes,
    reputation_amount: String,
}

impl ProofResponse {
    fn from_proof(proof: ReputationProof, with_proof: bool) -> Result<Self, OracleError> {
        let amount = proof.reputation()?.amount;
        let (branch_mask, siblings) = if with_proof {
            (Some(proof.branch_mask), Some(proof.siblings))
        } else {
            (None, None)
        };
        Ok(Self {
            branch_mask,
            siblings,
            key: proof.key,
            value: proof.value,
            reputation_amount: amount.to_string(),
        })
    }
}

/// Creates the oracle router.
pub fn oracle_router(state: OracleState) -> Router {
    Router::new()
        .route("/", get(current_tree))
        .route("/health", get(health))
        .route("/network", get(network))
        .route("/{root_hash}/{colony}/{skill_id}/{user}", get(proof_with_siblings))
        .route(
            "/{root_hash}/{colony}/{skill_id}/{user}/noProof",
            get(proof_without_siblings),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn current_tree(State(state): State<OracleState>) -> Result<impl IntoResponse, OracleError> {
    let root_hash = state.engine.root_hash().await?;
    let reputations = state
        .engine
        .reputations()
        .await?
        .into_iter()
        .map(|(key, value)| ReputationEntry {
            key: key.encode(),
            value: value.encode(),
        })
        .collect();

    Ok(Json(TreeResponse {
        root_hash,
        reputations,
    }))
}

async fn network(State(state): State<OracleState>) -> Result<impl IntoResponse, OracleError> {
    Ok(Json(NetworkResponse {
        active_reputation_mining_cycle: state.gateway.active_cycle().await?,
        inactive_reputation_mining_cycle: state.gateway.inactive_cycle().await?,
    }))
}

type ProofPath = Path<(String, String, String, String)>;

async fn proof_with_siblings(
    State(state): State<OracleState>,
    Path((root_hash, colony, skill_id, user)): ProofPath,
) -> Result<impl IntoResponse, OracleError> {
    let proof = lookup(&state, &root_hash, &colony, &skill_id, &user).await?;
    Ok(Json(ProofResponse::from_proof(proof, true)?))
}

async fn proof_without_siblings(
    State(state): State<OracleState>,
    Path((root_hash, colony, skill_id, user)): ProofPath,
) -> Result<impl IntoResponse, OracleError> {
    let proof = lookup(&state, &root_hash, &colony, &skill_id, &user).await?;
    Ok(Json(ProofResponse::from_proof(proof, false)?))
}

/// Finds the proof for a key under `root_hash`, falling back to the
/// engine's history when the root is not the current one.
async fn lookup(
    state: &OracleState,
    root_hash: &str,
    colony: &str,
    skill_id: &str,
    user: &str,
) -> Result<ReputationProof, OracleError> {
    let root_hash = B256::from_str(root_hash)
        .map_err(|_| OracleError::BadRequest(format!("invalid root hash: {root_hash}")))?;
    let key = ReputationKey::parse(colony, skill_id, user)?;

    let current = state.engine.root_hash().await?;
    let proof = if root_hash == current {
        state.engine.proof(&key).await?
    } else {
        tracing::debug!(%root_hash, %current, "serving historical proof");
        state.engine.historical_proof(root_hash, &key).await?
    };

    proof.ok_or(OracleError::NotFound)
}
