//! Miner client facade.
//!
//! Wires the reputation engine, the ledger gateway and the coordinator
//! together, and optionally serves the reputation oracle.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::oracle::{oracle_router, OracleState};
use parking_lot::Mutex;
use repminer_core::{
    ChainGateway, Coordinator, GasPriceOracle, MinerConfig, MiningError, ReputationEngine,
};
use repminer_types::MINING_CYCLE_DURATION;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Coordinator over dynamically dispatched collaborators.
pub type MiningCoordinator = Coordinator<dyn ChainGateway, dyn ReputationEngine>;

struct OracleServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

/// A running reputation miner.
pub struct MinerClient {
    coordinator: Arc<MiningCoordinator>,
    runner: Mutex<Option<JoinHandle<repminer_core::Result<()>>>>,
    oracle: Mutex<Option<OracleServer>>,
}

impl MinerClient {
    /// Brings the client up.
    ///
    /// Loads the engine's saved tree and syncs it from
    /// `config.starting_block` if it does not match the ledger, computes the
    /// first slot list, then starts the mining loop and the oracle as
    /// configured.
    pub async fn initialise(
        config: NodeConfig,
        gateway: Arc<dyn ChainGateway>,
        engine: Arc<dyn ReputationEngine>,
        gas_oracle: Arc<dyn GasPriceOracle>,
    ) -> Result<Self> {
        config.validate()?;
        let miner = config.miner()?;

        let saved = engine.load_state().await?;
        let ledger_root = gateway.reputation_root_hash().await?;
        let local_root = engine.root_hash().await?;
        tracing::info!(
            %miner,
            saved = ?saved,
            %ledger_root,
            %local_root,
            "loaded reputation state"
        );

        if local_root != ledger_root {
            tracing::info!(
                from_block = config.starting_block,
                "local tree does not match the ledger, syncing"
            );
            engine.sync(config.starting_block).await?;
            engine.persist_state().await?;

            let synced_root = engine.root_hash().await?;
            if synced_root != ledger_root {
                tracing::warn!(
                    %synced_root,
                    %ledger_root,
                    "root hash still differs from the ledger after sync"
                );
            }
        }

        let coordinator: Arc<MiningCoordinator> = Arc::new(Coordinator::new(
            MinerConfig {
                miner,
                minimum_stake: config.minimum_stake()?,
                cycle_duration: MINING_CYCLE_DURATION,
                exit_on_error: config.exit_on_error,
            },
            gateway.clone(),
            engine.clone(),
            gas_oracle,
        ));
        coordinator.reload_slots().await?;

        let runner = if config.auto_run {
            let blocks = gateway.subscribe_blocks().await?;
            let cycles = gateway.subscribe_cycle_complete().await?;
            Some(tokio::spawn(coordinator.clone().run(blocks, cycles)))
        } else {
            None
        };

        let oracle = if config.oracle {
            Some(serve_oracle(OracleState { gateway, engine }, config.oracle_port).await?)
        } else {
            None
        };

        Ok(Self {
            coordinator,
            runner: Mutex::new(runner),
            oracle: Mutex::new(oracle),
        })
    }

    /// The coordinator driving this client.
    pub fn coordinator(&self) -> &Arc<MiningCoordinator> {
        &self.coordinator
    }

    /// Address the oracle is bound to, if it is running.
    pub fn oracle_addr(&self) -> Option<SocketAddr> {
        self.oracle.lock().as_ref().map(|server| server.addr)
    }

    /// Stops mining and the oracle.
    ///
    /// Returns once any in-flight pass has finished.
    pub async fn close(&self) {
        self.coordinator.shutdown().await;

        let oracle = self.oracle.lock().take();
        if let Some(server) = oracle {
            let _ = server.shutdown.send(());
            match server.handle.await {
                Ok(Ok(())) => tracing::info!(addr = %server.addr, "oracle stopped"),
                Ok(Err(e)) => tracing::error!(error = %e, "oracle server failed"),
                Err(e) => tracing::error!(error = %e, "oracle task failed"),
            }
        }
    }

    /// Waits for the mining loop to end.
    ///
    /// Surfaces the fatal error of a fail-fast block pass. Returns
    /// immediately when the loop was never started.
    pub async fn wait(&self) -> Result<()> {
        let runner = self.runner.lock().take();
        let Some(runner) = runner else {
            return Ok(());
        };

        match runner.await {
            Ok(result) => result.map_err(NodeError::from),
            Err(e) => Err(NodeError::Mining(MiningError::Fatal(format!(
                "mining loop panicked: {e}"
            )))),
        }
    }
}

async fn serve_oracle(state: OracleState, port: u16) -> Result<OracleServer> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    let (shutdown, stop) = oneshot::channel::<()>();

    let router = oracle_router(state);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop.await;
            })
            .await
    });

    tracing::info!(%addr, "reputation oracle listening");
    Ok(OracleServer {
        addr,
        shutdown,
        handle,
    })
}
