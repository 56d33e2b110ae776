//! The single `Core` value bundling every gateway component. One instance
//! is constructed at process start and shut down on termination; nothing in
//! the system lives in module-level state.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use aegix_agents::AgentRegistry;
use aegix_chain::rpc::ChainRpc;
use aegix_compression::{CompressionClient, CompressionRpc};
use aegix_core::error::AegixError;
use aegix_core::types::Address;
use aegix_pools::PoolRegistry;
use aegix_recovery::RecoveryPoolManager;
use aegix_sealed::SealedStore;
use aegix_session::SessionKeyManager;
use aegix_store::GatewayStore;

use crate::audit::AuditLedger;
use crate::engine::{EngineConfig, PaymentEngine};
use crate::facilitator::{Facilitator, FacilitatorGateway};

pub struct CoreConfig {
    pub network: String,
    pub mint: Address,
}

pub struct Core {
    pub network: String,
    pub mint: Address,
    pub store: Arc<GatewayStore>,
    pub sealed: Arc<dyn SealedStore>,
    pub chain: Arc<dyn ChainRpc>,
    pub compression: Arc<CompressionClient>,
    pub pools: Arc<PoolRegistry>,
    pub sessions: Arc<SessionKeyManager>,
    pub recovery: Arc<RecoveryPoolManager>,
    pub agents: Arc<AgentRegistry>,
    pub audit: Arc<AuditLedger>,
    pub facilitator: Arc<FacilitatorGateway>,
    pub engine: Arc<PaymentEngine>,
    shutdown_tx: watch::Sender<bool>,
}

impl Core {
    /// Wire every component against the provided capabilities.
    pub fn init(
        store: Arc<GatewayStore>,
        sealed: Arc<dyn SealedStore>,
        chain: Arc<dyn ChainRpc>,
        compression_rpc: Arc<dyn CompressionRpc>,
        facilitator_impl: Arc<dyn Facilitator>,
        config: CoreConfig,
    ) -> Result<Self, AegixError> {
        let compression = Arc::new(CompressionClient::new(compression_rpc, Arc::clone(&chain)));
        let pools = Arc::new(PoolRegistry::open(
            Arc::clone(&store),
            Arc::clone(&sealed),
            Arc::clone(&chain),
            config.mint,
        )?);
        let sessions = Arc::new(SessionKeyManager::open(Arc::clone(&store))?);
        let recovery = Arc::new(RecoveryPoolManager::open(Arc::clone(&store))?);
        let agents = Arc::new(AgentRegistry::open(
            Arc::clone(&store),
            Arc::clone(&sealed),
        )?);
        let audit = Arc::new(AuditLedger::new(Arc::clone(&store), Arc::clone(&sealed)));
        let facilitator = Arc::new(FacilitatorGateway::new(facilitator_impl));

        let network = config.network.clone();
        let mint = config.mint;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(PaymentEngine::new(
            Arc::clone(&chain),
            Arc::clone(&compression),
            Arc::clone(&pools),
            Arc::clone(&sessions),
            Arc::clone(&recovery),
            Arc::clone(&agents),
            Arc::clone(&audit),
            Arc::clone(&store),
            Arc::clone(&facilitator),
            EngineConfig {
                network: config.network,
                mint: config.mint,
            },
            shutdown_rx,
        ));

        Ok(Self {
            network,
            mint,
            store,
            sealed,
            chain,
            compression,
            pools,
            sessions,
            recovery,
            agents,
            audit,
            facilitator,
            engine,
            shutdown_tx,
        })
    }

    /// Signal background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("core shutting down");
        let _ = self.shutdown_tx.send(true);
        self.engine.drain_tasks().await;
    }
}
