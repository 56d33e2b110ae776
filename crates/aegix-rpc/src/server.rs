use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use aegix_agents::AgentPatch;
use aegix_core::constants::CONFIRM_TIMEOUT_SECS;
use aegix_core::challenge::Challenge;
use aegix_core::error::AegixError;
use aegix_core::pool::PoolType;
use aegix_core::session::SessionLimits;
use aegix_core::types::{Address, AgentId, ChainSignature, PoolId, SessionId};
use aegix_chain::rpc::ChainRpc;
use aegix_chain::tx::{Instruction, PreparedTransaction};
use aegix_crypto::keypair::verify_signature;
use aegix_engine::{Core, OwnerAuth, PaymentRequest, SessionAuth};
use aegix_pools::UnlockReport;

use crate::api::AegixApiServer;
use crate::types::{
    RpcAgent, RpcAgentCreated, RpcHealth, RpcOrphan, RpcPayment, RpcPool, RpcPoolCreated,
    RpcPoolStats, RpcRecoveryStatus, RpcSession, RpcUnlockReport,
};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Map a core error onto a JSON-RPC error object. The numeric code carries
/// the HTTP status class of the failure kind; `data.code` carries the
/// machine-readable code (`IMMUTABLE_ROOT`, `FORBIDDEN`, …).
fn rpc_err(e: AegixError) -> ErrorObject<'static> {
    let status = e.kind().http_status();
    ErrorObject::owned(
        status as i32,
        e.to_string(),
        Some(serde_json::json!({ "code": e.code(), "kind": e.kind() })),
    )
}

fn bad_param(msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(400, msg.into(), None::<()>)
}

fn parse_address(s: &str) -> Result<Address, ErrorObject<'static>> {
    Address::from_b58(s).map_err(|e| bad_param(format!("invalid address: {e}")))
}

fn parse_signature(s: &str) -> Result<[u8; 64], ErrorObject<'static>> {
    let bytes = hex::decode(s).map_err(|e| bad_param(format!("invalid signature hex: {e}")))?;
    if bytes.len() != 64 {
        return Err(bad_param("signature must be 64 bytes"));
    }
    let mut arr = [0u8; 64];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

fn parse_pool_id(s: &str) -> Result<PoolId, ErrorObject<'static>> {
    PoolId::from_hex(s).map_err(|e| bad_param(format!("invalid pool id: {e}")))
}

fn parse_agent_id(s: &str) -> Result<AgentId, ErrorObject<'static>> {
    AgentId::from_hex(s).map_err(|e| bad_param(format!("invalid agent id: {e}")))
}

// ── RpcServer ─────────────────────────────────────────────────────────────────

pub struct RpcServer {
    core: Arc<Core>,
}

impl RpcServer {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }

    fn pool_dto(&self, pool: &aegix_core::pool::Pool) -> RpcPool {
        let locked = self.core.pools.unlocked_keypair(&pool.id).is_err();
        RpcPool::from_pool(pool, locked)
    }
}

#[async_trait]
impl AegixApiServer for RpcServer {
    // ── Pool lifecycle ────────────────────────────────────────────────────────

    async fn create_pool(&self, owner: String, ts: i64, signature: String) -> RpcResult<RpcPool> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let pool = self
            .core
            .pools
            .get_or_create_legacy(owner, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        Ok(self.pool_dto(&pool))
    }

    async fn create_main_pool(
        &self,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPoolCreated> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let (pool, funding) = self
            .core
            .pools
            .get_or_create_main(owner, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        let funding_tx = match funding {
            Some(tx) => Some(tx.encode().map_err(rpc_err)?),
            None => None,
        };
        Ok(RpcPoolCreated {
            pool: self.pool_dto(&pool),
            funding_tx,
        })
    }

    async fn create_custom_pool(
        &self,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPoolCreated> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let (pool, funding) = self
            .core
            .pools
            .create_custom(owner, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        Ok(RpcPoolCreated {
            pool: RpcPool::from_pool(&pool, false),
            funding_tx: Some(funding.encode().map_err(rpc_err)?),
        })
    }

    async fn confirm_custom_pool(
        &self,
        pool_id: String,
        tx_signature: String,
        owner: String,
    ) -> RpcResult<RpcPool> {
        let pool_id = parse_pool_id(&pool_id)?;
        let owner = parse_address(&owner)?;
        let pool = self
            .core
            .pools
            .confirm_custom(&pool_id, &ChainSignature(tx_signature), &owner)
            .await
            .map_err(rpc_err)?;
        Ok(self.pool_dto(&pool))
    }

    async fn confirm_funding(&self, pool_id: String, tx_signature: String) -> RpcResult<bool> {
        let pool_id = parse_pool_id(&pool_id)?;
        self.core
            .pools
            .confirm_funding(&pool_id, &ChainSignature(tx_signature))
            .await
            .map_err(rpc_err)?;
        Ok(true)
    }

    async fn list_pools(&self, owner: String) -> RpcResult<Vec<RpcPool>> {
        let owner = parse_address(&owner)?;
        let pools = self.core.pools.list(&owner).await.map_err(rpc_err)?;
        Ok(pools.iter().map(|p| self.pool_dto(p)).collect())
    }

    async fn pool_stats(&self, pool_id: String) -> RpcResult<RpcPoolStats> {
        let pool_id = parse_pool_id(&pool_id)?;
        let stats = self.core.pools.stats(&pool_id).await.map_err(rpc_err)?;
        Ok(RpcPoolStats {
            pool: self.pool_dto(&stats.pool),
            lamports: stats.lamports,
            asset_micros: stats.asset_micros,
        })
    }

    async fn fund_pool(
        &self,
        source_id: String,
        target_id: String,
        amount: u64,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<String> {
        let source_id = parse_pool_id(&source_id)?;
        let target_id = parse_pool_id(&target_id)?;
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let tx = self
            .core
            .pools
            .fund_from_pool(&source_id, &target_id, amount, &owner, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        let chain_sig = self
            .core
            .chain
            .send_and_confirm(&tx, true, Duration::from_secs(CONFIRM_TIMEOUT_SECS))
            .await
            .map_err(rpc_err)?;
        Ok(chain_sig.as_str().to_string())
    }

    async fn build_transfer(
        &self,
        source: String,
        target: String,
        amount: u64,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<String> {
        let source = parse_address(&source)?;
        let target = parse_address(&target)?;
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let tx = self
            .core
            .pools
            .build_transfer(&source, &target, amount, &owner, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        tx.encode().map_err(rpc_err)
    }

    async fn delete_pool(
        &self,
        pool_id: String,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<bool> {
        let pool_id = parse_pool_id(&pool_id)?;
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let linked = self.core.agents.count_linked(&pool_id);
        self.core
            .pools
            .delete_custom(&pool_id, &owner, linked, ts, &sig, now_ms())
            .await
            .map_err(rpc_err)?;
        Ok(true)
    }

    async fn export_pool_key(
        &self,
        pool_id: String,
        owner: String,
        ts: i64,
        export_signature: String,
        decrypt_signature: String,
    ) -> RpcResult<String> {
        let pool_id = parse_pool_id(&pool_id)?;
        let owner = parse_address(&owner)?;
        let export_sig = parse_signature(&export_signature)?;
        let decrypt_sig = parse_signature(&decrypt_signature)?;

        // Timestamped authorization first, then the exact decrypt challenge.
        let challenge = Challenge::ExportKey {
            pool_id,
            owner,
            ts,
        };
        challenge.check_skew(now_ms()).map_err(rpc_err)?;
        verify_signature(&owner, challenge.render().as_bytes(), &export_sig).map_err(rpc_err)?;

        self.core
            .pools
            .export_key(&pool_id, &owner, &decrypt_sig)
            .map_err(rpc_err)
    }

    async fn unlock_pools(
        &self,
        owner: String,
        signature: String,
    ) -> RpcResult<Vec<RpcUnlockReport>> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let reports = self.core.pools.unlock_all(&owner, &sig).map_err(rpc_err)?;
        Ok(reports
            .into_iter()
            .map(|(pool_id, report)| match report {
                UnlockReport::Unlocked => RpcUnlockReport {
                    pool_id: pool_id.to_hex(),
                    unlocked: true,
                    public_key: None,
                },
                UnlockReport::Unrecoverable { public_key } => RpcUnlockReport {
                    pool_id: pool_id.to_hex(),
                    unlocked: false,
                    public_key: Some(public_key),
                },
            })
            .collect())
    }

    async fn update_pool_name(
        &self,
        pool_id: String,
        owner: String,
        name: String,
    ) -> RpcResult<bool> {
        let pool_id = parse_pool_id(&pool_id)?;
        let owner = parse_address(&owner)?;
        self.core
            .pools
            .update_name(&pool_id, &owner, name)
            .map_err(rpc_err)?;
        Ok(true)
    }

    async fn reconcile_pools(
        &self,
        owner: String,
        signature: String,
    ) -> RpcResult<Option<RpcOrphan>> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let orphan = self.core.pools.reconcile(&owner, &sig).await.map_err(rpc_err)?;
        Ok(orphan.map(|o| RpcOrphan {
            public_key: o.public_key.to_b58(),
            lamports: o.lamports,
        }))
    }

    async fn import_pool(
        &self,
        owner: String,
        signature: String,
        pool_type: String,
    ) -> RpcResult<RpcPool> {
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        let pool_type = match pool_type.as_str() {
            "Legacy" => PoolType::Legacy,
            "Main" => PoolType::Main,
            "Custom" => PoolType::Custom,
            other => return Err(bad_param(format!("unknown pool type {other:?}"))),
        };
        let pool = self
            .core
            .pools
            .import_orphan(owner, &sig, pool_type, now_ms())
            .await
            .map_err(rpc_err)?;
        Ok(self.pool_dto(&pool))
    }

    // ── Session lifecycle ─────────────────────────────────────────────────────

    async fn create_session(
        &self,
        owner: String,
        agent_id: String,
        ts: i64,
        signature: String,
        max_per_transaction: u64,
        daily_limit: u64,
        duration_secs: i64,
    ) -> RpcResult<RpcSession> {
        let owner = parse_address(&owner)?;
        let agent_id = parse_agent_id(&agent_id)?;
        let sig = parse_signature(&signature)?;
        // The agent must exist and belong to this owner.
        let agent = self.core.agents.get(&agent_id).map_err(rpc_err)?;
        if agent.owner != owner {
            return Err(rpc_err(AegixError::NotOwner));
        }

        let (session, _authority) = self
            .core
            .sessions
            .grant(
                owner,
                agent_id,
                ts,
                &sig,
                SessionLimits {
                    max_per_transaction,
                    daily_limit,
                },
                duration_secs,
                now_ms(),
            )
            .map_err(rpc_err)?;
        Ok(RpcSession::from(&session))
    }

    async fn session_status(&self, session_pk: String) -> RpcResult<RpcSession> {
        let pk = parse_address(&session_pk)?;
        self.core
            .sessions
            .refresh(&pk, now_ms())
            .map_err(rpc_err)?;
        let session = self
            .core
            .sessions
            .get(&pk)
            .ok_or_else(|| rpc_err(AegixError::SessionNotFound(session_pk)))?;
        Ok(RpcSession::from(&session))
    }

    async fn revoke_session(
        &self,
        session_pk: String,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<bool> {
        let pk = parse_address(&session_pk)?;
        let owner = parse_address(&owner)?;
        let sig = parse_signature(&signature)?;
        self.core
            .sessions
            .revoke(&pk, owner, ts, &sig, now_ms())
            .map_err(rpc_err)?;
        Ok(true)
    }

    // ── Payments ──────────────────────────────────────────────────────────────

    async fn execute_payment(
        &self,
        api_key: String,
        session_pk: String,
        pool_id: String,
        recipient: String,
        amount: u64,
    ) -> RpcResult<RpcPayment> {
        let ctx = self
            .core
            .agents
            .authenticate(&api_key, now_ms())
            .map_err(rpc_err)?;
        let session_pk = parse_address(&session_pk)?;
        let pool_id = parse_pool_id(&pool_id)?;
        let recipient = parse_address(&recipient)?;

        // The session must have been granted to the authenticated agent.
        let session = self
            .core
            .sessions
            .get(&session_pk)
            .ok_or_else(|| rpc_err(AegixError::SessionNotFound(session_pk.short())))?;
        if session.agent_id != ctx.agent_id || session.owner != ctx.owner {
            return Err(rpc_err(AegixError::NotOwner));
        }

        let payment = self
            .core
            .engine
            .execute(PaymentRequest {
                pool_id,
                recipient,
                amount,
                session: Some(SessionAuth {
                    session_pk,
                    agent: ctx,
                }),
                owner_auth: None,
                deadline: Duration::from_secs(CONFIRM_TIMEOUT_SECS),
            })
            .await
            .map_err(rpc_err)?;
        Ok(RpcPayment::from(&payment))
    }

    async fn execute_owner_payment(
        &self,
        pool_id: String,
        recipient: String,
        amount: u64,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPayment> {
        let pool_id = parse_pool_id(&pool_id)?;
        let recipient = parse_address(&recipient)?;
        let sig = parse_signature(&signature)?;
        let payment = self
            .core
            .engine
            .execute(PaymentRequest {
                pool_id,
                recipient,
                amount,
                session: None,
                owner_auth: Some(OwnerAuth {
                    challenge_ts: ts,
                    signature: sig,
                }),
                deadline: Duration::from_secs(CONFIRM_TIMEOUT_SECS),
            })
            .await
            .map_err(rpc_err)?;
        Ok(RpcPayment::from(&payment))
    }

    async fn payment_status(&self, session_id: String) -> RpcResult<Option<RpcPayment>> {
        let id = SessionId::from_hex(&session_id)
            .map_err(|e| bad_param(format!("invalid session id: {e}")))?;
        let payment = self.core.engine.payment_status(&id).map_err(rpc_err)?;
        Ok(payment.as_ref().map(RpcPayment::from))
    }

    // ── Recovery pool ─────────────────────────────────────────────────────────

    async fn init_recovery_pool(&self, owner: String) -> RpcResult<String> {
        let owner = parse_address(&owner)?;
        let address = self.core.recovery.init(&owner).map_err(rpc_err)?;
        // Bind the recovery pool to the owner's Legacy pool when present.
        if let Ok(pools) = self.core.pools.list(&owner).await {
            for pool in pools {
                let _ = self.core.pools.set_recovery_pool(&pool.id, address);
            }
        }
        Ok(address.to_b58())
    }

    async fn top_up_recovery_pool(&self, owner: String, lamports: u64) -> RpcResult<String> {
        let owner = parse_address(&owner)?;
        let recovery = self.core.recovery.address(&owner).map_err(rpc_err)?;
        let mut tx = PreparedTransaction::new(
            owner,
            vec![Instruction::TransferLamports {
                from: owner,
                to: recovery,
                lamports,
            }],
        );
        let (hash, height) = self.core.chain.latest_blockhash().await.map_err(rpc_err)?;
        tx.set_blockhash(hash, height);
        tx.encode().map_err(rpc_err)
    }

    async fn recovery_pool_status(&self, owner: String) -> RpcResult<RpcRecoveryStatus> {
        let owner = parse_address(&owner)?;
        let address = self.core.recovery.address(&owner).map_err(rpc_err)?;
        let balance = self.core.chain.get_balance(&address).await.map_err(rpc_err)?;
        self.core
            .recovery
            .sync_balance(&owner, balance)
            .map_err(rpc_err)?;
        let status = self.core.recovery.status(&owner).map_err(rpc_err)?;
        Ok(RpcRecoveryStatus {
            address: status.address.to_b58(),
            balance: status.balance,
            reserved: status.reserved,
            available: status.available,
            total_recovered: status.total_recovered,
        })
    }

    // ── Agent lifecycle ───────────────────────────────────────────────────────

    async fn register_agent(
        &self,
        owner: String,
        name: String,
        max_per_transaction: u64,
        daily_limit: u64,
        allowed_resources: Vec<String>,
    ) -> RpcResult<RpcAgentCreated> {
        let owner = parse_address(&owner)?;
        let (record, api_key) = self
            .core
            .agents
            .register(
                owner,
                name,
                aegix_core::agent::SpendingLimits {
                    max_per_transaction,
                    daily_limit,
                    allowed_resources,
                },
                now_ms(),
            )
            .await
            .map_err(rpc_err)?;
        Ok(RpcAgentCreated {
            agent: RpcAgent::from(&record),
            api_key,
        })
    }

    async fn list_agents(&self, owner: String) -> RpcResult<Vec<RpcAgent>> {
        let owner = parse_address(&owner)?;
        Ok(self
            .core
            .agents
            .list(&owner)
            .iter()
            .map(RpcAgent::from)
            .collect())
    }

    async fn patch_agent(
        &self,
        agent_id: String,
        owner: String,
        name: Option<String>,
        paused: Option<bool>,
        max_per_transaction: Option<u64>,
        daily_limit: Option<u64>,
        pool_link: Option<String>,
    ) -> RpcResult<RpcAgent> {
        let agent_id = parse_agent_id(&agent_id)?;
        let owner = parse_address(&owner)?;
        let current = self.core.agents.get(&agent_id).map_err(rpc_err)?;

        let limits = match (max_per_transaction, daily_limit) {
            (None, None) => None,
            (max, daily) => Some(aegix_core::agent::SpendingLimits {
                max_per_transaction: max.unwrap_or(current.limits.max_per_transaction),
                daily_limit: daily.unwrap_or(current.limits.daily_limit),
                allowed_resources: current.limits.allowed_resources.clone(),
            }),
        };
        let pool_link = match pool_link {
            Some(s) => Some(parse_pool_id(&s)?),
            None => None,
        };

        let old_link = current.pool_link;
        let record = self
            .core
            .agents
            .patch(
                &agent_id,
                &owner,
                AgentPatch {
                    name,
                    paused,
                    limits,
                    pool_link,
                },
            )
            .map_err(rpc_err)?;

        // Keep the pool-side agent counters in step with the link.
        if record.pool_link != old_link {
            if let Some(old) = old_link {
                let _ = self.core.pools.link_agent(&old, -1);
            }
            if let Some(new) = record.pool_link {
                let _ = self.core.pools.link_agent(&new, 1);
            }
        }
        Ok(RpcAgent::from(&record))
    }

    async fn reveal_agent_key(&self, agent_id: String, owner: String) -> RpcResult<String> {
        let agent_id = parse_agent_id(&agent_id)?;
        let owner = parse_address(&owner)?;
        self.core
            .agents
            .reveal_key(&agent_id, &owner)
            .await
            .map_err(rpc_err)
    }

    async fn regenerate_agent_key(&self, agent_id: String, owner: String) -> RpcResult<String> {
        let agent_id = parse_agent_id(&agent_id)?;
        let owner = parse_address(&owner)?;
        self.core
            .agents
            .regenerate_key(&agent_id, &owner)
            .await
            .map_err(rpc_err)
    }

    async fn delete_agent(&self, agent_id: String, owner: String) -> RpcResult<bool> {
        let agent_id = parse_agent_id(&agent_id)?;
        let owner = parse_address(&owner)?;
        let record = self.core.agents.delete(&agent_id, &owner).map_err(rpc_err)?;
        if let Some(pool) = record.pool_link {
            let _ = self.core.pools.link_agent(&pool, -1);
        }
        Ok(true)
    }

    // ── Health ────────────────────────────────────────────────────────────────

    async fn health(&self) -> RpcResult<RpcHealth> {
        let health = self.core.compression.health().await;
        let facilitator_ok = self
            .core
            .facilitator
            .fee_payer_for(&self.core.network)
            .await
            .is_some();
        Ok(RpcHealth {
            healthy: health.healthy,
            supports_compression: health.supports_compression,
            rpc_summary: health.rpc_summary,
            facilitator_ok,
            pool_count: self.core.store.count_pools(),
            store_version: self.core.store.collection_version("pools").unwrap_or(0),
        })
    }
}
