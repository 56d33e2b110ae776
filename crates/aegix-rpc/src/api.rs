use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    RpcAgent, RpcAgentCreated, RpcHealth, RpcOrphan, RpcPayment, RpcPool, RpcPoolCreated,
    RpcPoolStats, RpcRecoveryStatus, RpcSession, RpcUnlockReport,
};

/// Aegix gateway JSON-RPC 2.0 API.
///
/// All method names are prefixed with "aegix_" via `namespace = "aegix"`.
/// Owner signatures are hex-encoded 64-byte Ed25519 signatures over the
/// documented challenge messages; addresses are base58, registry ids hex.
#[rpc(server, namespace = "aegix")]
pub trait AegixApi {
    // ── Pool lifecycle ────────────────────────────────────────────────────────

    /// Get-or-create the owner's Legacy pool (signature over
    /// `AEGIX_CREATE_POOL::{owner}::{ts}`). Re-presenting the signature
    /// also unlocks a locked pool.
    #[method(name = "createPool")]
    async fn create_pool(&self, owner: String, ts: i64, signature: String) -> RpcResult<RpcPool>;

    /// Get-or-create the Main pool (signature over
    /// `AEGIX_MAIN_POOL::{owner}::{ts}`); first creation returns the
    /// Legacy→Main funding transaction hex.
    #[method(name = "createMainPool")]
    async fn create_main_pool(
        &self,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPoolCreated>;

    /// Phase one of Custom-pool creation (signature over
    /// `AEGIX_CUSTOM_POOL::{owner}::{ts}`): returns the pending pool and
    /// its funding transaction.
    #[method(name = "createCustomPool")]
    async fn create_custom_pool(
        &self,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPoolCreated>;

    /// Phase two: persist the pending Custom pool once its funding
    /// transaction confirmed.
    #[method(name = "confirmCustomPool")]
    async fn confirm_custom_pool(
        &self,
        pool_id: String,
        tx_signature: String,
        owner: String,
    ) -> RpcResult<RpcPool>;

    /// Confirm a pool's funding transaction (advances Created → Funded).
    #[method(name = "confirmFunding")]
    async fn confirm_funding(&self, pool_id: String, tx_signature: String) -> RpcResult<bool>;

    /// Enumerate the owner's pools through the sealed map.
    #[method(name = "listPools")]
    async fn list_pools(&self, owner: String) -> RpcResult<Vec<RpcPool>>;

    /// Pool counters plus throttled on-chain balances.
    #[method(name = "poolStats")]
    async fn pool_stats(&self, pool_id: String) -> RpcResult<RpcPoolStats>;

    /// Inter-pool funding (signature over
    /// `AEGIX_FUND_POOL::{src}::{tgt}::{amount}::{ts}`). Returns the
    /// submitted chain signature.
    #[method(name = "fundPool")]
    async fn fund_pool(
        &self,
        source_id: String,
        target_id: String,
        amount: u64,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<String>;

    /// Owner deposit/withdraw transfer against the Legacy tier (signature
    /// over `AEGIX_TRANSFER::{src}::{tgt}::{amount}::{ts}`). Returns the
    /// prepared transaction hex.
    #[method(name = "buildTransfer")]
    async fn build_transfer(
        &self,
        source: String,
        target: String,
        amount: u64,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<String>;

    /// Delete a Custom pool (signature over
    /// `AEGIX_DELETE_POOL::{pool_id}::{owner}::{ts}`).
    #[method(name = "deletePool")]
    async fn delete_pool(
        &self,
        pool_id: String,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<bool>;

    /// Export a pool secret (base58). Requires the timestamped
    /// `AEGIX_EXPORT_KEY` authorization and a signature over the exact
    /// challenge `DECRYPT_POOL_KEY_{pool_id}`.
    #[method(name = "exportPoolKey")]
    async fn export_pool_key(
        &self,
        pool_id: String,
        owner: String,
        ts: i64,
        export_signature: String,
        decrypt_signature: String,
    ) -> RpcResult<String>;

    /// Unlock every pool of the owner with a re-signed creation signature;
    /// per-pool outcomes, unrecoverable ones carrying the public-key hint.
    #[method(name = "unlockPools")]
    async fn unlock_pools(&self, owner: String, signature: String) -> RpcResult<Vec<RpcUnlockReport>>;

    /// Owner-initiated pool rename.
    #[method(name = "updatePoolName")]
    async fn update_pool_name(&self, pool_id: String, owner: String, name: String) -> RpcResult<bool>;

    /// Detect an on-chain account the owner signed for that never reached
    /// the registry (crashed two-phase commit).
    #[method(name = "reconcilePools")]
    async fn reconcile_pools(&self, owner: String, signature: String) -> RpcResult<Option<RpcOrphan>>;

    /// Import a reclaimable orphan under the given tier.
    #[method(name = "importPool")]
    async fn import_pool(
        &self,
        owner: String,
        signature: String,
        pool_type: String,
    ) -> RpcResult<RpcPool>;

    // ── Session lifecycle ─────────────────────────────────────────────────────

    /// Grant a session key (signature over
    /// `AEGIX_SESSION_GRANT::{agent_id}::{owner}::{ts}`).
    #[method(name = "createSession")]
    async fn create_session(
        &self,
        owner: String,
        agent_id: String,
        ts: i64,
        signature: String,
        max_per_transaction: u64,
        daily_limit: u64,
        duration_secs: i64,
    ) -> RpcResult<RpcSession>;

    /// Current session state with recomputed status.
    #[method(name = "sessionStatus")]
    async fn session_status(&self, session_pk: String) -> RpcResult<RpcSession>;

    /// Revoke a session (signature over
    /// `AEGIX_SESSION_REVOKE::{agent_id}::{owner}::{ts}`).
    #[method(name = "revokeSession")]
    async fn revoke_session(
        &self,
        session_pk: String,
        owner: String,
        ts: i64,
        signature: String,
    ) -> RpcResult<bool>;

    // ── Payments ──────────────────────────────────────────────────────────────

    /// Agent-initiated payment. The API key is the single credential the
    /// middleware validates; paused agents are refused.
    #[method(name = "executePayment")]
    async fn execute_payment(
        &self,
        api_key: String,
        session_pk: String,
        pool_id: String,
        recipient: String,
        amount: u64,
    ) -> RpcResult<RpcPayment>;

    /// Owner-initiated payment (signature over
    /// `AEGIX_TRANSFER::{pool}::{recipient}::{amount}::{ts}`).
    #[method(name = "executeOwnerPayment")]
    async fn execute_owner_payment(
        &self,
        pool_id: String,
        recipient: String,
        amount: u64,
        ts: i64,
        signature: String,
    ) -> RpcResult<RpcPayment>;

    #[method(name = "paymentStatus")]
    async fn payment_status(&self, session_id: String) -> RpcResult<Option<RpcPayment>>;

    // ── Recovery pool ─────────────────────────────────────────────────────────

    /// Initialise (idempotent) the owner's Recovery Pool; returns its
    /// address.
    #[method(name = "initRecoveryPool")]
    async fn init_recovery_pool(&self, owner: String) -> RpcResult<String>;

    /// Unsigned top-up transaction hex (owner wallet → recovery pool).
    #[method(name = "topUpRecoveryPool")]
    async fn top_up_recovery_pool(&self, owner: String, lamports: u64) -> RpcResult<String>;

    #[method(name = "recoveryPoolStatus")]
    async fn recovery_pool_status(&self, owner: String) -> RpcResult<RpcRecoveryStatus>;

    // ── Agent lifecycle ───────────────────────────────────────────────────────

    /// Register an agent; the raw API key appears in this response only.
    #[method(name = "registerAgent")]
    async fn register_agent(
        &self,
        owner: String,
        name: String,
        max_per_transaction: u64,
        daily_limit: u64,
        allowed_resources: Vec<String>,
    ) -> RpcResult<RpcAgentCreated>;

    #[method(name = "listAgents")]
    async fn list_agents(&self, owner: String) -> RpcResult<Vec<RpcAgent>>;

    #[method(name = "patchAgent")]
    async fn patch_agent(
        &self,
        agent_id: String,
        owner: String,
        name: Option<String>,
        paused: Option<bool>,
        max_per_transaction: Option<u64>,
        daily_limit: Option<u64>,
        pool_link: Option<String>,
    ) -> RpcResult<RpcAgent>;

    /// Short-lived owner-gated reveal of the raw API key.
    #[method(name = "revealAgentKey")]
    async fn reveal_agent_key(&self, agent_id: String, owner: String) -> RpcResult<String>;

    #[method(name = "regenerateAgentKey")]
    async fn regenerate_agent_key(&self, agent_id: String, owner: String) -> RpcResult<String>;

    #[method(name = "deleteAgent")]
    async fn delete_agent(&self, agent_id: String, owner: String) -> RpcResult<bool>;

    // ── Health ────────────────────────────────────────────────────────────────

    /// Combined probe: compression capability, chain reachability,
    /// facilitator availability, store status.
    #[method(name = "health")]
    async fn health(&self) -> RpcResult<RpcHealth>;
}
