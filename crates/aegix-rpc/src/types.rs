//! Wire DTOs for the gateway's JSON-RPC surface. Chain identifiers travel
//! base58, registry ids hex, signatures hex. Secrets appear only in the
//! explicitly owner-gated responses (agent-key reveal, pool-key export).

use serde::{Deserialize, Serialize};

use aegix_core::agent::AgentRecord;
use aegix_core::error::ErrorKind;
use aegix_core::payment::{Leg, PaymentSession};
use aegix_core::pool::Pool;
use aegix_core::session::SessionKey;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcPool {
    pub id: String,
    pub public_key: String,
    pub owner: String,
    pub pool_type: String,
    pub name: String,
    pub funding_state: String,
    pub total_payments: u64,
    pub total_sol_recovered: u64,
    pub agent_count: u32,
    pub recovery_pool: Option<String>,
    pub created_at: i64,
    pub locked: bool,
}

impl RpcPool {
    pub fn from_pool(pool: &Pool, locked: bool) -> Self {
        Self {
            id: pool.id.to_hex(),
            public_key: pool.public_key.to_b58(),
            owner: pool.owner.to_b58(),
            pool_type: pool.pool_type.as_str().to_string(),
            name: pool.name.clone(),
            funding_state: format!("{:?}", pool.funding_state),
            total_payments: pool.total_payments,
            total_sol_recovered: pool.total_sol_recovered,
            agent_count: pool.agent_count,
            recovery_pool: pool.recovery_pool.map(|a| a.to_b58()),
            created_at: pool.created_at,
            locked,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcPoolCreated {
    pub pool: RpcPool,
    /// Hex-encoded funding transaction, present on first creation.
    pub funding_tx: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcPoolStats {
    pub pool: RpcPool,
    pub lamports: u64,
    pub asset_micros: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcUnlockReport {
    pub pool_id: String,
    pub unlocked: bool,
    /// Recovery hint carried when the pool is unrecoverable.
    pub public_key: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcOrphan {
    pub public_key: String,
    pub lamports: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcSession {
    pub public_key: String,
    pub owner: String,
    pub agent_id: String,
    pub pool_id: String,
    pub pool_address: String,
    pub granted_at: i64,
    pub expires_at: i64,
    pub max_per_transaction: u64,
    pub daily_limit: u64,
    pub spent_today: u64,
    pub remaining_daily: u64,
    pub status: String,
}

impl From<&SessionKey> for RpcSession {
    fn from(s: &SessionKey) -> Self {
        Self {
            public_key: s.public_key.to_b58(),
            owner: s.owner.to_b58(),
            agent_id: s.agent_id.to_hex(),
            pool_id: s.pool_id.to_hex(),
            pool_address: s.pool_address.to_b58(),
            granted_at: s.granted_at,
            expires_at: s.expires_at,
            max_per_transaction: s.limits.max_per_transaction,
            daily_limit: s.limits.daily_limit,
            spent_today: s.spent_today,
            remaining_daily: s.remaining_daily(),
            status: format!("{:?}", s.status),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcLeg {
    pub kind: String,
    pub signature: Option<String>,
    pub timestamp: i64,
}

impl From<&Leg> for RpcLeg {
    fn from(leg: &Leg) -> Self {
        Self {
            kind: format!("{:?}", leg.kind),
            signature: leg.chain_signature.as_ref().map(|s| s.as_str().to_string()),
            timestamp: leg.timestamp,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcPayment {
    pub session_id: String,
    pub owner: String,
    pub pool_id: String,
    pub burner: String,
    pub recipient: String,
    pub amount: u64,
    pub mode: String,
    pub compressed: bool,
    pub state: String,
    pub legs: Vec<RpcLeg>,
    pub failure: Option<ErrorKind>,
}

impl From<&PaymentSession> for RpcPayment {
    fn from(p: &PaymentSession) -> Self {
        Self {
            session_id: p.session_id.to_hex(),
            owner: p.owner.to_b58(),
            pool_id: p.pool_id.to_hex(),
            burner: p.burner.to_b58(),
            recipient: p.recipient.to_b58(),
            amount: p.amount,
            mode: format!("{:?}", p.mode),
            compressed: p.compressed,
            state: format!("{:?}", p.state),
            legs: p.legs.iter().map(RpcLeg::from).collect(),
            failure: p.failure,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRecoveryStatus {
    pub address: String,
    pub balance: u64,
    pub reserved: u64,
    pub available: u64,
    pub total_recovered: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcAgent {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub paused: bool,
    pub pool_link: Option<String>,
    pub max_per_transaction: u64,
    pub daily_limit: u64,
    pub allowed_resources: Vec<String>,
    pub created_at: i64,
    pub last_active: Option<i64>,
}

impl From<&AgentRecord> for RpcAgent {
    fn from(a: &AgentRecord) -> Self {
        Self {
            id: a.id.to_hex(),
            owner: a.owner.to_b58(),
            name: a.name.clone(),
            paused: a.paused,
            pool_link: a.pool_link.map(|p| p.to_hex()),
            max_per_transaction: a.limits.max_per_transaction,
            daily_limit: a.limits.daily_limit,
            allowed_resources: a.limits.allowed_resources.clone(),
            created_at: a.created_at,
            last_active: a.last_active,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcAgentCreated {
    pub agent: RpcAgent,
    /// Returned exactly once; only the hash is persisted.
    pub api_key: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcHealth {
    pub healthy: bool,
    pub supports_compression: bool,
    pub rpc_summary: String,
    pub facilitator_ok: bool,
    pub pool_count: u64,
    pub store_version: u32,
}
