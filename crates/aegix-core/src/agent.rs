//! Agent records: owner-scoped identities bearing hashed API keys and
//! spending caps, linked to a Custom pool by id.

use serde::{Deserialize, Serialize};

use crate::types::{Address, AgentId, MicroUnits, PoolId, TimestampMs};

// ── SpendingLimits ───────────────────────────────────────────────────────────

/// Per-agent caps. These compose with session-key limits: a payment must
/// pass both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingLimits {
    pub max_per_transaction: MicroUnits,
    pub daily_limit: MicroUnits,
    /// Recipient allow-list; empty means unrestricted.
    #[serde(default)]
    pub allowed_resources: Vec<String>,
}

// ── AgentRecord ──────────────────────────────────────────────────────────────

/// Durable agent state. Only the BLAKE3 hash of the API key is stored; the
/// raw key is surfaced once at creation and under owner-gated reveal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub owner: Address,
    pub name: String,
    pub api_key_hash: [u8; 32],
    pub limits: SpendingLimits,
    /// The Custom pool this agent spends from, once linked.
    pub pool_link: Option<PoolId>,
    pub paused: bool,
    pub created_at: TimestampMs,
    pub last_active: Option<TimestampMs>,
    /// Micro-units spent by this agent in the current day window.
    #[serde(default)]
    pub spent_today: MicroUnits,
    #[serde(default)]
    pub day_start: TimestampMs,
}

// ── AgentContext ─────────────────────────────────────────────────────────────

/// Attached to downstream calls by the authentication middleware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentContext {
    pub agent_id: AgentId,
    pub owner: Address,
}
