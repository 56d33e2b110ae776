//! Session-key types: owner-issued, time-bounded, limits-bounded authority
//! for an agent to spend from a pool without per-payment owner signatures.

use serde::{Deserialize, Serialize};

use crate::error::AegixError;
use crate::types::{Address, AgentId, MicroUnits, PoolId, TimestampMs};

// ── SessionLimits ────────────────────────────────────────────────────────────

/// Spending caps in micro-units. `max_per_transaction ≤ daily_limit` is
/// validated at grant time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    pub max_per_transaction: MicroUnits,
    pub daily_limit: MicroUnits,
}

impl SessionLimits {
    pub fn validate(&self) -> Result<(), AegixError> {
        if self.max_per_transaction == 0 || self.daily_limit == 0 {
            return Err(AegixError::ZeroAmount);
        }
        if self.max_per_transaction > self.daily_limit {
            return Err(AegixError::LimitsInvalid);
        }
        Ok(())
    }
}

// ── SessionStatus ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

// ── SessionKey ───────────────────────────────────────────────────────────────

/// A granted session. The session public key doubles as the Custom-pool
/// address the agent spends from; public keys are never reused across grants.
///
/// `pool_id` and `pool_address` are jointly present: a session always knows
/// both the registry id and the chain address of its pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionKey {
    pub public_key: Address,
    pub owner: Address,
    pub agent_id: AgentId,
    pub pool_id: PoolId,
    pub pool_address: Address,
    pub granted_at: TimestampMs,
    pub expires_at: TimestampMs,
    pub limits: SessionLimits,
    pub spent_today: MicroUnits,
    /// Wall-clock boundary at which `spent_today` resets.
    pub day_start: TimestampMs,
    pub status: SessionStatus,
}

impl SessionKey {
    /// Recompute status from the clock without touching spend counters.
    pub fn refreshed(&self, now: TimestampMs) -> SessionStatus {
        match self.status {
            SessionStatus::Revoked => SessionStatus::Revoked,
            _ if now >= self.expires_at => SessionStatus::Expired,
            _ => SessionStatus::Active,
        }
    }

    pub fn remaining_daily(&self) -> MicroUnits {
        self.limits.daily_limit.saturating_sub(self.spent_today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_reject_inverted_caps() {
        let limits = SessionLimits {
            max_per_transaction: 10,
            daily_limit: 5,
        };
        assert!(matches!(limits.validate(), Err(AegixError::LimitsInvalid)));
    }

    #[test]
    fn refresh_is_pure_status_recomputation() {
        let session = SessionKey {
            public_key: Address::from_bytes([1u8; 32]),
            owner: Address::from_bytes([2u8; 32]),
            agent_id: AgentId([3u8; 16]),
            pool_id: PoolId([4u8; 16]),
            pool_address: Address::from_bytes([1u8; 32]),
            granted_at: 0,
            expires_at: 1_000,
            limits: SessionLimits {
                max_per_transaction: 1,
                daily_limit: 2,
            },
            spent_today: 0,
            day_start: 0,
            status: SessionStatus::Active,
        };
        assert_eq!(session.refreshed(999), SessionStatus::Active);
        assert_eq!(session.refreshed(1_000), SessionStatus::Expired);
    }
}
