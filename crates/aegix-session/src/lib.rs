//! aegix-session
//!
//! Session-key lifecycle: owner-granted, time-bounded, limits-bounded
//! authority for an agent to spend from a Custom pool without per-payment
//! owner signatures. Grants issue a fresh keypair whose public key is both
//! the session authority and the Custom-pool address; public keys are never
//! reused across grants.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use aegix_core::challenge::Challenge;
use aegix_core::constants::{SESSION_DAY_SECS, SESSION_MAX_DURATION_SECS};
use aegix_core::error::AegixError;
use aegix_core::session::{SessionKey, SessionLimits, SessionStatus};
use aegix_core::types::{Address, AgentId, MicroUnits, PoolId, TimestampMs};
use aegix_crypto::keypair::{verify_signature, KeyPair};
use aegix_store::GatewayStore;

const DAY_MS: i64 = SESSION_DAY_SECS * 1000;
const MAX_DURATION_MS: i64 = SESSION_MAX_DURATION_SECS * 1000;

/// Successful validation outcome: the daily headroom left after the checked
/// amount would be spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Validated {
    pub remaining_daily_limit: MicroUnits,
}

pub struct SessionKeyManager {
    store: Arc<GatewayStore>,
    /// All write paths run inside this lock for a bounded section.
    sessions: Mutex<HashMap<Address, SessionKey>>,
}

impl SessionKeyManager {
    /// Load persisted sessions and open for grants.
    pub fn open(store: Arc<GatewayStore>) -> Result<Self, AegixError> {
        let mut sessions = HashMap::new();
        // Sessions persist through the same store as pool metadata; rebuild
        // the in-memory view from every owner's records.
        for session in store.iter_all_sessions()? {
            sessions.insert(session.public_key, session);
        }
        Ok(Self {
            store,
            sessions: Mutex::new(sessions),
        })
    }

    // ── Grant ────────────────────────────────────────────────────────────────

    /// Issue a session for `agent_id`, authorised by an owner signature over
    /// `AEGIX_SESSION_GRANT::{agent_id}::{owner}::{ts}`. Durations beyond
    /// the documented bound are clamped, never rejected.
    #[allow(clippy::too_many_arguments)]
    pub fn grant(
        &self,
        owner: Address,
        agent_id: AgentId,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        limits: SessionLimits,
        duration_secs: i64,
        now: TimestampMs,
    ) -> Result<(SessionKey, KeyPair), AegixError> {
        let challenge = Challenge::SessionGrant {
            agent_id,
            owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(&owner, challenge.render().as_bytes(), signature)?;
        limits.validate()?;
        if duration_secs <= 0 {
            return Err(AegixError::InvalidIdentifier(
                "session duration must be positive".to_string(),
            ));
        }

        let duration_ms = (duration_secs * 1000).min(MAX_DURATION_MS);
        let keypair = KeyPair::generate();
        let session = SessionKey {
            public_key: keypair.address,
            owner,
            agent_id,
            pool_id: PoolId::from_public_key(&keypair.address),
            pool_address: keypair.address,
            granted_at: now,
            expires_at: now + duration_ms,
            limits,
            spent_today: 0,
            day_start: now,
            status: SessionStatus::Active,
        };

        let mut sessions = self.sessions.lock().expect("session lock");
        self.store.put_session(&session)?;
        sessions.insert(session.public_key, session.clone());
        info!(session = %session.public_key.short(), agent = %agent_id, "session granted");
        Ok((session, keypair))
    }

    // ── Validate / debit ─────────────────────────────────────────────────────

    fn rolled(session: &SessionKey, now: TimestampMs) -> (TimestampMs, MicroUnits) {
        if now - session.day_start >= DAY_MS {
            let days = (now - session.day_start) / DAY_MS;
            (session.day_start + days * DAY_MS, 0)
        } else {
            (session.day_start, session.spent_today)
        }
    }

    fn check(session: &SessionKey, amount: MicroUnits, now: TimestampMs) -> Result<Validated, AegixError> {
        match session.refreshed(now) {
            SessionStatus::Active => {}
            SessionStatus::Expired => return Err(AegixError::SessionExpired),
            SessionStatus::Revoked => return Err(AegixError::SessionRevoked),
        }
        if amount == 0 {
            return Err(AegixError::ZeroAmount);
        }
        if amount > session.limits.max_per_transaction {
            return Err(AegixError::PerTransactionCapExceeded {
                max: session.limits.max_per_transaction,
                got: amount,
            });
        }
        let (_, spent) = Self::rolled(session, now);
        let spent_after = spent.saturating_add(amount);
        if spent_after > session.limits.daily_limit {
            return Err(AegixError::LimitExceeded {
                remaining_daily: session.limits.daily_limit.saturating_sub(spent),
            });
        }
        Ok(Validated {
            remaining_daily_limit: session.limits.daily_limit - spent_after,
        })
    }

    /// Check a prospective spend against the session caps without mutating.
    pub fn validate(
        &self,
        session_pk: &Address,
        amount: MicroUnits,
        now: TimestampMs,
    ) -> Result<Validated, AegixError> {
        let sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get(session_pk)
            .ok_or_else(|| AegixError::SessionNotFound(session_pk.short()))?;
        Self::check(session, amount, now)
    }

    /// Validate and record a spend, rolling the day window forward when the
    /// wall-clock day has changed.
    pub fn debit(
        &self,
        session_pk: &Address,
        amount: MicroUnits,
        now: TimestampMs,
    ) -> Result<Validated, AegixError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_pk)
            .ok_or_else(|| AegixError::SessionNotFound(session_pk.short()))?;
        let validated = Self::check(session, amount, now)?;

        let (day_start, spent) = Self::rolled(session, now);
        session.day_start = day_start;
        session.spent_today = spent + amount;
        self.store.put_session(session)?;
        Ok(validated)
    }

    /// Undo a debit after a failed payment so the caller is not charged for
    /// value that never moved.
    pub fn credit(
        &self,
        session_pk: &Address,
        amount: MicroUnits,
    ) -> Result<(), AegixError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        if let Some(session) = sessions.get_mut(session_pk) {
            session.spent_today = session.spent_today.saturating_sub(amount);
            self.store.put_session(session)?;
        }
        Ok(())
    }

    // ── Refresh / revoke ─────────────────────────────────────────────────────

    /// Pure status recomputation, persisted if it changed.
    pub fn refresh(&self, session_pk: &Address, now: TimestampMs) -> Result<SessionStatus, AegixError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_pk)
            .ok_or_else(|| AegixError::SessionNotFound(session_pk.short()))?;
        let status = session.refreshed(now);
        if status != session.status {
            session.status = status;
            self.store.put_session(session)?;
        }
        Ok(status)
    }

    /// Revoke, authorised by an owner signature over
    /// `AEGIX_SESSION_REVOKE::{agent_id}::{owner}::{ts}`.
    pub fn revoke(
        &self,
        session_pk: &Address,
        owner: Address,
        challenge_ts: TimestampMs,
        signature: &[u8; 64],
        now: TimestampMs,
    ) -> Result<(), AegixError> {
        let mut sessions = self.sessions.lock().expect("session lock");
        let session = sessions
            .get_mut(session_pk)
            .ok_or_else(|| AegixError::SessionNotFound(session_pk.short()))?;
        if session.owner != owner {
            return Err(AegixError::NotOwner);
        }
        let challenge = Challenge::SessionRevoke {
            agent_id: session.agent_id,
            owner,
            ts: challenge_ts,
        };
        challenge.check_skew(now)?;
        verify_signature(&owner, challenge.render().as_bytes(), signature)?;

        session.status = SessionStatus::Revoked;
        self.store.put_session(session)?;
        info!(session = %session_pk.short(), "session revoked");
        Ok(())
    }

    pub fn get(&self, session_pk: &Address) -> Option<SessionKey> {
        self.sessions
            .lock()
            .expect("session lock")
            .get(session_pk)
            .cloned()
    }

    pub fn list_for_owner(&self, owner: &Address) -> Vec<SessionKey> {
        self.sessions
            .lock()
            .expect("session lock")
            .values()
            .filter(|s| s.owner == *owner)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: TimestampMs = 1_700_000_000_000;

    fn temp_store(name: &str) -> Arc<GatewayStore> {
        let dir = std::env::temp_dir().join(format!("aegix_session_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        Arc::new(GatewayStore::open(&dir).unwrap())
    }

    fn grant_session(
        manager: &SessionKeyManager,
        owner: &KeyPair,
        limits: SessionLimits,
        duration_secs: i64,
    ) -> SessionKey {
        let agent_id = AgentId::generate();
        let challenge = Challenge::SessionGrant {
            agent_id,
            owner: owner.address,
            ts: NOW,
        };
        let sig = owner.sign(challenge.render().as_bytes());
        let (session, _kp) = manager
            .grant(owner.address, agent_id, NOW, &sig, limits, duration_secs, NOW)
            .unwrap();
        session
    }

    #[test]
    fn debit_sequence_hits_daily_limit_with_zero_remaining() {
        let manager = SessionKeyManager::open(temp_store("debits")).unwrap();
        let owner = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 2_000_000,
                daily_limit: 5_000_000,
            },
            3_600,
        );
        let pk = session.public_key;

        assert_eq!(
            manager.debit(&pk, 2_000_000, NOW).unwrap().remaining_daily_limit,
            3_000_000
        );
        assert_eq!(
            manager.debit(&pk, 2_000_000, NOW).unwrap().remaining_daily_limit,
            1_000_000
        );
        assert_eq!(
            manager.debit(&pk, 1_000_000, NOW).unwrap().remaining_daily_limit,
            0
        );
        match manager.debit(&pk, 1, NOW).unwrap_err() {
            AegixError::LimitExceeded { remaining_daily } => assert_eq!(remaining_daily, 0),
            other => panic!("expected LimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn per_transaction_cap_checked_before_daily() {
        let manager = SessionKeyManager::open(temp_store("cap")).unwrap();
        let owner = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 100,
                daily_limit: 1_000,
            },
            3_600,
        );
        assert!(matches!(
            manager.validate(&session.public_key, 101, NOW),
            Err(AegixError::PerTransactionCapExceeded { max: 100, got: 101 })
        ));
    }

    #[test]
    fn day_rollover_resets_spend() {
        let manager = SessionKeyManager::open(temp_store("rollover")).unwrap();
        let owner = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 500,
                daily_limit: 500,
            },
            30 * 24 * 3_600,
        );
        let pk = session.public_key;

        manager.debit(&pk, 500, NOW).unwrap();
        assert!(manager.validate(&pk, 1, NOW).is_err());

        let tomorrow = NOW + DAY_MS;
        assert_eq!(
            manager.debit(&pk, 500, tomorrow).unwrap().remaining_daily_limit,
            0
        );
        let stored = manager.get(&pk).unwrap();
        assert_eq!(stored.day_start, NOW + DAY_MS);
    }

    #[test]
    fn durations_are_clamped_to_the_bound() {
        let manager = SessionKeyManager::open(temp_store("clamp")).unwrap();
        let owner = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 1,
                daily_limit: 1,
            },
            365 * 24 * 3_600,
        );
        assert_eq!(session.expires_at, NOW + MAX_DURATION_MS);
    }

    #[test]
    fn expired_session_rejects_and_refresh_reports_it() {
        let manager = SessionKeyManager::open(temp_store("expiry")).unwrap();
        let owner = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 10,
                daily_limit: 10,
            },
            3_600,
        );
        let pk = session.public_key;
        let later = NOW + 3_600_000;

        assert!(matches!(
            manager.validate(&pk, 1, later),
            Err(AegixError::SessionExpired)
        ));
        assert_eq!(manager.refresh(&pk, later).unwrap(), SessionStatus::Expired);
    }

    #[test]
    fn revoke_requires_the_owner_signature() {
        let manager = SessionKeyManager::open(temp_store("revoke")).unwrap();
        let owner = KeyPair::generate();
        let stranger = KeyPair::generate();
        let session = grant_session(
            &manager,
            &owner,
            SessionLimits {
                max_per_transaction: 10,
                daily_limit: 10,
            },
            3_600,
        );
        let pk = session.public_key;

        let revoke = Challenge::SessionRevoke {
            agent_id: session.agent_id,
            owner: owner.address,
            ts: NOW,
        };
        let forged = stranger.sign(revoke.render().as_bytes());
        assert!(manager.revoke(&pk, owner.address, NOW, &forged, NOW).is_err());

        let genuine = owner.sign(revoke.render().as_bytes());
        manager.revoke(&pk, owner.address, NOW, &genuine, NOW).unwrap();
        assert!(matches!(
            manager.validate(&pk, 1, NOW),
            Err(AegixError::SessionRevoked)
        ));
    }

    #[test]
    fn grants_never_reuse_public_keys() {
        let manager = SessionKeyManager::open(temp_store("reuse")).unwrap();
        let owner = KeyPair::generate();
        let limits = SessionLimits {
            max_per_transaction: 1,
            daily_limit: 1,
        };
        let a = grant_session(&manager, &owner, limits, 60);
        let b = grant_session(&manager, &owner, limits, 60);
        assert_ne!(a.public_key, b.public_key);
    }
}
