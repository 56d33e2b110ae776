//! Signed-challenge grammar.
//!
//! Every privileged mutation is authorised by an owner signature over a
//! strictly prefixed ASCII message. The grammar is closed: `parse` accepts
//! exactly the renderings produced by [`Challenge::render`] and nothing
//! else, and no two challenge kinds share a valid parse.
//!
//! All timestamped challenges carry a millisecond component validated
//! against [`CHALLENGE_MAX_SKEW_MS`].

use crate::constants::CHALLENGE_MAX_SKEW_MS;
use crate::error::AegixError;
use crate::types::{Address, AgentId, MicroUnits, PoolId, TimestampMs};

// ── Challenge ────────────────────────────────────────────────────────────────

/// One parsed challenge message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    /// `AEGIX_CREATE_POOL::{owner}::{ts}` — Legacy creation.
    CreatePool { owner: Address, ts: TimestampMs },
    /// `AEGIX_MAIN_POOL::{owner}::{ts}` — Main creation.
    MainPool { owner: Address, ts: TimestampMs },
    /// `AEGIX_CUSTOM_POOL::{owner}::{ts}` — Custom creation.
    CustomPool { owner: Address, ts: TimestampMs },
    /// `AEGIX_FUND_POOL::{src}::{tgt}::{amount}::{ts}` — inter-pool funding.
    FundPool {
        source: Address,
        target: Address,
        amount: MicroUnits,
        ts: TimestampMs,
    },
    /// `AEGIX_TRANSFER::{src}::{tgt}::{amount}::{ts}` — deposit/withdraw.
    Transfer {
        source: Address,
        target: Address,
        amount: MicroUnits,
        ts: TimestampMs,
    },
    /// `AEGIX_SESSION_GRANT::{agent_id}::{owner}::{ts}`.
    SessionGrant {
        agent_id: AgentId,
        owner: Address,
        ts: TimestampMs,
    },
    /// `AEGIX_SESSION_REVOKE::{agent_id}::{owner}::{ts}`.
    SessionRevoke {
        agent_id: AgentId,
        owner: Address,
        ts: TimestampMs,
    },
    /// `AEGIX_DELETE_POOL::{pool_id}::{owner}::{ts}`.
    DeletePool {
        pool_id: PoolId,
        owner: Address,
        ts: TimestampMs,
    },
    /// `AEGIX_EXPORT_KEY::{pool_id}::{owner}::{ts}` — audited export intent.
    ExportKey {
        pool_id: PoolId,
        owner: Address,
        ts: TimestampMs,
    },
    /// `DECRYPT_POOL_KEY_{pool_id}` — exact match, no timestamp. The vault
    /// releases a secret only against a signature over this message.
    DecryptPoolKey { pool_id: PoolId },
}

impl Challenge {
    /// Render the canonical ASCII message the owner must sign.
    pub fn render(&self) -> String {
        match self {
            Challenge::CreatePool { owner, ts } => {
                format!("AEGIX_CREATE_POOL::{}::{}", owner.to_b58(), ts)
            }
            Challenge::MainPool { owner, ts } => {
                format!("AEGIX_MAIN_POOL::{}::{}", owner.to_b58(), ts)
            }
            Challenge::CustomPool { owner, ts } => {
                format!("AEGIX_CUSTOM_POOL::{}::{}", owner.to_b58(), ts)
            }
            Challenge::FundPool {
                source,
                target,
                amount,
                ts,
            } => format!(
                "AEGIX_FUND_POOL::{}::{}::{}::{}",
                source.to_b58(),
                target.to_b58(),
                amount,
                ts
            ),
            Challenge::Transfer {
                source,
                target,
                amount,
                ts,
            } => format!(
                "AEGIX_TRANSFER::{}::{}::{}::{}",
                source.to_b58(),
                target.to_b58(),
                amount,
                ts
            ),
            Challenge::SessionGrant {
                agent_id,
                owner,
                ts,
            } => format!(
                "AEGIX_SESSION_GRANT::{}::{}::{}",
                agent_id.to_hex(),
                owner.to_b58(),
                ts
            ),
            Challenge::SessionRevoke {
                agent_id,
                owner,
                ts,
            } => format!(
                "AEGIX_SESSION_REVOKE::{}::{}::{}",
                agent_id.to_hex(),
                owner.to_b58(),
                ts
            ),
            Challenge::DeletePool { pool_id, owner, ts } => format!(
                "AEGIX_DELETE_POOL::{}::{}::{}",
                pool_id.to_hex(),
                owner.to_b58(),
                ts
            ),
            Challenge::ExportKey { pool_id, owner, ts } => format!(
                "AEGIX_EXPORT_KEY::{}::{}::{}",
                pool_id.to_hex(),
                owner.to_b58(),
                ts
            ),
            Challenge::DecryptPoolKey { pool_id } => {
                format!("DECRYPT_POOL_KEY_{}", pool_id.to_hex())
            }
        }
    }

    /// The timestamp component, if this challenge kind carries one.
    pub fn timestamp(&self) -> Option<TimestampMs> {
        match self {
            Challenge::CreatePool { ts, .. }
            | Challenge::MainPool { ts, .. }
            | Challenge::CustomPool { ts, .. }
            | Challenge::FundPool { ts, .. }
            | Challenge::Transfer { ts, .. }
            | Challenge::SessionGrant { ts, .. }
            | Challenge::SessionRevoke { ts, .. }
            | Challenge::DeletePool { ts, .. }
            | Challenge::ExportKey { ts, .. } => Some(*ts),
            Challenge::DecryptPoolKey { .. } => None,
        }
    }

    /// Reject a timestamped challenge whose clock skew exceeds the bound.
    pub fn check_skew(&self, now_ms: TimestampMs) -> Result<(), AegixError> {
        if let Some(ts) = self.timestamp() {
            if (now_ms - ts).abs() > CHALLENGE_MAX_SKEW_MS {
                return Err(AegixError::ChallengeExpired {
                    skew_ms: CHALLENGE_MAX_SKEW_MS,
                });
            }
        }
        Ok(())
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

fn parse_ts(s: &str) -> Result<TimestampMs, AegixError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AegixError::MalformedChallenge(format!(
            "bad timestamp field {s:?}"
        )));
    }
    s.parse::<i64>()
        .map_err(|e| AegixError::MalformedChallenge(e.to_string()))
}

fn parse_amount(s: &str) -> Result<MicroUnits, AegixError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AegixError::MalformedChallenge(format!(
            "bad amount field {s:?}"
        )));
    }
    s.parse::<u64>()
        .map_err(|e| AegixError::MalformedChallenge(e.to_string()))
}

fn fields<'a, const N: usize>(rest: &'a str, prefix: &str) -> Result<[&'a str; N], AegixError> {
    let parts: Vec<&str> = rest.split("::").collect();
    if parts.len() != N {
        return Err(AegixError::MalformedChallenge(format!(
            "{prefix} expects {N} fields, got {}",
            parts.len()
        )));
    }
    let mut arr = [""; N];
    arr.copy_from_slice(&parts);
    Ok(arr)
}

/// Parse a challenge message. Any deviation from the closed grammar is
/// rejected with `MalformedChallenge`.
pub fn parse(message: &str) -> Result<Challenge, AegixError> {
    if !message.is_ascii() {
        return Err(AegixError::MalformedChallenge(
            "non-ASCII challenge".to_string(),
        ));
    }

    if let Some(rest) = message.strip_prefix("DECRYPT_POOL_KEY_") {
        let pool_id = PoolId::from_hex(rest)
            .map_err(|_| AegixError::MalformedChallenge("bad pool id".to_string()))?;
        return Ok(Challenge::DecryptPoolKey { pool_id });
    }

    let (prefix, rest) = message
        .split_once("::")
        .ok_or_else(|| AegixError::MalformedChallenge("missing separator".to_string()))?;

    match prefix {
        "AEGIX_CREATE_POOL" | "AEGIX_MAIN_POOL" | "AEGIX_CUSTOM_POOL" => {
            let [owner, ts] = fields::<2>(rest, prefix)?;
            let owner = Address::from_b58(owner)?;
            let ts = parse_ts(ts)?;
            Ok(match prefix {
                "AEGIX_CREATE_POOL" => Challenge::CreatePool { owner, ts },
                "AEGIX_MAIN_POOL" => Challenge::MainPool { owner, ts },
                _ => Challenge::CustomPool { owner, ts },
            })
        }
        "AEGIX_FUND_POOL" | "AEGIX_TRANSFER" => {
            let [source, target, amount, ts] = fields::<4>(rest, prefix)?;
            let source = Address::from_b58(source)?;
            let target = Address::from_b58(target)?;
            let amount = parse_amount(amount)?;
            let ts = parse_ts(ts)?;
            Ok(if prefix == "AEGIX_FUND_POOL" {
                Challenge::FundPool {
                    source,
                    target,
                    amount,
                    ts,
                }
            } else {
                Challenge::Transfer {
                    source,
                    target,
                    amount,
                    ts,
                }
            })
        }
        "AEGIX_SESSION_GRANT" | "AEGIX_SESSION_REVOKE" => {
            let [agent, owner, ts] = fields::<3>(rest, prefix)?;
            let agent_id = AgentId::from_hex(agent)
                .map_err(|_| AegixError::MalformedChallenge("bad agent id".to_string()))?;
            let owner = Address::from_b58(owner)?;
            let ts = parse_ts(ts)?;
            Ok(if prefix == "AEGIX_SESSION_GRANT" {
                Challenge::SessionGrant {
                    agent_id,
                    owner,
                    ts,
                }
            } else {
                Challenge::SessionRevoke {
                    agent_id,
                    owner,
                    ts,
                }
            })
        }
        "AEGIX_DELETE_POOL" | "AEGIX_EXPORT_KEY" => {
            let [pool, owner, ts] = fields::<3>(rest, prefix)?;
            let pool_id = PoolId::from_hex(pool)
                .map_err(|_| AegixError::MalformedChallenge("bad pool id".to_string()))?;
            let owner = Address::from_b58(owner)?;
            let ts = parse_ts(ts)?;
            Ok(if prefix == "AEGIX_DELETE_POOL" {
                Challenge::DeletePool { pool_id, owner, ts }
            } else {
                Challenge::ExportKey { pool_id, owner, ts }
            })
        }
        other => Err(AegixError::MalformedChallenge(format!(
            "unknown prefix {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Address {
        Address::from_bytes([9u8; 32])
    }

    #[test]
    fn round_trip_every_kind() {
        let pool_id = PoolId([1u8; 16]);
        let agent_id = AgentId([2u8; 16]);
        let cases = vec![
            Challenge::CreatePool {
                owner: owner(),
                ts: 1_700_000_000_000,
            },
            Challenge::MainPool {
                owner: owner(),
                ts: 1_700_000_001_000,
            },
            Challenge::CustomPool {
                owner: owner(),
                ts: 1,
            },
            Challenge::FundPool {
                source: owner(),
                target: Address::from_bytes([3u8; 32]),
                amount: 42,
                ts: 7,
            },
            Challenge::Transfer {
                source: owner(),
                target: Address::from_bytes([3u8; 32]),
                amount: 99,
                ts: 8,
            },
            Challenge::SessionGrant {
                agent_id,
                owner: owner(),
                ts: 5,
            },
            Challenge::SessionRevoke {
                agent_id,
                owner: owner(),
                ts: 6,
            },
            Challenge::DeletePool {
                pool_id,
                owner: owner(),
                ts: 9,
            },
            Challenge::ExportKey {
                pool_id,
                owner: owner(),
                ts: 10,
            },
            Challenge::DecryptPoolKey { pool_id },
        ];
        for c in cases {
            let parsed = parse(&c.render()).expect("round trip");
            assert_eq!(parsed, c);
        }
    }

    #[test]
    fn distinct_kinds_never_share_a_parse() {
        // Same fields under every prefix parse to different variants.
        let a = parse(&format!("AEGIX_CREATE_POOL::{}::100", owner().to_b58())).unwrap();
        let b = parse(&format!("AEGIX_MAIN_POOL::{}::100", owner().to_b58())).unwrap();
        let c = parse(&format!("AEGIX_CUSTOM_POOL::{}::100", owner().to_b58())).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn rejects_extra_fields() {
        let msg = format!("AEGIX_CREATE_POOL::{}::100::extra", owner().to_b58());
        assert!(parse(&msg).is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(parse("AEGIX_CREATE_POOL::only-one").is_err());
        assert!(parse("AEGIX_FUND_POOL::a::b").is_err());
    }

    #[test]
    fn rejects_unknown_prefix() {
        let msg = format!("AEGIX_NUKE_POOL::{}::100", owner().to_b58());
        assert!(parse(&msg).is_err());
    }

    #[test]
    fn rejects_negative_and_non_numeric_timestamps() {
        let msg = format!("AEGIX_CREATE_POOL::{}::-5", owner().to_b58());
        assert!(parse(&msg).is_err());
        let msg = format!("AEGIX_CREATE_POOL::{}::12x", owner().to_b58());
        assert!(parse(&msg).is_err());
    }

    #[test]
    fn decrypt_challenge_is_exact_match() {
        let pool_id = PoolId([1u8; 16]);
        let good = format!("DECRYPT_POOL_KEY_{}", pool_id.to_hex());
        assert!(parse(&good).is_ok());
        assert!(parse(&format!("{good}x")).is_err());
        assert!(parse("DECRYPT_POOL_KEY_").is_err());
    }

    #[test]
    fn skew_bound_is_enforced() {
        let c = Challenge::CreatePool {
            owner: owner(),
            ts: 1_700_000_000_000,
        };
        assert!(c.check_skew(1_700_000_000_000 + CHALLENGE_MAX_SKEW_MS).is_ok());
        assert!(c
            .check_skew(1_700_000_000_000 + CHALLENGE_MAX_SKEW_MS + 1)
            .is_err());
        // Untimestamped challenges never expire.
        let d = Challenge::DecryptPoolKey {
            pool_id: PoolId([0u8; 16]),
        };
        assert!(d.check_skew(i64::MAX).is_ok());
    }
}
