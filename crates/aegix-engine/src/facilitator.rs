//! Gasless-payment facilitator client.
//!
//! The facilitator advertises a fee payer per network on `GET /supported`
//! and settles partial-signed transfers on `POST /settle` against a
//! payment-payload / payment-requirements pair. A settle that is accepted
//! but never yields a signature is a `ChainError` after the deadline and is
//! NOT retried here — a second settle risks double settlement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use aegix_core::constants::FEE_PAYER_CACHE_SECS;
use aegix_core::error::AegixError;
use aegix_core::types::{Address, ChainSignature, MicroUnits};

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SupportedNetwork {
    pub network: String,
    #[serde(rename = "feePayer")]
    pub fee_payer: String,
}

/// The partial-signed transaction handed to the facilitator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// Hex-encoded partial-signed transaction.
    pub transaction: String,
}

/// What the facilitator must verify before co-signing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRequirements {
    pub network: String,
    pub recipient: String,
    pub amount: MicroUnits,
    pub mint: String,
}

// ── Facilitator ──────────────────────────────────────────────────────────────

#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn supported(&self) -> Result<Vec<SupportedNetwork>, AegixError>;

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ChainSignature, AegixError>;
}

// ── HttpFacilitator ──────────────────────────────────────────────────────────

pub struct HttpFacilitator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpFacilitator {
    pub fn new(base_url: &str, settle_deadline: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(settle_deadline)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    async fn supported(&self) -> Result<Vec<SupportedNetwork>, AegixError> {
        let resp = self
            .client
            .get(format!("{}/supported", self.base_url))
            .send()
            .await
            .map_err(|e| AegixError::FacilitatorUnavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| AegixError::FacilitatorUnavailable(e.to_string()))
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ChainSignature, AegixError> {
        let body = serde_json::json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        let resp = self
            .client
            .post(format!("{}/settle", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    // Accepted-but-silent is indistinguishable from lost: do
                    // not resubmit.
                    AegixError::ConfirmationTimeout("facilitator settle".to_string())
                } else {
                    AegixError::FacilitatorUnavailable(e.to_string())
                }
            })?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AegixError::FacilitatorUnavailable(e.to_string()))?;
        match json["signature"].as_str() {
            Some(sig) if !sig.is_empty() => Ok(ChainSignature(sig.to_string())),
            _ => {
                warn!("facilitator settle returned no signature");
                Err(AegixError::ConfirmationTimeout(
                    "facilitator settle".to_string(),
                ))
            }
        }
    }
}

// ── FacilitatorGateway ───────────────────────────────────────────────────────

/// Caches the fee-payer lookup for [`FEE_PAYER_CACHE_SECS`] so the engine's
/// mode choice doesn't hammer `/supported`.
pub struct FacilitatorGateway {
    inner: std::sync::Arc<dyn Facilitator>,
    cache: Mutex<HashMap<String, (Instant, Option<Address>)>>,
}

impl FacilitatorGateway {
    pub fn new(inner: std::sync::Arc<dyn Facilitator>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The advertised fee payer for `network`, or `None` when the
    /// facilitator is down or does not support it.
    pub async fn fee_payer_for(&self, network: &str) -> Option<Address> {
        {
            let cache = self.cache.lock().expect("facilitator cache lock");
            if let Some((at, cached)) = cache.get(network) {
                if at.elapsed() < Duration::from_secs(FEE_PAYER_CACHE_SECS) {
                    return *cached;
                }
            }
        }

        let fee_payer = match self.inner.supported().await {
            Ok(networks) => networks
                .iter()
                .find(|n| n.network == network)
                .and_then(|n| Address::from_b58(&n.fee_payer).ok()),
            Err(e) => {
                warn!(error = %e, "facilitator supported lookup failed");
                None
            }
        };
        self.cache
            .lock()
            .expect("facilitator cache lock")
            .insert(network.to_string(), (Instant::now(), fee_payer));
        fee_payer
    }

    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ChainSignature, AegixError> {
        self.inner.settle(payload, requirements).await
    }
}
