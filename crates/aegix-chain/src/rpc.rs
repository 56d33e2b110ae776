//! The chain-RPC capability: account reads, transaction broadcast and
//! confirmation. Consumed as a trait so the engine can run against the HTTP
//! endpoint in production and an in-memory double in tests.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use aegix_core::error::AegixError;
use aegix_core::types::{Address, ChainSignature, Lamports, MicroUnits};

use crate::tx::{Blockhash, PreparedTransaction};

// ── ChainRpc ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Native balance in lamports; 0 for unknown accounts.
    async fn get_balance(&self, address: &Address) -> Result<Lamports, AegixError>;

    /// Balance of a token account in micro-units; 0 if the account is absent.
    async fn get_token_balance(&self, token_account: &Address) -> Result<MicroUnits, AegixError>;

    /// Whether the associated token account for `(owner, mint)` exists.
    async fn token_account_exists(&self, owner: &Address, mint: &Address)
        -> Result<bool, AegixError>;

    /// The latest blockhash and the block height it was observed at.
    async fn latest_blockhash(&self) -> Result<(Blockhash, u64), AegixError>;

    /// Broadcast a fully signed transaction. `skip_preflight` is set on
    /// every leg except the payment leg.
    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        skip_preflight: bool,
    ) -> Result<ChainSignature, AegixError>;

    /// Await confirmation of `signature`, bounded by `deadline`.
    async fn confirm(
        &self,
        signature: &ChainSignature,
        deadline: Duration,
    ) -> Result<(), AegixError>;

    /// Broadcast and confirm in one step.
    async fn send_and_confirm(
        &self,
        tx: &PreparedTransaction,
        skip_preflight: bool,
        deadline: Duration,
    ) -> Result<ChainSignature, AegixError> {
        let sig = self.send_transaction(tx, skip_preflight).await?;
        self.confirm(&sig, deadline).await?;
        Ok(sig)
    }
}

// ── HttpChainRpc ─────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 client for the chain endpoint.
///
/// Raw HTTP POST with serde_json keeps the client lean; the capability trait
/// is the seam everything else programs against.
pub struct HttpChainRpc {
    url: String,
    client: reqwest::Client,
}

impl HttpChainRpc {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, AegixError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AegixError::RpcTransport(e.to_string()))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AegixError::RpcTransport(e.to_string()))?;

        if let Some(err) = json.get("error") {
            return Err(AegixError::TxRejected(err.to_string()));
        }
        Ok(json["result"].clone())
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn get_balance(&self, address: &Address) -> Result<Lamports, AegixError> {
        let result = self
            .call("getBalance", serde_json::json!([address.to_b58()]))
            .await?;
        Ok(result["value"].as_u64().unwrap_or(0))
    }

    async fn get_token_balance(&self, token_account: &Address) -> Result<MicroUnits, AegixError> {
        let result = self
            .call(
                "getTokenAccountBalance",
                serde_json::json!([token_account.to_b58()]),
            )
            .await?;
        let amount = result["value"]["amount"].as_str().unwrap_or("0");
        amount
            .parse::<u64>()
            .map_err(|e| AegixError::RpcTransport(format!("bad token amount: {e}")))
    }

    async fn token_account_exists(
        &self,
        owner: &Address,
        mint: &Address,
    ) -> Result<bool, AegixError> {
        let result = self
            .call(
                "getTokenAccountsByOwner",
                serde_json::json!([
                    owner.to_b58(),
                    { "mint": mint.to_b58() },
                    { "encoding": "base64" }
                ]),
            )
            .await?;
        Ok(result["value"]
            .as_array()
            .map(|accounts| !accounts.is_empty())
            .unwrap_or(false))
    }

    async fn latest_blockhash(&self) -> Result<(Blockhash, u64), AegixError> {
        let result = self
            .call("getLatestBlockhash", serde_json::json!([]))
            .await?;
        let hash_str = result["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| AegixError::RpcTransport("missing blockhash".to_string()))?;
        let height = result["context"]["slot"].as_u64().unwrap_or(0);
        Ok((Blockhash::from_b58(hash_str)?, height))
    }

    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        skip_preflight: bool,
    ) -> Result<ChainSignature, AegixError> {
        if !tx.is_fully_signed() {
            return Err(AegixError::TxRejected("missing signatures".to_string()));
        }
        let encoded = tx.encode()?;
        let result = self
            .call(
                "sendTransaction",
                serde_json::json!([encoded, { "skipPreflight": skip_preflight }]),
            )
            .await?;
        let sig = result
            .as_str()
            .ok_or_else(|| AegixError::RpcTransport("missing signature".to_string()))?;
        debug!(signature = %sig, "transaction submitted");
        Ok(ChainSignature(sig.to_string()))
    }

    async fn confirm(
        &self,
        signature: &ChainSignature,
        deadline: Duration,
    ) -> Result<(), AegixError> {
        let started = tokio::time::Instant::now();
        loop {
            let result = self
                .call(
                    "getSignatureStatuses",
                    serde_json::json!([[signature.as_str()]]),
                )
                .await?;
            let status = &result["value"][0];
            if !status.is_null() {
                if let Some(err) = status.get("err") {
                    if !err.is_null() {
                        return Err(AegixError::TxRejected(err.to_string()));
                    }
                }
                let level = status["confirmationStatus"].as_str().unwrap_or("");
                if level == "confirmed" || level == "finalized" {
                    return Ok(());
                }
            }
            if started.elapsed() >= deadline {
                warn!(signature = %signature.as_str(), "confirmation deadline exceeded");
                return Err(AegixError::ConfirmationTimeout(signature.as_str().to_string()));
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }
}
