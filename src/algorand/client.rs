//! Algod v2 REST client.

use crate::algorand::address::Address;
use crate::algorand::transaction::SuggestedParams;
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AlgodError {
    #[error("algod returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("algod request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected algod response: {0}")]
    Decode(String),
}

impl AlgodError {
    /// Rate limiting or node access denial; worth backing off and retrying.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Http { status: 403, .. })
    }

    /// The AVM rejected the transaction; resubmitting cannot help.
    pub fn is_logic_rejection(&self) -> bool {
        match self {
            Self::Http { body, .. } => body.to_ascii_lowercase().contains("logic eval error"),
            _ => false,
        }
    }
}

// -- Response types ---------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "last-round")]
    pub last_round: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetHolding {
    #[serde(rename = "asset-id")]
    pub asset_id: u64,
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppLocalState {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    pub amount: u64,
    #[serde(rename = "min-balance", default)]
    pub min_balance: u64,
    #[serde(default)]
    pub assets: Vec<AssetHolding>,
    #[serde(rename = "apps-local-state", default)]
    pub apps_local_state: Vec<AppLocalState>,
}

impl AccountInfo {
    /// Asset 0 is ALGO and always held.
    pub fn holds_asset(&self, asset_id: u64) -> bool {
        asset_id == 0 || self.assets.iter().any(|a| a.asset_id == asset_id)
    }

    /// Balance in base units (0 if not opted in).
    pub fn asset_amount(&self, asset_id: u64) -> u64 {
        if asset_id == 0 {
            return self.amount;
        }
        self.assets
            .iter()
            .find(|a| a.asset_id == asset_id)
            .map(|a| a.amount)
            .unwrap_or(0)
    }

    pub fn is_opted_into_app(&self, app_id: u64) -> bool {
        self.apps_local_state.iter().any(|s| s.id == app_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PendingTransaction {
    #[serde(rename = "confirmed-round")]
    pub confirmed_round: Option<u64>,
    #[serde(rename = "pool-error", default)]
    pub pool_error: String,
}

#[derive(Debug, Deserialize)]
struct ParamsResponse {
    fee: u64,
    #[serde(rename = "min-fee")]
    min_fee: u64,
    #[serde(rename = "last-round")]
    last_round: u64,
    #[serde(rename = "genesis-id")]
    genesis_id: String,
    #[serde(rename = "genesis-hash")]
    genesis_hash: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
struct BoxesResponse {
    #[serde(default)]
    boxes: Vec<BoxDescriptor>,
}

#[derive(Debug, Deserialize)]
struct BoxDescriptor {
    name: String,
}

// -- Trait seam ---------------------------------------------------------------

/// Operations the trader needs from an Algorand node.
#[async_trait]
pub trait AlgodApi: Send + Sync {
    async fn status(&self) -> Result<NodeStatus, AlgodError>;
    async fn suggested_params(&self) -> Result<SuggestedParams, AlgodError>;
    async fn account_info(&self, address: &Address) -> Result<AccountInfo, AlgodError>;
    async fn application_info(&self, app_id: u64) -> Result<serde_json::Value, AlgodError>;
    async fn application_boxes(&self, app_id: u64) -> Result<Vec<Vec<u8>>, AlgodError>;
    /// Submit one or more concatenated signed transactions; returns the first id.
    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String, AlgodError>;
    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingTransaction, AlgodError>;
}

/// Algod client over HTTP.
#[derive(Debug, Clone)]
pub struct AlgodClient {
    base_url: String,
    token: String,
    validity_window: u64,
    http: reqwest::Client,
}

impl AlgodClient {
    pub fn new(base_url: &str, token: &str, validity_window: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build algod HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            validity_window,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(self.url(path));
        if self.token.is_empty() {
            req
        } else {
            req.header("X-Algo-API-Token", &self.token)
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AlgodError> {
        debug!("algod GET {}", path);
        let resp = self.get(path).send().await?;
        read_json(resp).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, AlgodError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AlgodError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| AlgodError::Decode(e.to_string()))
}

#[async_trait]
impl AlgodApi for AlgodClient {
    async fn status(&self) -> Result<NodeStatus, AlgodError> {
        self.get_json("status").await
    }

    async fn suggested_params(&self) -> Result<SuggestedParams, AlgodError> {
        let raw: ParamsResponse = self.get_json("transactions/params").await?;
        let hash = base64::engine::general_purpose::STANDARD
            .decode(&raw.genesis_hash)
            .map_err(|e| AlgodError::Decode(format!("genesis hash: {}", e)))?;
        let genesis_hash: [u8; 32] = hash
            .try_into()
            .map_err(|_| AlgodError::Decode("genesis hash is not 32 bytes".into()))?;

        Ok(SuggestedParams {
            fee_per_byte: raw.fee,
            min_fee: raw.min_fee,
            first_valid: raw.last_round,
            last_valid: raw.last_round + self.validity_window,
            genesis_id: raw.genesis_id,
            genesis_hash,
        })
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo, AlgodError> {
        self.get_json(&format!("accounts/{}", address)).await
    }

    async fn application_info(&self, app_id: u64) -> Result<serde_json::Value, AlgodError> {
        self.get_json(&format!("applications/{}", app_id)).await
    }

    async fn application_boxes(&self, app_id: u64) -> Result<Vec<Vec<u8>>, AlgodError> {
        let resp: BoxesResponse = self
            .get_json(&format!("applications/{}/boxes", app_id))
            .await?;
        let mut names = Vec::with_capacity(resp.boxes.len());
        for b in resp.boxes {
            let name = base64::engine::general_purpose::STANDARD
                .decode(&b.name)
                .map_err(|e| AlgodError::Decode(format!("box name: {}", e)))?;
            names.push(name);
        }
        Ok(names)
    }

    async fn send_raw_transaction(&self, signed: &[u8]) -> Result<String, AlgodError> {
        let mut req = self
            .http
            .post(self.url("transactions"))
            .header("Content-Type", "application/x-binary")
            .body(signed.to_vec());
        if !self.token.is_empty() {
            req = req.header("X-Algo-API-Token", &self.token);
        }
        let resp = req.send().await?;
        let body: SubmitResponse = read_json(resp).await?;
        Ok(body.tx_id)
    }

    async fn pending_transaction_info(&self, tx_id: &str) -> Result<PendingTransaction, AlgodError> {
        self.get_json(&format!("transactions/pending/{}?format=json", tx_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let forbidden = AlgodError::Http { status: 403, body: "rate limited".into() };
        assert!(forbidden.is_forbidden());
        assert!(!forbidden.is_logic_rejection());

        let rejected = AlgodError::Http {
            status: 400,
            body: "TransactionPool.Remember: transaction XYZ: logic eval error: assert failed".into(),
        };
        assert!(rejected.is_logic_rejection());
        assert!(!rejected.is_forbidden());
    }

    #[test]
    fn account_info_parses_algod_shape() {
        let info: AccountInfo = serde_json::from_value(serde_json::json!({
            "address": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAY5HFKQ",
            "amount": 2_500_000u64,
            "min-balance": 200_000u64,
            "assets": [{"asset-id": 31566704u64, "amount": 10_000_000u64, "is-frozen": false}],
            "apps-local-state": [{"id": 1072843807u64, "schema": {}}],
            "round": 1
        }))
        .unwrap();

        assert!(info.holds_asset(0));
        assert!(info.holds_asset(31566704));
        assert!(!info.holds_asset(312769));
        assert_eq!(info.asset_amount(31566704), 10_000_000);
        assert_eq!(info.asset_amount(0), 2_500_000);
        assert!(info.is_opted_into_app(1072843807));
        assert!(!info.is_opted_into_app(1002541853));
    }

    #[test]
    fn pending_without_round_is_unconfirmed() {
        let p: PendingTransaction =
            serde_json::from_value(serde_json::json!({"pool-error": "", "txn": {}})).unwrap();
        assert!(p.confirmed_round.is_none());
        assert!(p.pool_error.is_empty());
    }
}
