//! The seam between the orchestrator and each DeFi protocol.

use crate::protocols::error::ExecutionError;
use crate::types::{Opportunity, PoolSource, Protocol, TradeRecord};
use anyhow::Result;
use async_trait::async_trait;

/// Pools from one fetch, tagged with where they came from.
#[derive(Debug, Clone)]
pub struct PoolSnapshot<T> {
    pub pools: Vec<T>,
    pub source: PoolSource,
}

/// Result of probing one protocol application on chain.
#[derive(Debug, Clone)]
pub struct ContractCheck {
    pub name: String,
    pub app_id: u64,
    pub reachable: bool,
    pub detail: String,
}

#[async_trait]
pub trait DefiProtocol: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Score the protocol's best `top_n` pools.
    async fn opportunities(&self, top_n: usize) -> Result<Vec<Opportunity>>;

    /// Execute an opportunity with a position of `amount` whole units.
    async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord, ExecutionError>;

    /// Look up the protocol's applications on chain.
    async fn verify_contracts(&self) -> Vec<ContractCheck>;
}

/// Probe one application through algod.
pub async fn probe_app(api: &dyn crate::algorand::AlgodApi, name: &str, app_id: u64) -> ContractCheck {
    match api.application_info(app_id).await {
        Ok(info) => {
            let creator = info
                .pointer("/params/creator")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown creator");
            ContractCheck {
                name: name.to_string(),
                app_id,
                reachable: true,
                detail: format!("created by {}", creator),
            }
        }
        Err(e) => ContractCheck {
            name: name.to_string(),
            app_id,
            reachable: false,
            detail: e.to_string(),
        },
    }
}
