//! End-to-end trading cycle against an in-memory node, in dry-run mode.
//!
//! Every protocol endpoint points at a closed local port, so the clients fall
//! back to their known-pool tables.

use algotrader::algorand::client::{NodeStatus, PendingTransaction};
use algotrader::algorand::{AccountInfo, Address, AlgodApi, AlgodError, RetryPolicy, SuggestedParams};
use algotrader::config::TraderConfig;
use algotrader::identity::Wallet;
use algotrader::protocols::{ExecutionContext, ProtocolDeps, ProtocolSet};
use algotrader::state::Database;
use algotrader::strategy::{run_cycle, TradingContext};
use algotrader::types::{Protocol, TradeStatus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

const DEAD_URL: &str = "http://127.0.0.1:9";

/// A node holding 5 ALGO for any account that counts submissions.
#[derive(Default)]
struct OfflineNode {
    submits: AtomicUsize,
}

#[async_trait]
impl AlgodApi for OfflineNode {
    async fn status(&self) -> Result<NodeStatus, AlgodError> {
        Ok(NodeStatus { last_round: 1000 })
    }

    async fn suggested_params(&self) -> Result<SuggestedParams, AlgodError> {
        Ok(SuggestedParams {
            fee_per_byte: 0,
            min_fee: 1000,
            first_valid: 1000,
            last_valid: 2000,
            genesis_id: "testnet-v1.0".into(),
            genesis_hash: [7u8; 32],
        })
    }

    async fn account_info(&self, address: &Address) -> Result<AccountInfo, AlgodError> {
        Ok(AccountInfo {
            address: address.to_string(),
            amount: 5_000_000,
            min_balance: 100_000,
            assets: Vec::new(),
            apps_local_state: Vec::new(),
        })
    }

    async fn application_info(&self, app_id: u64) -> Result<serde_json::Value, AlgodError> {
        Ok(serde_json::json!({ "id": app_id, "params": {} }))
    }

    async fn application_boxes(&self, _app_id: u64) -> Result<Vec<Vec<u8>>, AlgodError> {
        Ok(Vec::new())
    }

    async fn send_raw_transaction(&self, _signed: &[u8]) -> Result<String, AlgodError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        Err(AlgodError::Http {
            status: 500,
            body: "offline".into(),
        })
    }

    async fn pending_transaction_info(&self, _tx_id: &str) -> Result<PendingTransaction, AlgodError> {
        Err(AlgodError::Http {
            status: 404,
            body: "transaction not found".into(),
        })
    }
}

fn offline_config(data_dir: &std::path::Path) -> TraderConfig {
    let mut config = TraderConfig::default();
    config.dry_run = true;
    config.data_dir = data_dir.to_string_lossy().into_owned();
    config.http.timeout_secs = 2;
    config.tinyman.pool_api_urls = vec![DEAD_URL.into()];
    config.pact.api_url = DEAD_URL.into();
    config.pact.analytics_url = DEAD_URL.into();
    config.pact.github_pools_url = DEAD_URL.into();
    config.folks.markets_url = DEAD_URL.into();
    config.folks.pools_url = DEAD_URL.into();
    config
}

#[tokio::test]
async fn dry_run_cycle_signs_but_never_submits() {
    let dir = tempfile::tempdir().unwrap();
    let config = offline_config(dir.path());

    let node = Arc::new(OfflineNode::default());
    let algod: Arc<dyn AlgodApi> = node.clone();
    let wallet = Wallet::generate();
    let exec = ExecutionContext::new(algod.clone(), wallet.clone(), RetryPolicy::immediate(1), true);
    let deps = ProtocolDeps::new(&config, algod.clone(), Some(exec)).unwrap();
    let protocols = ProtocolSet::new(&config, deps);

    let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
    let ctx = TradingContext::new(config, db.clone(), algod, wallet.address, protocols.enabled());

    let report = run_cycle(&ctx).await.unwrap();

    // Nine fallback pools; the three Pact farms score highest.
    assert_eq!(report.scanned, 9);
    assert_eq!(report.trades.len(), 3);
    assert!(report.trades.iter().all(|t| t.protocol == Protocol::PactFinance));

    let dry: Vec<_> = report.trades.iter().filter(|t| t.status == TradeStatus::DryRun).collect();
    let failed: Vec<_> = report.trades.iter().filter(|t| t.status == TradeStatus::Failed).collect();
    assert_eq!(dry.len(), 2);
    assert_eq!(failed.len(), 1);

    for trade in &dry {
        assert_eq!(trade.tx_id.as_ref().map(String::len), Some(52));
        assert_eq!(trade.method.as_deref(), Some("staking_app"));
    }
    // USDC-USDT needs a 10 USDC minimum stake.
    assert!(failed[0].tx_id.is_none());
    assert!(failed[0].error.as_deref().unwrap().contains("minimum"));

    assert_eq!(node.submits.load(Ordering::SeqCst), 0);
    assert_eq!(db.lock().await.recent_trades(10).unwrap().len(), 3);
    assert_eq!(std::fs::read_dir(dir.path().join("trades")).unwrap().count(), 3);
    assert_eq!(std::fs::read_dir(dir.path().join("opportunities")).unwrap().count(), 1);
}

#[tokio::test]
async fn read_only_clients_refuse_to_trade_without_wallet() {
    let dir = tempfile::tempdir().unwrap();
    let config = offline_config(dir.path());
    let algod: Arc<dyn AlgodApi> = Arc::new(OfflineNode::default());
    let protocols = ProtocolSet::new(&config, ProtocolDeps::new(&config, algod, None).unwrap());

    let quote = protocols.folks.quote("ALGO Lending Pool", 1.0).await.unwrap();
    assert_eq!(quote.asset, "ALGO");

    let err = protocols.folks.lend("ALGO Lending Pool", 1.0).await.unwrap_err();
    assert!(err.to_string().contains("no wallet"));
}
