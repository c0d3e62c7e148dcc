//! The autonomous trading loop: Scan → Evaluate → Execute → Sleep.
//!
//! Each cycle:
//! 1. Refreshes the wallet balance and the safety halt flag
//! 2. Logs a status line
//! 3. Scans every enabled protocol
//! 4. Runs the best few opportunities through the risk gate
//! 5. Executes the approved ones and records every outcome

use crate::algorand::{Address, AlgodApi, AssetRegistry};
use crate::config::TraderConfig;
use crate::portfolio::{fetch_balances, SafetyMonitor};
use crate::protocols::DefiProtocol;
use crate::state::Database;
use crate::strategy::executor::Executor;
use crate::strategy::risk::{self, Decision, RiskInputs};
use crate::strategy::scanner;
use crate::types::TradeRecord;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Everything the loop needs, built once by the binary.
pub struct TradingContext {
    pub config: TraderConfig,
    pub db: Arc<Mutex<Database>>,
    pub algod: Arc<dyn AlgodApi>,
    pub address: Address,
    pub assets: AssetRegistry,
    pub protocols: Vec<Arc<dyn DefiProtocol>>,
    pub executor: Executor,
    pub monitor: SafetyMonitor,
}

impl TradingContext {
    pub fn new(
        config: TraderConfig,
        db: Arc<Mutex<Database>>,
        algod: Arc<dyn AlgodApi>,
        address: Address,
        protocols: Vec<Arc<dyn DefiProtocol>>,
    ) -> Self {
        let data_dir = PathBuf::from(config.resolved_data_dir());
        let executor = Executor::new(protocols.clone(), db.clone(), data_dir);
        let monitor = SafetyMonitor::new(db.clone(), config.safety.algo_floor);
        Self {
            config,
            db,
            algod,
            address,
            assets: AssetRegistry::new(),
            protocols,
            executor,
            monitor,
        }
    }

    async fn algo_balance(&self) -> Result<f64> {
        let balances = fetch_balances(self.algod.as_ref(), &self.address, &self.assets).await?;
        Ok(balances.algo)
    }
}

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub halted: Option<String>,
    pub scanned: usize,
    pub skipped: usize,
    pub trades: Vec<TradeRecord>,
}

/// Run one full cycle.
pub async fn run_cycle(ctx: &TradingContext) -> Result<CycleReport> {
    let mut report = CycleReport::default();

    match ctx.algo_balance().await {
        Ok(algo) => {
            ctx.monitor.evaluate(algo).await?;
        }
        Err(e) => warn!("Balance check failed: {:#}", e),
    }

    if let Some(reason) = ctx.monitor.halt_reason().await? {
        warn!("Trading halted: {}", reason);
        report.halted = Some(reason);
        return Ok(report);
    }

    let (active, stats) = {
        let db = ctx.db.lock().await;
        (db.active_trade_count()?, db.trade_stats()?)
    };
    info!(
        "Status: {} active trades, {} total, {:.3} volume, dry_run={}",
        active, stats.total_trades, stats.total_volume, ctx.config.dry_run
    );

    let data_dir = PathBuf::from(ctx.config.resolved_data_dir());
    let scan = scanner::scan_and_record(
        &ctx.protocols,
        ctx.config.trading.top_pools_per_protocol,
        &ctx.db,
        &data_dir,
    )
    .await?;
    report.scanned = scan.opportunities.len();

    for opportunity in scan.opportunities.iter().take(ctx.config.trading.executions_per_cycle) {
        let balance = match ctx.algo_balance().await {
            Ok(algo) => algo,
            Err(e) => {
                warn!("Skipping {}: balance unavailable: {:#}", opportunity.description, e);
                report.skipped += 1;
                continue;
            }
        };
        let inputs = RiskInputs {
            algo_balance: balance,
            active_trades: ctx.db.lock().await.active_trade_count()?,
            halted: ctx.monitor.halt_reason().await?,
        };

        match risk::evaluate(opportunity, &inputs, &ctx.config.trading) {
            Decision::Execute { size } => {
                let trade = ctx.executor.execute(opportunity, size).await?;
                report.trades.push(trade);
            }
            Decision::Skip(reason) => {
                info!("Skipping {}: {}", opportunity.description, reason);
                report.skipped += 1;
            }
        }
    }

    Ok(report)
}

/// Run the trading loop until cancelled.
pub async fn run_trading_loop(ctx: TradingContext, cancel: CancellationToken) -> Result<()> {
    let cfg = ctx.config.trading.clone();
    info!(
        "Starting trading loop for '{}' (every {}s, dry_run={})",
        ctx.config.name, cfg.scan_interval_secs, ctx.config.dry_run
    );

    let mut consecutive_errors: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let pause = match run_cycle(&ctx).await {
            Ok(report) => {
                consecutive_errors = 0;
                info!(
                    "Cycle done: {} opportunities, {} trades, {} skipped",
                    report.scanned,
                    report.trades.len(),
                    report.skipped
                );
                cfg.scan_interval_secs
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(
                    "Cycle error ({}/{}): {:#}",
                    consecutive_errors, cfg.max_consecutive_errors, e
                );
                if consecutive_errors >= cfg.max_consecutive_errors {
                    warn!("Max consecutive errors reached; pausing for one scan interval");
                    consecutive_errors = 0;
                    cfg.scan_interval_secs.max(cfg.error_backoff_secs)
                } else {
                    cfg.error_backoff_secs
                }
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(pause)) => {}
        }
    }

    info!("Trading loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;
    use crate::strategy::testing::StubProtocol;
    use crate::types::{Protocol, TradeStatus};

    fn context(fake: Arc<FakeAlgod>, protocols: Vec<Arc<dyn DefiProtocol>>) -> (TradingContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TraderConfig::default();
        config.dry_run = true;
        config.data_dir = dir.path().to_string_lossy().into_owned();
        let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        (TradingContext::new(config, db, fake, Address::default(), protocols), dir)
    }

    #[tokio::test]
    async fn executes_top_opportunities_above_threshold() {
        let fake = Arc::new(FakeAlgod::default());
        let pact = Arc::new(StubProtocol::new(Protocol::PactFinance, &[90.0, 85.0, 60.0, 95.0]));
        let (ctx, _dir) = context(fake, vec![pact.clone()]);

        let report = run_cycle(&ctx).await.unwrap();
        assert_eq!(report.scanned, 4);
        // Top three are 95, 90, 85; the 60 is never considered.
        assert_eq!(pact.executions(), 3);
        assert!(report.trades.iter().all(|t| t.status == TradeStatus::DryRun));
    }

    #[tokio::test]
    async fn low_balance_halts_before_scanning() {
        let fake = Arc::new(FakeAlgod::default());
        fake.set_algo(100_000);
        let pact = Arc::new(StubProtocol::new(Protocol::PactFinance, &[90.0]));
        let (ctx, _dir) = context(fake, vec![pact.clone()]);

        let report = run_cycle(&ctx).await.unwrap();
        assert!(report.halted.is_some());
        assert_eq!(report.scanned, 0);
        assert_eq!(pact.executions(), 0);
    }

    #[tokio::test]
    async fn unreadable_balance_rejects_every_opportunity() {
        let fake = Arc::new(FakeAlgod::default());
        fake.set_account_unavailable(true);
        let pact = Arc::new(StubProtocol::new(Protocol::PactFinance, &[90.0, 88.0]));
        let (ctx, _dir) = context(fake, vec![pact.clone()]);

        let report = run_cycle(&ctx).await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(pact.executions(), 0);
    }

    #[tokio::test]
    async fn loop_exits_on_cancel() {
        let fake = Arc::new(FakeAlgod::default());
        let (ctx, _dir) = context(fake, Vec::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_trading_loop(ctx, cancel.clone()));

        cancel.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(joined.unwrap().unwrap().is_ok());
    }
}
