//! Built-in heartbeat task implementations.

use crate::algorand::{Address, AlgodApi, AlgodError, AssetRegistry};
use crate::config::TraderConfig;
use crate::portfolio::{fetch_balances, SafetyMonitor};
use crate::state::Database;
use crate::types::TradeStatus;
use anyhow::{bail, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// A pending transaction algod no longer knows about after this long has
/// left the pool without landing.
const PENDING_EXPIRY_MINUTES: i64 = 60;

/// Shared handles for heartbeat tasks.
pub struct HeartbeatContext {
    pub config: TraderConfig,
    pub db: Arc<Mutex<Database>>,
    pub algod: Arc<dyn AlgodApi>,
    /// Absent when no wallet is configured; balance tasks are skipped.
    pub address: Option<Address>,
    pub assets: AssetRegistry,
    pub monitor: SafetyMonitor,
}

impl HeartbeatContext {
    pub fn new(
        config: TraderConfig,
        db: Arc<Mutex<Database>>,
        algod: Arc<dyn AlgodApi>,
        address: Option<Address>,
    ) -> Self {
        let monitor = SafetyMonitor::new(db.clone(), config.safety.algo_floor);
        Self {
            config,
            db,
            algod,
            address,
            assets: AssetRegistry::new(),
            monitor,
        }
    }
}

/// Execute a named heartbeat task.
pub async fn execute_task(task_name: &str, _params: &serde_json::Value, ctx: &HeartbeatContext) -> Result<String> {
    match task_name {
        "heartbeat_ping" => task_heartbeat_ping(ctx).await,
        "snapshot_balances" => task_snapshot_balances(ctx).await,
        "check_safety" => task_check_safety(ctx).await,
        "reconcile_pending" => task_reconcile_pending(ctx).await,
        _ => bail!("Unknown heartbeat task: {}", task_name),
    }
}

/// Simple ping: record that the trader is alive and the node reachable.
async fn task_heartbeat_ping(ctx: &HeartbeatContext) -> Result<String> {
    let round = match ctx.algod.status().await {
        Ok(status) => Some(status.last_round),
        Err(e) => {
            warn!("algod status failed: {}", e);
            None
        }
    };

    let db = ctx.db.lock().await;
    db.kv_set("last_heartbeat", &Utc::now().to_rfc3339())?;
    Ok(match round {
        Some(round) => format!("pong (round {})", round),
        None => "pong (node unreachable)".into(),
    })
}

/// Store a balance snapshot row.
async fn task_snapshot_balances(ctx: &HeartbeatContext) -> Result<String> {
    let Some(address) = &ctx.address else {
        return Ok("Skipped: no wallet configured".into());
    };
    let balances = fetch_balances(ctx.algod.as_ref(), address, &ctx.assets).await?;
    ctx.db.lock().await.save_balance_snapshot(&balances)?;
    Ok(format!("{:.6} ALGO, {} assets", balances.algo, balances.assets.len()))
}

/// Re-evaluate the balance floor and flip the halt flag.
async fn task_check_safety(ctx: &HeartbeatContext) -> Result<String> {
    let Some(address) = &ctx.address else {
        return Ok("Skipped: no wallet configured".into());
    };
    let balances = fetch_balances(ctx.algod.as_ref(), address, &ctx.assets).await?;
    let level = ctx.monitor.evaluate(balances.algo).await?;
    Ok(format!("{:.6} ALGO (level: {})", balances.algo, level))
}

/// Resolve pending trades to confirmed or failed.
async fn task_reconcile_pending(ctx: &HeartbeatContext) -> Result<String> {
    let pending = ctx.db.lock().await.pending_trades()?;
    if pending.is_empty() {
        return Ok("No pending trades".into());
    }

    let (mut confirmed, mut failed) = (0, 0);
    for trade in &pending {
        let Some(tx_id) = &trade.tx_id else {
            continue;
        };

        match ctx.algod.pending_transaction_info(tx_id).await {
            Ok(info) if info.confirmed_round.is_some() => {
                info!("Trade {} confirmed in round {:?}", trade.id, info.confirmed_round);
                ctx.db
                    .lock()
                    .await
                    .update_trade_status(&trade.id, TradeStatus::Confirmed, info.confirmed_round, None)?;
                confirmed += 1;
            }
            Ok(info) if !info.pool_error.is_empty() => {
                warn!("Trade {} rejected: {}", trade.id, info.pool_error);
                ctx.db
                    .lock()
                    .await
                    .update_trade_status(&trade.id, TradeStatus::Failed, None, Some(&info.pool_error))?;
                failed += 1;
            }
            Ok(_) => {}
            Err(AlgodError::Http { status: 404, .. })
                if Utc::now() - trade.created_at > chrono::Duration::minutes(PENDING_EXPIRY_MINUTES) =>
            {
                warn!("Trade {} never landed; marking failed", trade.id);
                ctx.db.lock().await.update_trade_status(
                    &trade.id,
                    TradeStatus::Failed,
                    None,
                    Some("transaction expired from the pool"),
                )?;
                failed += 1;
            }
            Err(e) => warn!("Could not look up {}: {}", tx_id, e),
        }
    }

    Ok(format!(
        "{} pending: {} confirmed, {} failed",
        pending.len(),
        confirmed,
        failed
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;
    use crate::types::{Protocol, TradeKind, TradeRecord};

    pub(crate) fn context(fake: Arc<FakeAlgod>, config: TraderConfig) -> HeartbeatContext {
        let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        HeartbeatContext::new(config, db, fake, Some(Address::default()))
    }

    fn pending(tx_id: &str, age_minutes: i64) -> TradeRecord {
        let mut trade = TradeRecord::new(TradeKind::Lend, Protocol::FolksFinance, "ALGO Lending Pool", "ALGO", 1.0);
        trade.tx_id = Some(tx_id.into());
        trade.created_at = Utc::now() - chrono::Duration::minutes(age_minutes);
        trade
    }

    #[tokio::test]
    async fn reconcile_resolves_each_case() {
        let fake = Arc::new(FakeAlgod::default());
        fake.set_pending("LANDED", Some(99), "");
        fake.set_pending("REJECTED", None, "overspend");
        fake.set_pending("WAITING", None, "");
        let ctx = context(fake, TraderConfig::default());
        {
            let db = ctx.db.lock().await;
            for trade in [
                pending("LANDED", 1),
                pending("REJECTED", 1),
                pending("WAITING", 1),
                pending("GONE", 120),
                pending("RECENT", 1),
            ] {
                db.save_trade(&trade).unwrap();
            }
        }

        let summary = execute_task("reconcile_pending", &serde_json::Value::Null, &ctx).await.unwrap();
        assert_eq!(summary, "5 pending: 1 confirmed, 2 failed");

        let db = ctx.db.lock().await;
        let still_pending: Vec<String> = db
            .pending_trades()
            .unwrap()
            .into_iter()
            .filter_map(|t| t.tx_id)
            .collect();
        assert_eq!(still_pending.len(), 2);
        assert!(still_pending.contains(&"WAITING".to_string()));
        assert!(still_pending.contains(&"RECENT".to_string()));
    }

    #[tokio::test]
    async fn snapshot_and_safety() {
        let fake = Arc::new(FakeAlgod::default());
        fake.set_algo(50_000);
        let ctx = context(fake, TraderConfig::default());

        execute_task("snapshot_balances", &serde_json::Value::Null, &ctx).await.unwrap();
        assert!(ctx.db.lock().await.latest_balance_snapshot().unwrap().is_some());

        let out = execute_task("check_safety", &serde_json::Value::Null, &ctx).await.unwrap();
        assert!(out.contains("halted"));
        assert!(ctx.monitor.halt_reason().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let ctx = context(Arc::new(FakeAlgod::default()), TraderConfig::default());
        assert!(execute_task("mine_bitcoin", &serde_json::Value::Null, &ctx).await.is_err());
    }
}
