//! Portfolio monitor: wallet balances and the balance-floor safety switch.
//!
//! Levels:
//!   Normal  (>= 2x floor): trading allowed
//!   Caution (floor..2x):   trading allowed, warned
//!   Halted  (< floor):     no new trades until the balance recovers

use crate::algorand::transaction::from_base_units;
use crate::algorand::{Address, AlgodApi, AssetRegistry};
use crate::config::TraderConfig;
use crate::state::Database;
use crate::types::{Balances, SafetyLevel, TradeRecord, TradeStats};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// kv key holding the halt reason while trading is halted.
pub const HALT_KEY: &str = "trading_halted";

/// Read ALGO and every known ASA holding in whole units.
pub async fn fetch_balances(api: &dyn AlgodApi, address: &Address, registry: &AssetRegistry) -> Result<Balances> {
    let account = api
        .account_info(address)
        .await
        .context("Failed to read wallet balance")?;

    let mut balances = Balances {
        algo: from_base_units(account.amount, 6),
        min_balance: from_base_units(account.min_balance, 6),
        ..Default::default()
    };
    for holding in &account.assets {
        if let Some(asset) = registry.by_id(holding.asset_id) {
            balances
                .assets
                .insert(asset.name.to_string(), from_base_units(holding.amount, asset.decimals));
        }
    }
    Ok(balances)
}

/// Flips the halt flag as the ALGO balance crosses the floor.
pub struct SafetyMonitor {
    db: Arc<Mutex<Database>>,
    floor: f64,
}

impl SafetyMonitor {
    pub fn new(db: Arc<Mutex<Database>>, floor: f64) -> Self {
        Self { db, floor }
    }

    /// Evaluate a fresh ALGO balance and update the halt flag.
    pub async fn evaluate(&self, algo: f64) -> Result<SafetyLevel> {
        let level = SafetyLevel::from_balance(algo, self.floor);
        let db = self.db.lock().await;
        let halted = db.kv_get(HALT_KEY)?.is_some();

        match level {
            SafetyLevel::Halted if !halted => {
                let reason = format!("ALGO balance {:.6} below floor {:.6}", algo, self.floor);
                warn!("Trading halted: {}", reason);
                db.kv_set(HALT_KEY, &reason)?;
                db.log_safety_event(level, "halt", &reason)?;
            }
            SafetyLevel::Normal | SafetyLevel::Caution if halted => {
                let details = format!("ALGO balance {:.6} back above floor {:.6}", algo, self.floor);
                info!("Trading resumed: {}", details);
                db.kv_delete(HALT_KEY)?;
                db.log_safety_event(level, "resume", &details)?;
            }
            SafetyLevel::Caution => {
                warn!("ALGO balance {:.6} is within 2x of the {:.6} floor", algo, self.floor);
            }
            _ => {}
        }
        Ok(level)
    }

    /// Safety level for a balance, without touching the halt flag.
    pub fn level(&self, algo: f64) -> SafetyLevel {
        SafetyLevel::from_balance(algo, self.floor)
    }

    /// The halt reason, if trading is halted.
    pub async fn halt_reason(&self) -> Result<Option<String>> {
        self.db.lock().await.kv_get(HALT_KEY)
    }
}

/// Snapshot printed by `status` and exported by `report`.
#[derive(Debug, Clone, Serialize)]
pub struct PortfolioReport {
    pub name: String,
    pub address: Option<String>,
    pub balances: Option<Balances>,
    pub safety: Option<SafetyLevel>,
    pub halted: Option<String>,
    pub dry_run: bool,
    pub stats: TradeStats,
    pub open_positions: Vec<TradeRecord>,
    pub generated_at: DateTime<Utc>,
}

impl PortfolioReport {
    /// Gather a report. Read-only: the halt flag is reported as stored.
    pub async fn collect(
        config: &TraderConfig,
        db: &Arc<Mutex<Database>>,
        algod: &dyn AlgodApi,
        address: Option<Address>,
    ) -> Result<Self> {
        let balances = match &address {
            Some(address) => match fetch_balances(algod, address, &AssetRegistry::new()).await {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("{:#}", e);
                    None
                }
            },
            None => None,
        };

        let monitor = SafetyMonitor::new(db.clone(), config.safety.algo_floor);
        let safety = balances.as_ref().map(|b| monitor.level(b.algo));

        let db = db.lock().await;
        Ok(Self {
            name: config.name.clone(),
            address: address.map(|a| a.to_string()),
            balances,
            safety,
            halted: db.kv_get(HALT_KEY)?,
            dry_run: config.dry_run,
            stats: db.trade_stats()?,
            open_positions: db.open_positions()?,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;

    fn monitor(floor: f64) -> (SafetyMonitor, Arc<Mutex<Database>>) {
        let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        (SafetyMonitor::new(db.clone(), floor), db)
    }

    #[tokio::test]
    async fn halts_and_resumes() {
        let (monitor, db) = monitor(0.2);

        assert_eq!(monitor.evaluate(0.1).await.unwrap(), SafetyLevel::Halted);
        assert!(monitor.halt_reason().await.unwrap().unwrap().contains("below floor"));
        // Still halted: no duplicate event.
        monitor.evaluate(0.15).await.unwrap();
        assert_eq!(db.lock().await.safety_event_count().unwrap(), 1);

        assert_eq!(monitor.evaluate(0.3).await.unwrap(), SafetyLevel::Caution);
        assert!(monitor.halt_reason().await.unwrap().is_none());
        assert_eq!(db.lock().await.safety_event_count().unwrap(), 2);

        assert_eq!(monitor.evaluate(1.0).await.unwrap(), SafetyLevel::Normal);
        assert_eq!(db.lock().await.safety_event_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn balances_skip_unknown_assets() {
        let fake = FakeAlgod::default();
        fake.set_algo(2_500_000);
        fake.add_asset(31566704, 12_340_000);
        fake.add_asset(999, 1);
        let balances = fetch_balances(&fake, &Address::default(), &AssetRegistry::new())
            .await
            .unwrap();

        assert_eq!(balances.algo, 2.5);
        assert_eq!(balances.get("USDC"), 12.34);
        assert_eq!(balances.assets.len(), 1);
        assert_eq!(balances.min_balance, 0.1);
    }

    #[tokio::test]
    async fn unreachable_node_is_an_error() {
        let fake = FakeAlgod::default();
        fake.set_account_unavailable(true);
        assert!(fetch_balances(&fake, &Address::default(), &AssetRegistry::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn report_leaves_halt_flag_alone() {
        let db = Arc::new(Mutex::new(Database::open_memory().unwrap()));
        let fake = FakeAlgod::default();
        fake.set_algo(50_000);
        let config = TraderConfig::default();

        let report = PortfolioReport::collect(&config, &db, &fake, Some(Address::default()))
            .await
            .unwrap();
        assert_eq!(report.safety, Some(SafetyLevel::Halted));
        assert!(report.halted.is_none());
        let db = db.lock().await;
        assert!(db.kv_get(HALT_KEY).unwrap().is_none());
        assert_eq!(db.safety_event_count().unwrap(), 0);
    }
}
