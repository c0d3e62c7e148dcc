//! Routes approved opportunities to the protocol that can execute them and
//! records every outcome.

use crate::protocols::{DefiProtocol, ExecutionError};
use crate::state::{export, Database};
use crate::types::{Opportunity, OpportunityType, PoolData, Protocol, TradeKind, TradeRecord, TradeStatus};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Which protocol executes a given kind of opportunity.
pub fn route(kind: OpportunityType) -> Protocol {
    match kind {
        OpportunityType::YieldFarming => Protocol::PactFinance,
        OpportunityType::Lending => Protocol::FolksFinance,
        OpportunityType::DexTrading => Protocol::Tinyman,
    }
}

fn trade_kind(kind: OpportunityType) -> TradeKind {
    match kind {
        OpportunityType::YieldFarming => TradeKind::YieldFarm,
        OpportunityType::Lending => TradeKind::Lend,
        OpportunityType::DexTrading => TradeKind::Swap,
    }
}

/// The asset an opportunity spends.
fn spent_asset(pool: &PoolData) -> String {
    match pool {
        PoolData::Dex(p) => crate::protocols::tinyman::swap_direction(p).0.name.clone(),
        PoolData::Farm(p) => p.asset_1.clone(),
        PoolData::Lending(p) => p.asset.clone(),
    }
}

pub struct Executor {
    protocols: Vec<Arc<dyn DefiProtocol>>,
    db: Arc<Mutex<Database>>,
    data_dir: PathBuf,
}

impl Executor {
    /// `protocols` holds the enabled clients only.
    pub fn new(protocols: Vec<Arc<dyn DefiProtocol>>, db: Arc<Mutex<Database>>, data_dir: PathBuf) -> Self {
        Self {
            protocols,
            db,
            data_dir,
        }
    }

    fn client_for(&self, opportunity: &Opportunity) -> Result<&Arc<dyn DefiProtocol>, ExecutionError> {
        let target = route(opportunity.opportunity_type);
        if target != opportunity.protocol {
            return Err(ExecutionError::Unsupported(format!(
                "{} opportunity from {}",
                opportunity.opportunity_type,
                opportunity.protocol.display_name()
            )));
        }
        self.protocols
            .iter()
            .find(|p| p.protocol() == target)
            .ok_or_else(|| ExecutionError::Unsupported(format!("{} is disabled", target.display_name())))
    }

    /// Execute one opportunity and persist the outcome, success or failure.
    ///
    /// The returned record is the stored one; a failure comes back as a
    /// `Failed` record carrying the error text.
    pub async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord> {
        info!(
            "Executing {} on {} with {}",
            opportunity.description,
            opportunity.protocol.display_name(),
            amount
        );

        let outcome = match self.client_for(opportunity) {
            Ok(client) => client.execute(opportunity, amount).await,
            Err(e) => Err(e),
        };

        let trade = match outcome {
            Ok(trade) => {
                info!(
                    "Trade {} {}: {}",
                    trade.kind,
                    trade.status,
                    trade.tx_id.as_deref().unwrap_or("-")
                );
                trade
            }
            Err(e) => {
                error!("Execution failed for {}: {}", opportunity.description, e);
                failed_record(opportunity, amount, &e)
            }
        };

        self.db.lock().await.save_trade(&trade)?;
        if let Err(e) = export::write_trade(&self.data_dir, &trade) {
            warn!("Failed to export trade {}: {}", trade.id, e);
        }
        Ok(trade)
    }
}

fn failed_record(opportunity: &Opportunity, amount: f64, err: &ExecutionError) -> TradeRecord {
    let mut trade = TradeRecord::new(
        trade_kind(opportunity.opportunity_type),
        opportunity.protocol,
        opportunity.pool.name(),
        &spent_asset(&opportunity.pool),
        amount,
    );
    trade.status = TradeStatus::Failed;
    trade.error = Some(err.to_string());
    trade.opportunity_id = Some(opportunity.id.clone());
    trade.expected_apy = Some(opportunity.estimated_apy);
    trade
}
