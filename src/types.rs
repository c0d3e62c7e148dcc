//! Shared types used across the trading runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Protocols and opportunity classification
// ---------------------------------------------------------------------------

/// DeFi protocols the agent can trade on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tinyman,
    PactFinance,
    FolksFinance,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tinyman => write!(f, "tinyman"),
            Self::PactFinance => write!(f, "pact_finance"),
            Self::FolksFinance => write!(f, "folks_finance"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tinyman" | "tinyman_v2" => Ok(Self::Tinyman),
            "pact" | "pact_finance" => Ok(Self::PactFinance),
            "folks" | "folks_finance" => Ok(Self::FolksFinance),
            other => anyhow::bail!("Unknown protocol: {}", other),
        }
    }
}

impl Protocol {
    /// Human-facing protocol name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Tinyman => "Tinyman V2",
            Self::PactFinance => "Pact Finance",
            Self::FolksFinance => "Folks Finance",
        }
    }
}

/// What kind of position an opportunity opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityType {
    DexTrading,
    YieldFarming,
    Lending,
}

impl fmt::Display for OpportunityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DexTrading => write!(f, "dex_trading"),
            Self::YieldFarming => write!(f, "yield_farming"),
            Self::Lending => write!(f, "lending"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// Where a pool snapshot came from.
///
/// Fallback data is the static known-pool table and is always labelled so
/// it can never be mistaken for live protocol state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolSource {
    Live { endpoint: String },
    Fallback,
}

impl PoolSource {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

impl fmt::Display for PoolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live { endpoint } => write!(f, "live:{}", endpoint),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// One side of an AMM pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAsset {
    pub id: u64,
    pub name: String,
}

/// Tinyman AMM pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPool {
    pub name: String,
    pub asset_1: PoolAsset,
    pub asset_2: PoolAsset,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub fee: f64,
    pub apy: f64,
    /// On-chain pool account; unknown for fallback pools.
    pub address: Option<String>,
    /// Reserves in base units, ordered as (asset_1, asset_2).
    pub reserves: Option<(u64, u64)>,
    /// Liquidity token minted by the pool and its circulating supply.
    pub pool_token_id: Option<u64>,
    pub issued_pool_tokens: Option<u64>,
    pub source: PoolSource,
}

/// Pact Finance yield farm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmPool {
    pub id: String,
    pub name: String,
    pub asset_1: String,
    pub asset_2: String,
    pub tvl_usd: f64,
    pub apy: f64,
    pub volume_24h_usd: f64,
    pub fee: f64,
    pub min_stake: f64,
    pub max_stake: f64,
    pub lock_period_days: u32,
    pub rewards_token: String,
    pub app_id: Option<u64>,
    pub source: PoolSource,
}

/// Folks Finance lending market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingPool {
    pub id: String,
    pub name: String,
    pub asset: String,
    pub tvl_usd: f64,
    pub supply_apy: f64,
    pub borrow_apy: f64,
    pub utilization: f64,
    pub collateral_factor: f64,
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub liquidation_threshold: f64,
    pub app_id: Option<u64>,
    pub source: PoolSource,
}

/// Protocol-specific pool state carried by an opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PoolData {
    Dex(DexPool),
    Farm(FarmPool),
    Lending(LendingPool),
}

impl PoolData {
    pub fn name(&self) -> &str {
        match self {
            Self::Dex(p) => &p.name,
            Self::Farm(p) => &p.name,
            Self::Lending(p) => &p.name,
        }
    }

    pub fn source(&self) -> &PoolSource {
        match self {
            Self::Dex(p) => &p.source,
            Self::Farm(p) => &p.source,
            Self::Lending(p) => &p.source,
        }
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// A scored, actionable trading opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub protocol: Protocol,
    pub opportunity_type: OpportunityType,
    pub description: String,
    pub score: f64,
    pub risk_level: RiskLevel,
    pub estimated_apy: f64,
    pub pool: PoolData,
    pub discovered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Swap,
    AddLiquidity,
    YieldFarm,
    Lend,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Swap => write!(f, "swap"),
            Self::AddLiquidity => write!(f, "add_liquidity"),
            Self::YieldFarm => write!(f, "yield_farm"),
            Self::Lend => write!(f, "lend"),
        }
    }
}

impl std::str::FromStr for TradeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "swap" => Ok(Self::Swap),
            "add_liquidity" => Ok(Self::AddLiquidity),
            "yield_farm" => Ok(Self::YieldFarm),
            "lend" => Ok(Self::Lend),
            other => anyhow::bail!("Unknown trade kind: {}", other),
        }
    }
}

impl TradeKind {
    pub const ALL: [TradeKind; 4] = [Self::Swap, Self::AddLiquidity, Self::YieldFarm, Self::Lend];

    /// Deposits stay open until explicitly closed; swaps settle immediately.
    pub fn opens_position(&self) -> bool {
        matches!(self, Self::AddLiquidity | Self::YieldFarm | Self::Lend)
    }
}

/// Lifecycle of a trade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Submitted, awaiting confirmation.
    Pending,
    /// Included in a block.
    Confirmed,
    /// Built and signed but never submitted.
    DryRun,
    /// Execution failed; no transaction landed.
    Failed,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::DryRun => write!(f, "dry_run"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "dry_run" => Ok(Self::DryRun),
            "failed" => Ok(Self::Failed),
            other => anyhow::bail!("Unknown trade status: {}", other),
        }
    }
}

/// Persistent record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    /// Id of the transaction that carries the trade (last in its group).
    pub tx_id: Option<String>,
    pub kind: TradeKind,
    pub protocol: Protocol,
    pub pool: String,
    pub asset: String,
    pub amount: f64,
    pub status: TradeStatus,
    /// Which execution path succeeded (e.g. `staking_app`, `direct_lending`).
    pub method: Option<String>,
    pub confirmed_round: Option<u64>,
    pub expected_apy: Option<f64>,
    pub expected_daily_return: Option<f64>,
    pub opportunity_id: Option<String>,
    pub error: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    pub fn new(kind: TradeKind, protocol: Protocol, pool: &str, asset: &str, amount: f64) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            tx_id: None,
            kind,
            protocol,
            pool: pool.to_string(),
            asset: asset.to_string(),
            amount,
            status: TradeStatus::Pending,
            method: None,
            confirmed_round: None,
            expected_apy: None,
            expected_daily_return: None,
            opportunity_id: None,
            error: None,
            closed_at: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Portfolio and safety
// ---------------------------------------------------------------------------

/// Wallet balances in whole units, keyed by asset name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balances {
    pub algo: f64,
    pub min_balance: f64,
    pub assets: BTreeMap<String, f64>,
}

impl Balances {
    pub fn get(&self, asset: &str) -> f64 {
        if asset.eq_ignore_ascii_case("ALGO") {
            self.algo
        } else {
            self.assets.get(asset).copied().unwrap_or(0.0)
        }
    }
}

/// Balance-driven safety levels gating trade execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// At or above twice the floor.
    Normal,
    /// Between the floor and twice the floor.
    Caution,
    /// Below the floor; trading stops.
    Halted,
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Caution => write!(f, "caution"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

impl SafetyLevel {
    /// Determine the safety level from an ALGO balance and the configured floor.
    pub fn from_balance(algo: f64, floor: f64) -> Self {
        if algo < floor {
            Self::Halted
        } else if algo < floor * 2.0 {
            Self::Caution
        } else {
            Self::Normal
        }
    }
}

/// Aggregate trading statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u64,
    pub confirmed_trades: u64,
    pub failed_trades: u64,
    pub active_trades: u64,
    pub total_volume: f64,
    pub expected_daily_yield: f64,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// A heartbeat task definition (from heartbeat.yml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEntry {
    pub name: String,
    /// Cron expression (e.g., "0 */5 * * * *").
    pub schedule: String,
    /// Task function name to invoke.
    pub task: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_true() -> bool {
    true
}
