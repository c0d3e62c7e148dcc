//! Folks Finance lending markets.

use crate::algorand::assets::normalize_name;
use crate::algorand::transaction::{encode_u64_arg, to_base_units};
use crate::algorand::AssetRegistry;
use crate::config::schema::FolksConfig;
use crate::protocols::endpoints::{items, num_field, str_field, uint, Endpoint, PoolCache};
use crate::protocols::error::ExecutionError;
use crate::protocols::execution::MethodPlan;
use crate::protocols::traits::{probe_app, ContractCheck, DefiProtocol, PoolSnapshot};
use crate::protocols::ProtocolDeps;
use crate::types::{
    LendingPool, Opportunity, OpportunityType, PoolData, PoolSource, Protocol, RiskLevel, TradeKind,
    TradeRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

const DEFAULT_MIN_DEPOSIT: f64 = 0.1;
const DEFAULT_MAX_DEPOSIT: f64 = 10_000.0;

// ---------------------------------------------------------------------------
// Pool data
// ---------------------------------------------------------------------------

/// Utilization arrives either as a ratio or as a percentage.
fn ratio(value: f64) -> f64 {
    if value > 1.0 {
        value / 100.0
    } else {
        value
    }
}

fn parse_market(market: &Value, index: usize, source: &PoolSource) -> Option<LendingPool> {
    let asset = normalize_name(str_field(market, &["asset", "symbol"])?);
    let supply_apy = num_field(market, &["supply_apy", "apy"])?;
    let tvl_usd = num_field(market, &["total_supply_usd", "tvl_usd", "tvl"])?;

    let id = match market.get("id").or_else(|| market.get("pool_id")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("folks_{}", index),
    };

    Some(LendingPool {
        id,
        name: str_field(market, &["name"])
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} Lending Pool", asset)),
        tvl_usd,
        supply_apy,
        borrow_apy: num_field(market, &["borrow_apy"]).unwrap_or(0.0),
        utilization: ratio(num_field(market, &["utilization"]).unwrap_or(0.0)),
        collateral_factor: num_field(market, &["collateral_factor"]).unwrap_or(0.0),
        min_deposit: num_field(market, &["minimum_deposit", "min_deposit"]).unwrap_or(DEFAULT_MIN_DEPOSIT),
        max_deposit: num_field(market, &["maximum_deposit", "max_deposit"]).unwrap_or(DEFAULT_MAX_DEPOSIT),
        liquidation_threshold: num_field(market, &["liquidation_threshold"]).unwrap_or(0.0),
        app_id: market
            .get("app_id")
            .or_else(|| market.get("pool_app_id"))
            .and_then(uint),
        asset,
        source: source.clone(),
    })
}

/// Parse `markets.json` or `pools.json` from the Folks Finance SDK repo.
pub fn parse_pools(body: &Value, endpoint: &str) -> Vec<LendingPool> {
    let source = PoolSource::Live {
        endpoint: endpoint.to_string(),
    };
    items(body)
        .iter()
        .enumerate()
        .filter_map(|(i, market)| parse_market(market, i, &source))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn known_market(
    asset: &str,
    tvl: f64,
    supply_apy: f64,
    borrow_apy: f64,
    utilization: f64,
    collateral_factor: f64,
    min_deposit: f64,
    max_deposit: f64,
    liquidation_threshold: f64,
) -> LendingPool {
    LendingPool {
        id: format!("{}-LENDING", asset),
        name: format!("{} Lending Pool", asset),
        asset: asset.into(),
        tvl_usd: tvl,
        supply_apy,
        borrow_apy,
        utilization,
        collateral_factor,
        min_deposit,
        max_deposit,
        liquidation_threshold,
        app_id: None,
        source: PoolSource::Fallback,
    }
}

pub fn known_pools() -> Vec<LendingPool> {
    vec![
        known_market("ALGO", 15_000_000.0, 8.5, 12.3, 0.75, 0.8, 0.1, 10_000.0, 0.85),
        known_market("USDC", 8_000_000.0, 6.2, 9.8, 0.68, 0.9, 10.0, 5_000_000.0, 0.92),
        known_market("USDT", 6_000_000.0, 5.8, 9.2, 0.72, 0.85, 10.0, 3_000_000.0, 0.88),
    ]
}

/// Market by name, id or asset symbol, case-insensitive.
pub fn find_market<'a>(pools: &'a [LendingPool], key: &str) -> Option<&'a LendingPool> {
    pools.iter().find(|p| {
        p.name.eq_ignore_ascii_case(key) || p.id.eq_ignore_ascii_case(key) || p.asset.eq_ignore_ascii_case(key)
    })
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LendingQuote {
    pub pool: String,
    pub asset: String,
    pub amount: f64,
    pub capped: bool,
    pub fee_rate: f64,
    pub fee_amount: f64,
    pub net_amount: f64,
    pub expected_apy: f64,
    pub expected_daily_return: f64,
    pub expected_monthly_return: f64,
    pub expected_yearly_return: f64,
    pub pool_tvl: f64,
    pub min_deposit: f64,
    pub max_deposit: f64,
    pub collateral_factor: f64,
    pub utilization: f64,
}

/// Quote a deposit. Amounts under the minimum are rejected; amounts over
/// the maximum are capped.
pub fn quote_deposit(pool: &LendingPool, amount: f64, fee_rate: f64) -> Result<LendingQuote, ExecutionError> {
    if amount < pool.min_deposit {
        return Err(ExecutionError::BelowMinimum {
            amount,
            minimum: pool.min_deposit,
        });
    }
    let capped = amount > pool.max_deposit;
    let amount = if capped {
        warn!("Capping {} deposit at the {} maximum", pool.name, pool.max_deposit);
        pool.max_deposit
    } else {
        amount
    };

    let daily = amount * pool.supply_apy / 100.0 / 365.0;
    let fee_amount = amount * fee_rate;
    Ok(LendingQuote {
        pool: pool.name.clone(),
        asset: pool.asset.clone(),
        amount,
        capped,
        fee_rate,
        fee_amount,
        net_amount: amount - fee_amount,
        expected_apy: pool.supply_apy,
        expected_daily_return: daily,
        expected_monthly_return: daily * 30.0,
        expected_yearly_return: amount * pool.supply_apy / 100.0,
        pool_tvl: pool.tvl_usd,
        min_deposit: pool.min_deposit,
        max_deposit: pool.max_deposit,
        collateral_factor: pool.collateral_factor,
        utilization: pool.utilization,
    })
}

fn score(pool: &LendingPool) -> f64 {
    (72.0 + pool.supply_apy / 3.0).min(92.0)
}

pub fn opportunity(pool: &LendingPool) -> Opportunity {
    Opportunity {
        id: ulid::Ulid::new().to_string(),
        protocol: Protocol::FolksFinance,
        opportunity_type: OpportunityType::Lending,
        description: format!("Lending pool: {}", pool.name),
        score: score(pool),
        risk_level: RiskLevel::Low,
        estimated_apy: pool.supply_apy,
        pool: PoolData::Lending(pool.clone()),
        discovered_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FolksClient {
    cfg: FolksConfig,
    deps: ProtocolDeps,
    cache: PoolCache<LendingPool>,
}

impl FolksClient {
    pub fn new(cfg: FolksConfig, deps: ProtocolDeps) -> Self {
        let cache = PoolCache::new(deps.cache_ttl);
        Self { cfg, deps, cache }
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint::new("folks_markets", self.cfg.markets_url.clone()),
            Endpoint::new("folks_pools", self.cfg.pools_url.clone()),
        ]
    }

    pub async fn fetch_pools(&self) -> PoolSnapshot<LendingPool> {
        if let Some((endpoint, pools)) = self.cache.get().await {
            return PoolSnapshot {
                pools,
                source: PoolSource::Live { endpoint },
            };
        }

        match self
            .deps
            .fetcher
            .first_match(&self.endpoints(), |ep, body| parse_pools(body, ep.name))
            .await
        {
            Some((endpoint, pools)) => {
                self.cache.put(&endpoint, pools.clone()).await;
                PoolSnapshot {
                    pools,
                    source: PoolSource::Live { endpoint },
                }
            }
            None => {
                warn!("Folks Finance config unavailable; using known market table");
                PoolSnapshot {
                    pools: known_pools(),
                    source: PoolSource::Fallback,
                }
            }
        }
    }

    async fn market(&self, key: &str) -> Result<LendingPool, ExecutionError> {
        let snapshot = self.fetch_pools().await;
        find_market(&snapshot.pools, key)
            .cloned()
            .ok_or_else(|| ExecutionError::PoolNotFound(key.to_string()))
    }

    pub async fn quote(&self, pool_name: &str, amount: f64) -> Result<LendingQuote, ExecutionError> {
        let pool = self.market(pool_name).await?;
        let quote = quote_deposit(&pool, amount, self.cfg.deposit_fee)?;
        info!(
            "Lending quote: {} {} in {} at {:.2}% APY ({:.6}/day)",
            quote.amount, quote.asset, pool.name, quote.expected_apy, quote.expected_daily_return
        );
        Ok(quote)
    }

    fn method_chain(&self, pool: &LendingPool, amount: u64, asset_id: u64) -> Vec<MethodPlan> {
        let amount_arg = encode_u64_arg(amount);
        let pool_name = pool.name.as_bytes().to_vec();
        let mut plans = Vec::new();

        let direct = pool.app_id.or_else(|| self.cfg.lending_pools.get(&pool.asset).copied());
        match direct {
            Some(app_id) => plans.push(MethodPlan::new(
                "direct_lending",
                app_id,
                vec![b"deposit".to_vec(), amount_arg.clone()],
            )
            .with_opt_in()),
            None => warn!("No lending pool app configured for {}", pool.asset),
        }
        plans.push(MethodPlan::new(
            "pool_lending",
            self.cfg.pool_manager_app_id,
            vec![b"lend".to_vec(), amount_arg.clone(), pool_name.clone()],
        ));
        plans.push(MethodPlan::new(
            "app_lending",
            self.cfg.deposit_app_id,
            vec![b"deposit".to_vec(), amount_arg, pool.asset.as_bytes().to_vec(), pool_name],
        )
        .with_opt_in());

        plans.into_iter().map(|plan| plan.with_assets(vec![asset_id])).collect()
    }

    /// Deposit into a lending market, trying each execution method in turn.
    pub async fn lend(&self, pool_name: &str, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let exec = self.deps.exec()?;
        let pool = self.market(pool_name).await?;
        let quote = quote_deposit(&pool, amount, self.cfg.deposit_fee)?;

        let asset = AssetRegistry::new()
            .by_name(&pool.asset)
            .ok_or_else(|| ExecutionError::UnknownAsset(pool.asset.clone()))?;
        exec.require_balance(asset.id, quote.amount).await?;

        let base = to_base_units(quote.amount, asset.decimals);
        let plans = self.method_chain(&pool, base, asset.id);
        let note = format!("Folks Finance Lending: {}", pool.name);
        let (method, submission) = exec.run_methods(plans, asset.id, base, &note).await?;

        let mut trade = TradeRecord::new(TradeKind::Lend, Protocol::FolksFinance, &pool.name, asset.name, quote.amount);
        trade.method = Some(method.to_string());
        trade.expected_apy = Some(quote.expected_apy);
        trade.expected_daily_return = Some(quote.expected_daily_return);
        submission.apply(&mut trade);
        Ok(trade)
    }
}

#[async_trait]
impl DefiProtocol for FolksClient {
    fn protocol(&self) -> Protocol {
        Protocol::FolksFinance
    }

    async fn opportunities(&self, top_n: usize) -> Result<Vec<Opportunity>> {
        let mut pools = self.fetch_pools().await.pools;
        pools.sort_by(|a, b| b.supply_apy.total_cmp(&a.supply_apy));
        Ok(pools.iter().take(top_n).map(opportunity).collect())
    }

    async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let PoolData::Lending(pool) = &opportunity.pool else {
            return Err(ExecutionError::Unsupported(format!(
                "{} on Folks Finance",
                opportunity.opportunity_type
            )));
        };
        let mut trade = self.lend(&pool.name, amount).await?;
        trade.opportunity_id = Some(opportunity.id.clone());
        Ok(trade)
    }

    async fn verify_contracts(&self) -> Vec<ContractCheck> {
        let algod = self.deps.algod.as_ref();
        let mut checks = vec![
            probe_app(algod, "Folks deposits", self.cfg.deposit_app_id).await,
            probe_app(algod, "Folks pool manager", self.cfg.pool_manager_app_id).await,
        ];
        for (asset, app_id) in &self.cfg.lending_pools {
            checks.push(probe_app(algod, &format!("Folks {} pool", asset), *app_id).await);
        }

        let boxes = match algod.application_boxes(self.cfg.pool_manager_app_id).await {
            Ok(names) => ContractCheck {
                name: "Folks pool manager boxes".into(),
                app_id: self.cfg.pool_manager_app_id,
                reachable: true,
                detail: format!("{} boxes", names.len()),
            },
            Err(e) => ContractCheck {
                name: "Folks pool manager boxes".into(),
                app_id: self.cfg.pool_manager_app_id,
                reachable: false,
                detail: e.to_string(),
            },
        };
        checks.push(boxes);
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;
    use crate::types::TradeStatus;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn parses_markets_and_pools() {
        let markets = json!([{
            "id": "algo", "asset": "ALGO", "supply_apy": 7.1, "borrow_apy": 11,
            "total_supply_usd": "12000000", "utilization": 64.0, "collateral_factor": 0.75,
            "minimum_deposit": 1, "maximum_deposit": 500
        }]);
        let pools = parse_pools(&markets, "folks_markets");
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "ALGO Lending Pool");
        assert!((pools[0].utilization - 0.64).abs() < 1e-9);
        assert_eq!(pools[0].max_deposit, 500.0);

        let simple = json!({"pools": [{"asset": "usdc", "apy": 4.0, "tvl_usd": 10, "utilization": 0.5}, {"asset": "x"}]});
        let pools = parse_pools(&simple, "folks_pools");
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].asset, "USDC");
        assert_eq!(pools[0].utilization, 0.5);
    }

    #[test]
    fn deposit_bounds() {
        let pools = known_pools();
        let usdc = find_market(&pools, "usdc").unwrap();
        assert!(matches!(
            quote_deposit(usdc, 5.0, 0.001),
            Err(ExecutionError::BelowMinimum { minimum, .. }) if minimum == 10.0
        ));

        let algo = find_market(&pools, "ALGO Lending Pool").unwrap();
        let quote = quote_deposit(algo, 20_000.0, 0.001).unwrap();
        assert!(quote.capped);
        assert_eq!(quote.amount, 10_000.0);
        assert!((quote.fee_amount - 10.0).abs() < 1e-9);
        assert!((quote.net_amount - 9_990.0).abs() < 1e-9);
        assert!((quote.expected_yearly_return - 850.0).abs() < 1e-9);
        assert!((quote.expected_monthly_return - quote.expected_daily_return * 30.0).abs() < 1e-12);
    }

    #[test]
    fn score_caps_at_92() {
        let mut pool = known_pools().remove(0);
        assert!((score(&pool) - (72.0 + 8.5 / 3.0)).abs() < 1e-9);
        pool.supply_apy = 90.0;
        assert_eq!(score(&pool), 92.0);
        assert_eq!(opportunity(&pool).risk_level, RiskLevel::Low);
    }

    async fn client(fake: Arc<FakeAlgod>, dry_run: bool) -> FolksClient {
        let client = FolksClient::new(FolksConfig::default(), ProtocolDeps::for_tests(fake, dry_run));
        client.cache.put("test", known_pools()).await;
        client
    }

    #[tokio::test]
    async fn direct_lending_goes_first() {
        let fake = Arc::new(FakeAlgod::default());
        fake.add_app(FolksConfig::default().lending_pools["ALGO"]);
        fake.confirm_all(9);
        let client = client(fake.clone(), false).await;

        let trade = client.lend("ALGO", 1.0).await.unwrap();
        assert_eq!(trade.method.as_deref(), Some("direct_lending"));
        assert_eq!(trade.status, TradeStatus::Confirmed);
        assert_eq!(trade.kind, TradeKind::Lend);
        assert_eq!(fake.submit_calls(), 1);
    }

    #[tokio::test]
    async fn opts_in_to_lending_app_before_first_deposit() {
        let fake = Arc::new(FakeAlgod::default());
        fake.confirm_all(9);
        let client = client(fake.clone(), false).await;

        let trade = client.lend("ALGO", 1.0).await.unwrap();
        assert_eq!(trade.method.as_deref(), Some("direct_lending"));
        // app opt-in, then the funding + deposit group
        assert_eq!(fake.submit_calls(), 2);
    }

    #[tokio::test]
    async fn requires_pool_asset() {
        let fake = Arc::new(FakeAlgod::default());
        let client = client(fake.clone(), true).await;
        assert!(matches!(
            client.lend("USDC", 20.0).await,
            Err(ExecutionError::InsufficientBalance { .. })
        ));

        fake.add_asset(31566704, 50_000_000);
        let trade = client.lend("USDC", 20.0).await.unwrap();
        assert_eq!(trade.status, TradeStatus::DryRun);
        assert_eq!(trade.asset, "USDC");
    }

    #[tokio::test]
    async fn health_checks_cover_every_app() {
        let client = client(Arc::new(FakeAlgod::default()), true).await;
        let checks = client.verify_contracts().await;
        // deposits, pool manager, three pools, boxes
        assert_eq!(checks.len(), 6);
        assert!(checks.iter().all(|c| c.reachable));
    }
}
