//! Pact Finance yield farming.

use crate::algorand::assets::normalize_name;
use crate::algorand::transaction::{encode_u64_arg, to_base_units};
use crate::algorand::AssetRegistry;
use crate::config::schema::PactConfig;
use crate::protocols::endpoints::{items, num_field, str_field, uint, Endpoint, PoolCache};
use crate::protocols::error::ExecutionError;
use crate::protocols::execution::MethodPlan;
use crate::protocols::traits::{probe_app, ContractCheck, DefiProtocol, PoolSnapshot};
use crate::protocols::ProtocolDeps;
use crate::types::{
    FarmPool, Opportunity, OpportunityType, PoolData, PoolSource, Protocol, RiskLevel, TradeKind,
    TradeRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Reward token paid by Pact farms.
pub const REWARDS_TOKEN: &str = "PACT";

const DEFAULT_FEE: f64 = 0.003;
const DEFAULT_MIN_STAKE: f64 = 0.1;
const DEFAULT_MAX_STAKE: f64 = 1000.0;

// ---------------------------------------------------------------------------
// Pool data
// ---------------------------------------------------------------------------

fn parse_farm(pool: &Value, index: usize, source: &PoolSource) -> Option<FarmPool> {
    let asset_1 = normalize_name(str_field(pool, &["asset1", "asset_1"])?);
    let asset_2 = normalize_name(str_field(pool, &["asset2", "asset_2"])?);
    let apy = num_field(pool, &["apy"])?;
    let tvl_usd = num_field(pool, &["tvl_usd", "tvl"])?;

    let id = match pool.get("id").or_else(|| pool.get("pool_id")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("pact_{}", index),
    };
    let name = str_field(pool, &["name"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}-{} Yield Farm", asset_1, asset_2));

    Some(FarmPool {
        id,
        name,
        asset_1,
        asset_2,
        tvl_usd,
        apy,
        volume_24h_usd: num_field(pool, &["volume_24h", "volume24h"]).unwrap_or(0.0),
        fee: num_field(pool, &["fee"]).unwrap_or(DEFAULT_FEE),
        min_stake: num_field(pool, &["min_stake"]).unwrap_or(DEFAULT_MIN_STAKE),
        max_stake: num_field(pool, &["max_stake"]).unwrap_or(DEFAULT_MAX_STAKE),
        lock_period_days: pool.get("lock_period").and_then(uint).unwrap_or(0) as u32,
        rewards_token: str_field(pool, &["rewards_token"])
            .unwrap_or(REWARDS_TOKEN)
            .to_string(),
        app_id: pool.get("app_id").and_then(uint),
        source: source.clone(),
    })
}

/// Parse a pool list from the Pact API, analytics mirror or GitHub config.
pub fn parse_pools(body: &Value, endpoint: &str) -> Vec<FarmPool> {
    let source = PoolSource::Live {
        endpoint: endpoint.to_string(),
    };
    items(body)
        .iter()
        .enumerate()
        .filter_map(|(i, pool)| parse_farm(pool, i, &source))
        .collect()
}

fn known_farm(id: &str, a: &str, b: &str, tvl: f64, apy: f64, volume: f64, min_stake: f64) -> FarmPool {
    FarmPool {
        id: id.into(),
        name: format!("{}-{} Yield Farm", a, b),
        asset_1: a.into(),
        asset_2: b.into(),
        tvl_usd: tvl,
        apy,
        volume_24h_usd: volume,
        fee: DEFAULT_FEE,
        min_stake,
        max_stake: DEFAULT_MAX_STAKE,
        lock_period_days: 0,
        rewards_token: REWARDS_TOKEN.into(),
        app_id: None,
        source: PoolSource::Fallback,
    }
}

pub fn known_pools() -> Vec<FarmPool> {
    vec![
        known_farm("ALGO-USDC-FARM", "ALGO", "USDC", 8_000_000.0, 18.5, 1_200_000.0, 0.1),
        known_farm("ALGO-USDT-FARM", "ALGO", "USDT", 5_000_000.0, 16.2, 800_000.0, 0.1),
        known_farm("USDC-USDT-FARM", "USDC", "USDT", 3_000_000.0, 14.8, 600_000.0, 10.0),
    ]
}

/// Farm by display name or id, case-insensitive.
pub fn find_farm<'a>(pools: &'a [FarmPool], key: &str) -> Option<&'a FarmPool> {
    pools
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(key) || p.id.eq_ignore_ascii_case(key))
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FarmQuote {
    pub pool: String,
    pub asset: String,
    pub amount: f64,
    pub original_amount: f64,
    pub adjusted: bool,
    pub apy: f64,
    pub expected_daily_return: f64,
    /// ALGO.
    pub network_fee: f64,
    pub pool_tvl: f64,
    pub min_stake: f64,
    pub max_stake: f64,
}

/// Quote staking `amount` into a farm.
///
/// An amount under the minimum stake is raised to the minimum when it is at
/// least half of it, or when the minimum is at most 1.0; otherwise it is
/// rejected.
pub fn quote_farm(pool: &FarmPool, amount: f64, network_fee: f64) -> Result<FarmQuote, ExecutionError> {
    let mut staked = amount;
    if amount < pool.min_stake {
        if amount >= pool.min_stake * 0.5 || pool.min_stake <= 1.0 {
            info!("Raising stake from {} to the {} minimum of {}", amount, pool.name, pool.min_stake);
            staked = pool.min_stake;
        } else {
            return Err(ExecutionError::BelowMinimum {
                amount,
                minimum: pool.min_stake,
            });
        }
    }

    Ok(FarmQuote {
        pool: pool.name.clone(),
        asset: pool.asset_1.clone(),
        amount: staked,
        original_amount: amount,
        adjusted: staked != amount,
        apy: pool.apy,
        expected_daily_return: pool.apy / 100.0 / 365.0 * staked,
        network_fee,
        pool_tvl: pool.tvl_usd,
        min_stake: pool.min_stake,
        max_stake: pool.max_stake,
    })
}

fn score(pool: &FarmPool) -> f64 {
    (75.0 + pool.apy / 3.0).min(95.0)
}

pub fn opportunity(pool: &FarmPool) -> Opportunity {
    Opportunity {
        id: ulid::Ulid::new().to_string(),
        protocol: Protocol::PactFinance,
        opportunity_type: OpportunityType::YieldFarming,
        description: format!("Yield farming pool: {}", pool.name),
        score: score(pool),
        risk_level: RiskLevel::Medium,
        estimated_apy: pool.apy,
        pool: PoolData::Farm(pool.clone()),
        discovered_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PactClient {
    cfg: PactConfig,
    deps: ProtocolDeps,
    cache: PoolCache<FarmPool>,
}

impl PactClient {
    pub fn new(cfg: PactConfig, deps: ProtocolDeps) -> Self {
        let cache = PoolCache::new(deps.cache_ttl);
        Self { cfg, deps, cache }
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        let path = "/api/pools?chain=algorand&limit=250";
        vec![
            Endpoint::new("pact_api", format!("{}{}", self.cfg.api_url.trim_end_matches('/'), path)),
            Endpoint::new(
                "pact_analytics",
                format!("{}{}", self.cfg.analytics_url.trim_end_matches('/'), path),
            ),
            Endpoint::new("pact_github", self.cfg.github_pools_url.clone()),
        ]
    }

    pub async fn fetch_pools(&self) -> PoolSnapshot<FarmPool> {
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
                warn!("Pact Finance endpoints unavailable; using known farm table");
                PoolSnapshot {
                    pools: known_pools(),
                    source: PoolSource::Fallback,
                }
            }
        }
    }

    async fn farm(&self, name: &str) -> Result<FarmPool, ExecutionError> {
        let snapshot = self.fetch_pools().await;
        find_farm(&snapshot.pools, name)
            .cloned()
            .ok_or_else(|| ExecutionError::PoolNotFound(name.to_string()))
    }

    pub async fn quote(&self, pool_name: &str, amount: f64) -> Result<FarmQuote, ExecutionError> {
        let pool = self.farm(pool_name).await?;
        let quote = quote_farm(&pool, amount, self.cfg.network_fee)?;
        info!(
            "Farm quote: {} {} in {} at {:.2}% APY ({:.6}/day)",
            quote.amount, quote.asset, pool.name, quote.apy, quote.expected_daily_return
        );
        Ok(quote)
    }

    fn method_chain(&self, pool: &FarmPool, amount: u64, sender: crate::algorand::Address) -> Vec<MethodPlan> {
        let pool_id = pool.id.as_bytes().to_vec();
        let amount_arg = encode_u64_arg(amount);
        let staking_app = pool.app_id.unwrap_or(self.cfg.staking_app_id);
        vec![
            MethodPlan::new(
                "staking_app",
                staking_app,
                vec![b"stake".to_vec(), amount_arg.clone(), REWARDS_TOKEN.as_bytes().to_vec(), pool_id.clone()],
            )
            .with_opt_in(),
            MethodPlan::new(
                "bootstrap",
                self.cfg.factory_app_id,
                vec![b"bootstrap".to_vec(), amount_arg.clone(), pool_id.clone()],
            ),
            MethodPlan::new(
                "stake",
                self.cfg.factory_app_id,
                vec![b"stake".to_vec(), amount_arg.clone(), pool_id.clone()],
            ),
            MethodPlan::new(
                "farm",
                self.cfg.router_app_id,
                vec![b"farm".to_vec(), amount_arg, pool_id],
            ),
        ]
        .into_iter()
        .map(|plan| plan.with_accounts(vec![sender]))
        .collect()
    }

    /// Stake into a farm, trying each execution method in turn.
    pub async fn yield_farm(&self, pool_name: &str, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let exec = self.deps.exec()?;
        let pool = self.farm(pool_name).await?;
        let quote = quote_farm(&pool, amount, self.cfg.network_fee)?;

        let registry = AssetRegistry::new();
        let asset = registry
            .by_name(&pool.asset_1)
            .ok_or_else(|| ExecutionError::UnknownAsset(pool.asset_1.clone()))?;
        exec.require_balance(asset.id, quote.amount).await?;

        let base = to_base_units(quote.amount, asset.decimals);
        let plans = self
            .method_chain(&pool, base, exec.sender())
            .into_iter()
            .map(|plan| plan.with_assets(vec![asset.id]))
            .collect();
        let note = format!("Pact Finance Farm: {}", pool.name);
        let (method, submission) = exec.run_methods(plans, asset.id, base, &note).await?;

        let mut trade = TradeRecord::new(TradeKind::YieldFarm, Protocol::PactFinance, &pool.name, asset.name, quote.amount);
        trade.method = Some(method.to_string());
        trade.expected_apy = Some(quote.apy);
        trade.expected_daily_return = Some(quote.expected_daily_return);
        submission.apply(&mut trade);
        Ok(trade)
    }
}

#[async_trait]
impl DefiProtocol for PactClient {
    fn protocol(&self) -> Protocol {
        Protocol::PactFinance
    }

    async fn opportunities(&self, top_n: usize) -> Result<Vec<Opportunity>> {
        let mut pools = self.fetch_pools().await.pools;
        pools.sort_by(|a, b| b.apy.total_cmp(&a.apy));
        Ok(pools.iter().take(top_n).map(opportunity).collect())
    }

    async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let PoolData::Farm(pool) = &opportunity.pool else {
            return Err(ExecutionError::Unsupported(format!(
                "{} on Pact Finance",
                opportunity.opportunity_type
            )));
        };
        let mut trade = self.yield_farm(&pool.name, amount).await?;
        trade.opportunity_id = Some(opportunity.id.clone());
        Ok(trade)
    }

    async fn verify_contracts(&self) -> Vec<ContractCheck> {
        let algod = self.deps.algod.as_ref();
        vec![
            probe_app(algod, "Pact factory", self.cfg.factory_app_id).await,
            probe_app(algod, "Pact router", self.cfg.router_app_id).await,
            probe_app(algod, "Pact staking", self.cfg.staking_app_id).await,
        ]
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
    fn parses_api_and_github_lists() {
        let api = json!([
            {"id": "p1", "name": "ALGO-USDC Farm", "asset1": "ALGO", "asset2": "USDC",
             "apy": "21.5", "tvl_usd": 1000000, "min_stake": 1, "lock_period": 7},
            {"id": "p2", "name": "no numbers", "asset1": "ALGO", "asset2": "USDC"}
        ]);
        let pools = parse_pools(&api, "pact_api");
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].apy, 21.5);
        assert_eq!(pools[0].lock_period_days, 7);
        assert_eq!(pools[0].rewards_token, "PACT");

        let github = json!([{"pool_id": 42, "asset1": "USDC", "asset2": "USDT", "tvl": 5, "apy": 3}]);
        let pools = parse_pools(&github, "pact_github");
        assert_eq!(pools[0].id, "42");
        assert_eq!(pools[0].name, "USDC-USDT Yield Farm");
    }

    #[test]
    fn minimum_stake_adjustment() {
        let pools = known_pools();
        let algo_farm = find_farm(&pools, "algo-usdc yield farm").unwrap();
        let quote = quote_farm(algo_farm, 0.02, 0.0024).unwrap();
        assert!(quote.adjusted);
        assert_eq!(quote.amount, 0.1);

        let stable_farm = find_farm(&pools, "USDC-USDT-FARM").unwrap();
        let quote = quote_farm(stable_farm, 6.0, 0.0024).unwrap();
        assert_eq!(quote.amount, 10.0);
        assert!(matches!(
            quote_farm(stable_farm, 4.0, 0.0024),
            Err(ExecutionError::BelowMinimum { .. })
        ));
    }

    #[test]
    fn daily_return() {
        let pools = known_pools();
        let quote = quote_farm(&pools[0], 365.0, 0.0024).unwrap();
        assert!((quote.expected_daily_return - 0.185).abs() < 1e-9);
        assert!(!quote.adjusted);
    }

    #[test]
    fn score_formula() {
        let pools = known_pools();
        assert!((score(&pools[0]) - (75.0 + 18.5 / 3.0)).abs() < 1e-9);
        let opp = opportunity(&pools[0]);
        assert_eq!(opp.risk_level, RiskLevel::Medium);
        assert_eq!(opp.description, "Yield farming pool: ALGO-USDC Yield Farm");
    }

    async fn client(fake: Arc<FakeAlgod>, dry_run: bool) -> PactClient {
        let client = PactClient::new(PactConfig::default(), ProtocolDeps::for_tests(fake, dry_run));
        client.cache.put("test", known_pools()).await;
        client
    }

    #[tokio::test]
    async fn unknown_pool() {
        let client = client(Arc::new(FakeAlgod::default()), true).await;
        assert!(matches!(
            client.quote("DOGE Farm", 1.0).await,
            Err(ExecutionError::PoolNotFound(_))
        ));
    }

    #[tokio::test]
    async fn first_method_that_lands_wins() {
        let fake = Arc::new(FakeAlgod::default());
        fake.push_submit_error(400, "logic eval error: unknown method");
        fake.confirm_all(77);
        let client = client(fake.clone(), false).await;

        let trade = client.yield_farm("ALGO-USDC Yield Farm", 0.5).await.unwrap();
        assert_eq!(trade.method.as_deref(), Some("bootstrap"));
        assert_eq!(trade.status, TradeStatus::Confirmed);
        assert_eq!(trade.confirmed_round, Some(77));
        assert_eq!(fake.submit_calls(), 2);
    }

    #[tokio::test]
    async fn all_methods_failing_is_an_error() {
        let fake = Arc::new(FakeAlgod::default());
        for _ in 0..4 {
            fake.push_submit_error(400, "logic eval error: nope");
        }
        let client = client(fake, false).await;

        match client.yield_farm("ALGO-USDC Yield Farm", 0.5).await {
            Err(ExecutionError::AllMethodsFailed(failures)) => {
                let names: Vec<_> = failures.iter().map(|f| f.method.as_str()).collect();
                assert_eq!(names, ["staking_app", "bootstrap", "stake", "farm"]);
            }
            other => panic!("unexpected: {:?}", other.map(|t| t.status)),
        }
    }

    #[tokio::test]
    async fn verify_contracts_flags_missing_app() {
        let fake = Arc::new(FakeAlgod::default());
        let cfg = PactConfig::default();
        fake.remove_app(cfg.staking_app_id);
        let client = client(fake, true).await;

        let checks = client.verify_contracts().await;
        let reachable: Vec<_> = checks.iter().map(|c| (c.app_id, c.reachable)).collect();
        assert_eq!(
            reachable,
            [(cfg.factory_app_id, true), (cfg.router_app_id, true), (cfg.staking_app_id, false)]
        );
    }

    #[tokio::test]
    async fn dry_run_stake_skips_app_opt_in() {
        let fake = Arc::new(FakeAlgod::default());
        let client = client(fake.clone(), true).await;

        let trade = client.yield_farm("ALGO-USDC Yield Farm", 0.5).await.unwrap();
        assert_eq!(trade.status, TradeStatus::DryRun);
        assert_eq!(trade.method.as_deref(), Some("staking_app"));
        assert_eq!(fake.submit_calls(), 0);
    }
}
