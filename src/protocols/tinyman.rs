//! Tinyman V2 AMM: pool discovery, swap quotes, swaps and liquidity.

use crate::algorand::assets::normalize_name;
use crate::algorand::transaction::{encode_u64_arg, from_base_units, to_base_units, OnComplete, Transaction};
use crate::algorand::{Address, AssetRegistry};
use crate::config::schema::TinymanConfig;
use crate::protocols::endpoints::{items, num_field, str_field, uint, Endpoint, PoolCache};
use crate::protocols::error::ExecutionError;
use crate::protocols::execution::ExecutionContext;
use crate::protocols::traits::{probe_app, ContractCheck, DefiProtocol, PoolSnapshot};
use crate::protocols::ProtocolDeps;
use crate::types::{
    DexPool, Opportunity, OpportunityType, PoolAsset, PoolData, PoolSource, Protocol, RiskLevel,
    TradeKind, TradeRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Swap fee charged by every Tinyman V2 pool.
pub const POOL_FEE: f64 = 0.003;

// ---------------------------------------------------------------------------
// Pool data
// ---------------------------------------------------------------------------

fn asset_from_object(obj: &Value) -> Option<PoolAsset> {
    let id = obj.get("id").and_then(uint)?;
    let name = str_field(obj, &["unit_name", "name"])?;
    Some(PoolAsset {
        id,
        name: normalize_name(name),
    })
}

fn parse_current(pool: &Value, source: &PoolSource) -> Option<DexPool> {
    let asset_1 = asset_from_object(pool.get("asset_1")?)?;
    let asset_2 = asset_from_object(pool.get("asset_2")?)?;
    let liquidity_usd = num_field(pool, &["liquidity_in_usd"])?;
    let reserves = match (
        pool.get("current_asset_1_reserves").and_then(uint),
        pool.get("current_asset_2_reserves").and_then(uint),
    ) {
        (Some(r1), Some(r2)) if r1 > 0 && r2 > 0 => Some((r1, r2)),
        _ => None,
    };

    Some(DexPool {
        name: format!("{}-{}", asset_1.name, asset_2.name),
        asset_1,
        asset_2,
        liquidity_usd,
        volume_24h_usd: num_field(pool, &["last_day_volume_in_usd"]).unwrap_or(0.0),
        fee: POOL_FEE,
        apy: num_field(pool, &["total_annual_percentage_yield"]).unwrap_or(0.0) * 100.0,
        address: str_field(pool, &["address"]).map(str::to_string),
        reserves,
        pool_token_id: pool.pointer("/liquidity_asset/id").and_then(uint),
        issued_pool_tokens: pool.get("issued_pool_tokens").and_then(uint),
        source: source.clone(),
    })
}

fn parse_legacy(pool: &Value, source: &PoolSource, registry: &AssetRegistry) -> Option<DexPool> {
    let name_1 = normalize_name(pool.get("asset1")?.as_str()?);
    let name_2 = normalize_name(pool.get("asset2")?.as_str()?);
    let id_1 = registry.by_name(&name_1)?.id;
    let id_2 = registry.by_name(&name_2)?.id;

    Some(DexPool {
        name: format!("{}-{}", name_1, name_2),
        asset_1: PoolAsset { id: id_1, name: name_1 },
        asset_2: PoolAsset { id: id_2, name: name_2 },
        liquidity_usd: num_field(pool, &["tvl", "totalValueLocked"])?,
        volume_24h_usd: num_field(pool, &["volume24h", "volume_24h"]).unwrap_or(0.0),
        fee: num_field(pool, &["fee"]).unwrap_or(POOL_FEE),
        apy: num_field(pool, &["apy"]).unwrap_or(0.0),
        address: None,
        reserves: None,
        pool_token_id: None,
        issued_pool_tokens: None,
        source: source.clone(),
    })
}

/// Parse an analytics response in either the current or the legacy format.
/// Entries that cannot be read are skipped.
pub fn parse_pools(body: &Value, endpoint: &str, registry: &AssetRegistry) -> Vec<DexPool> {
    let source = PoolSource::Live {
        endpoint: endpoint.to_string(),
    };
    items(body)
        .iter()
        .filter_map(|pool| {
            if pool.get("asset_1").is_some() {
                parse_current(pool, &source)
            } else if pool.get("asset1").is_some() {
                parse_legacy(pool, &source, registry)
            } else {
                None
            }
        })
        .collect()
}

fn known_pool(a: (u64, &str), b: (u64, &str), liquidity: f64, volume: f64, apy: f64) -> DexPool {
    DexPool {
        name: format!("{}-{}", a.1, b.1),
        asset_1: PoolAsset { id: a.0, name: a.1.into() },
        asset_2: PoolAsset { id: b.0, name: b.1.into() },
        liquidity_usd: liquidity,
        volume_24h_usd: volume,
        fee: POOL_FEE,
        apy,
        address: None,
        reserves: None,
        pool_token_id: None,
        issued_pool_tokens: None,
        source: PoolSource::Fallback,
    }
}

/// Static pool table used when every analytics endpoint is down.
pub fn known_pools() -> Vec<DexPool> {
    let algo = (0, "ALGO");
    let usdc = (31566704, "USDC");
    let usdt = (312769, "USDT");
    vec![
        known_pool(algo, usdc, 5_000_000.0, 1_000_000.0, 15.5),
        known_pool(algo, usdt, 3_000_000.0, 800_000.0, 12.8),
        known_pool(usdc, usdt, 2_000_000.0, 500_000.0, 8.2),
    ]
}

/// Pool matching the pair in either order.
pub fn find_pool<'a>(pools: &'a [DexPool], a: &str, b: &str) -> Option<&'a DexPool> {
    let (a, b) = (normalize_name(a), normalize_name(b));
    pools.iter().find(|p| {
        (p.asset_1.name == a && p.asset_2.name == b) || (p.asset_1.name == b && p.asset_2.name == a)
    })
}

// ---------------------------------------------------------------------------
// Quotes
// ---------------------------------------------------------------------------

/// How a quote's output was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteBasis {
    /// Constant-product math over on-chain reserves.
    Reserves,
    /// Liquidity-based estimate; never executed.
    Heuristic,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapQuote {
    pub pool: String,
    pub asset_in: PoolAsset,
    pub asset_out: PoolAsset,
    pub amount_in: f64,
    pub amount_out: f64,
    pub min_amount_out: f64,
    /// Percent.
    pub price_impact: f64,
    pub fee: f64,
    pub liquidity_usd: f64,
    pub volume_24h_usd: f64,
    pub basis: QuoteBasis,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Quote swapping `amount` of `asset_in` through `pool`.
pub fn quote_pool(
    pool: &DexPool,
    asset_in: &str,
    amount: f64,
    registry: &AssetRegistry,
    cfg: &TinymanConfig,
) -> Result<SwapQuote, ExecutionError> {
    let asset_in = normalize_name(asset_in);
    let (input, output, reserves) = if pool.asset_1.name == asset_in {
        (&pool.asset_1, &pool.asset_2, pool.reserves)
    } else if pool.asset_2.name == asset_in {
        (&pool.asset_2, &pool.asset_1, pool.reserves.map(|(r1, r2)| (r2, r1)))
    } else {
        return Err(ExecutionError::PoolNotFound(format!("{} in {}", asset_in, pool.name)));
    };

    let (amount_out, price_impact, basis) = match reserves {
        Some((r_in, r_out)) => {
            let in_base = to_base_units(amount, registry.decimals(input.id)) as f64;
            let in_after_fee = in_base * (1.0 - pool.fee);
            let denom = r_in as f64 + in_after_fee;
            let out_base = (r_out as f64 * in_after_fee / denom).floor() as u64;
            (
                from_base_units(out_base, registry.decimals(output.id)),
                in_after_fee / denom * 100.0,
                QuoteBasis::Reserves,
            )
        }
        None => {
            let impact = if pool.liquidity_usd > 0.0 {
                amount * cfg.algo_price_usd / pool.liquidity_usd * 100.0
            } else {
                100.0
            };
            (amount * (1.0 - pool.fee), impact, QuoteBasis::Heuristic)
        }
    };

    let amount_out = round_to(amount_out, 6);
    Ok(SwapQuote {
        pool: pool.name.clone(),
        asset_in: input.clone(),
        asset_out: output.clone(),
        amount_in: amount,
        amount_out,
        min_amount_out: round_to(amount_out * (1.0 - cfg.slippage), 6),
        price_impact: round_to(price_impact, 4),
        fee: pool.fee,
        liquidity_usd: pool.liquidity_usd,
        volume_24h_usd: pool.volume_24h_usd,
        basis,
    })
}

/// Pool tokens expected for a deposit, or None without on-chain supply data.
fn expected_pool_tokens(pool: &DexPool, base_1: u64, base_2: u64) -> Option<u64> {
    let (r1, r2) = pool.reserves?;
    let issued = pool.issued_pool_tokens? as f64;
    let by_1 = base_1 as f64 * issued / r1 as f64;
    let by_2 = base_2 as f64 * issued / r2 as f64;
    Some(by_1.min(by_2).floor() as u64)
}

fn score(pool: &DexPool) -> f64 {
    (70.0 + pool.liquidity_usd / 1_000_000.0).min(95.0)
}

pub fn opportunity(pool: &DexPool) -> Opportunity {
    Opportunity {
        id: ulid::Ulid::new().to_string(),
        protocol: Protocol::Tinyman,
        opportunity_type: OpportunityType::DexTrading,
        description: format!("High liquidity pool: {}", pool.name),
        score: score(pool),
        risk_level: RiskLevel::Low,
        estimated_apy: pool.apy,
        pool: PoolData::Dex(pool.clone()),
        discovered_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct TinymanClient {
    cfg: TinymanConfig,
    deps: ProtocolDeps,
    cache: PoolCache<DexPool>,
}

impl TinymanClient {
    pub fn new(cfg: TinymanConfig, deps: ProtocolDeps) -> Self {
        let cache = PoolCache::new(deps.cache_ttl);
        Self { cfg, deps, cache }
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.cfg
            .pool_api_urls
            .iter()
            .map(|url| Endpoint::new("tinyman_analytics", url.clone()))
            .collect()
    }

    fn registry(&self) -> AssetRegistry {
        AssetRegistry::new()
    }

    fn exec(&self) -> Result<&ExecutionContext, ExecutionError> {
        self.deps.exec()
    }

    /// Live pools from the analytics API, or the labelled fallback table.
    pub async fn fetch_pools(&self) -> PoolSnapshot<DexPool> {
        if let Some((endpoint, pools)) = self.cache.get().await {
            return PoolSnapshot {
                pools,
                source: PoolSource::Live { endpoint },
            };
        }

        let registry = self.registry();
        let found = self
            .deps
            .fetcher
            .first_match(&self.endpoints(), |ep, body| parse_pools(body, ep.name, &registry))
            .await;

        match found {
            Some((endpoint, pools)) => {
                self.cache.put(&endpoint, pools.clone()).await;
                PoolSnapshot {
                    pools,
                    source: PoolSource::Live { endpoint },
                }
            }
            None => {
                warn!("Tinyman analytics unavailable; using known pool table");
                PoolSnapshot {
                    pools: known_pools(),
                    source: PoolSource::Fallback,
                }
            }
        }
    }

    async fn pool_for(&self, a: &str, b: &str) -> Result<DexPool, ExecutionError> {
        let snapshot = self.fetch_pools().await;
        find_pool(&snapshot.pools, a, b)
            .cloned()
            .ok_or_else(|| ExecutionError::PoolNotFound(format!("{}-{}", a, b)))
    }

    pub async fn quote(&self, asset_in: &str, asset_out: &str, amount: f64) -> Result<SwapQuote, ExecutionError> {
        let pool = self.pool_for(asset_in, asset_out).await?;
        let quote = quote_pool(&pool, asset_in, amount, &self.registry(), &self.cfg)?;
        info!(
            "Quote: {} {} -> {} {} (impact {}%, {:?})",
            amount, quote.asset_in.name, quote.amount_out, quote.asset_out.name, quote.price_impact, quote.basis
        );
        Ok(quote)
    }

    /// Swap a fixed input amount. Only quotes priced from on-chain reserves
    /// are executed.
    pub async fn swap(&self, asset_in: &str, asset_out: &str, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let exec = self.exec()?;
        let pool = self.pool_for(asset_in, asset_out).await?;
        let quote = quote_pool(&pool, asset_in, amount, &self.registry(), &self.cfg)?;
        if quote.basis == QuoteBasis::Heuristic {
            return Err(ExecutionError::UnpricedQuote(pool.name.clone()));
        }
        let pool_address = pool_address(&pool)?;

        exec.require_balance(quote.asset_in.id, amount).await?;
        exec.ensure_asset_opt_in(quote.asset_out.id).await?;

        let registry = self.registry();
        let amount_base = to_base_units(amount, registry.decimals(quote.asset_in.id));
        let min_out_base = to_base_units(quote.min_amount_out, registry.decimals(quote.asset_out.id));
        let params = exec.params().await?;
        let sender = exec.sender();

        let transfer = Transaction::transfer(&params, sender, pool_address, quote.asset_in.id, amount_base);
        let call = Transaction::app_call(
            &params,
            sender,
            self.cfg.app_id,
            OnComplete::NoOp,
            vec![b"swap".to_vec(), b"fixed-input".to_vec(), encode_u64_arg(min_out_base)],
        )
        .with_references(
            &params,
            vec![pool_address],
            non_algo(&[quote.asset_in.id, quote.asset_out.id]),
        )
        .with_note(
            &params,
            &format!("Tinyman V2 Swap: {}->{}", quote.asset_in.name, quote.asset_out.name),
        )
        .with_fee_multiplier(&params, 2);

        let submission = exec.send(vec![transfer, call]).await?;
        let mut trade = TradeRecord::new(TradeKind::Swap, Protocol::Tinyman, &pool.name, &quote.asset_in.name, amount);
        trade.method = Some("fixed-input".into());
        submission.apply(&mut trade);
        info!("Swap {} {} -> {}: {}", amount, quote.asset_in.name, quote.asset_out.name, trade.status);
        Ok(trade)
    }

    /// Deposit both sides of a pool, minting pool tokens.
    pub async fn add_liquidity(
        &self,
        asset_a: &str,
        asset_b: &str,
        amount_a: f64,
        amount_b: f64,
    ) -> Result<TradeRecord, ExecutionError> {
        let exec = self.exec()?;
        let pool = self.pool_for(asset_a, asset_b).await?;
        let pool_address = pool_address(&pool)?;
        let pool_token = pool
            .pool_token_id
            .ok_or_else(|| ExecutionError::BadPoolData(format!("{} has no pool token id", pool.name)))?;

        // Amounts in pool order.
        let (amount_1, amount_2) = if pool.asset_1.name == normalize_name(asset_a) {
            (amount_a, amount_b)
        } else {
            (amount_b, amount_a)
        };

        let registry = self.registry();
        let base_1 = to_base_units(amount_1, registry.decimals(pool.asset_1.id));
        let base_2 = to_base_units(amount_2, registry.decimals(pool.asset_2.id));
        let expected = expected_pool_tokens(&pool, base_1, base_2)
            .ok_or_else(|| ExecutionError::UnpricedQuote(pool.name.clone()))?;
        let min_pool_tokens = (expected as f64 * (1.0 - self.cfg.slippage)).floor() as u64;

        exec.require_balance(pool.asset_1.id, amount_1).await?;
        exec.require_balance(pool.asset_2.id, amount_2).await?;
        exec.ensure_asset_opt_in(pool_token).await?;

        let params = exec.params().await?;
        let sender = exec.sender();
        let transfer_1 = Transaction::transfer(&params, sender, pool_address, pool.asset_1.id, base_1);
        let transfer_2 = Transaction::transfer(&params, sender, pool_address, pool.asset_2.id, base_2);
        let call = Transaction::app_call(
            &params,
            sender,
            self.cfg.app_id,
            OnComplete::NoOp,
            vec![b"add_liquidity".to_vec(), b"flexible".to_vec(), encode_u64_arg(min_pool_tokens)],
        )
        .with_references(&params, vec![pool_address], vec![pool_token])
        .with_note(
            &params,
            &format!("Tinyman V2 Liquidity: {}+{}", pool.asset_1.name, pool.asset_2.name),
        )
        .with_fee_multiplier(&params, 3);

        let submission = exec.send(vec![transfer_1, transfer_2, call]).await?;
        let asset = format!("{}+{}", pool.asset_1.name, pool.asset_2.name);
        let mut trade = TradeRecord::new(TradeKind::AddLiquidity, Protocol::Tinyman, &pool.name, &asset, amount_1);
        trade.method = Some("flexible".into());
        trade.expected_apy = Some(pool.apy);
        submission.apply(&mut trade);
        Ok(trade)
    }
}

fn pool_address(pool: &DexPool) -> Result<Address, ExecutionError> {
    let raw = pool
        .address
        .as_deref()
        .ok_or_else(|| ExecutionError::UnpricedQuote(pool.name.clone()))?;
    raw.parse()
        .map_err(|e| ExecutionError::BadPoolData(format!("{} address: {}", pool.name, e)))
}

fn non_algo(ids: &[u64]) -> Vec<u64> {
    ids.iter().copied().filter(|id| *id != 0).collect()
}

/// Swap direction for a DEX opportunity: spend the ALGO side if the pool has
/// one, otherwise asset_1.
pub fn swap_direction(pool: &DexPool) -> (&PoolAsset, &PoolAsset) {
    if pool.asset_2.id == 0 {
        (&pool.asset_2, &pool.asset_1)
    } else {
        (&pool.asset_1, &pool.asset_2)
    }
}

#[async_trait]
impl DefiProtocol for TinymanClient {
    fn protocol(&self) -> Protocol {
        Protocol::Tinyman
    }

    async fn opportunities(&self, top_n: usize) -> Result<Vec<Opportunity>> {
        let mut pools = self.fetch_pools().await.pools;
        pools.sort_by(|a, b| b.liquidity_usd.total_cmp(&a.liquidity_usd));
        Ok(pools.iter().take(top_n).map(opportunity).collect())
    }

    async fn execute(&self, opportunity: &Opportunity, amount: f64) -> Result<TradeRecord, ExecutionError> {
        let PoolData::Dex(pool) = &opportunity.pool else {
            return Err(ExecutionError::Unsupported(format!(
                "{} on Tinyman",
                opportunity.opportunity_type
            )));
        };
        let (input, output) = swap_direction(pool);
        let mut trade = self.swap(&input.name, &output.name, amount).await?;
        trade.opportunity_id = Some(opportunity.id.clone());
        Ok(trade)
    }

    async fn verify_contracts(&self) -> Vec<ContractCheck> {
        vec![probe_app(self.deps.algod.as_ref(), "Tinyman V2 AMM", self.cfg.app_id).await]
    }
}
