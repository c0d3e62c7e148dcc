//! algotrader: Algorand DeFi trade execution agent.
//!
//! Usage:
//!   algotrader setup                 Run the setup wizard
//!   algotrader run                   Start the trading loop + heartbeat
//!   algotrader scan                  Scan every protocol once
//!   algotrader status [--verify]     Show balances, safety and trade stats
//!   algotrader quote tinyman ALGO USDC 1.0
//!   algotrader lend "ALGO Lending Pool" 1.0

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use algotrader::algorand::{AlgodApi, AlgodClient, AssetRegistry, RetryPolicy};
use algotrader::config::{self, TraderConfig};
use algotrader::heartbeat::{HeartbeatContext, HeartbeatDaemon};
use algotrader::identity::Wallet;
use algotrader::portfolio::{fetch_balances, PortfolioReport};
use algotrader::protocols::{ExecutionContext, ExecutionError, ProtocolDeps, ProtocolSet};
use algotrader::state::{export, Database};
use algotrader::strategy::{self, TradingContext};
use algotrader::types::*;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "algotrader")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous Algorand DeFi trade execution (Tinyman, Pact, Folks)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the algotrader home directory [default: ~/.algotrader].
    #[arg(long, global = true)]
    home: Option<String>,

    /// Log level (debug, info, warn, error) [default: from algotrader.toml].
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Build and sign transactions but never submit them.
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the first-time setup wizard.
    Setup,

    /// Start the trading loop and heartbeat daemon.
    Run,

    /// Scan every enabled protocol once and store the results.
    Scan {
        /// Pools per protocol.
        #[arg(long)]
        top: Option<usize>,
    },

    /// Show balances, safety level and trade statistics.
    Status {
        /// Also probe every protocol application on chain.
        #[arg(long)]
        verify: bool,
    },

    /// Show wallet balances.
    Balance,

    /// Price a trade without executing it.
    Quote {
        #[command(subcommand)]
        target: QuoteTarget,
    },

    /// Swap a fixed input amount on Tinyman V2.
    Swap { from: String, to: String, amount: f64 },

    /// Add liquidity to a Tinyman V2 pool.
    AddLiquidity {
        asset_a: String,
        asset_b: String,
        amount_a: f64,
        amount_b: f64,
    },

    /// Deposit into a Folks Finance lending pool.
    Lend { pool: String, amount: f64 },

    /// Stake into a Pact Finance farm.
    Farm { pool: String, amount: f64 },

    /// List recent trades.
    Trades {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Mark an open position as closed.
    ClosePosition { id: String },

    /// Write a JSON portfolio report.
    Report,
}

#[derive(Subcommand, Debug)]
enum QuoteTarget {
    /// Tinyman V2 swap quote.
    Tinyman { from: String, to: String, amount: f64 },
    /// Pact Finance farm stake quote.
    Pact { pool: String, amount: f64 },
    /// Folks Finance deposit quote.
    Folks { pool: String, amount: f64 },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home_dir = match &cli.home {
        Some(home) => PathBuf::from(shellexpand::tilde(home).into_owned()),
        None => config::default_home_dir(),
    };
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config::configured_log_level(&home_dir));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let dry_run = cli.dry_run;

    match cli.command {
        Commands::Setup => cmd_setup(&home_dir),
        Commands::Run => cmd_run(&home_dir, dry_run).await,
        Commands::Scan { top } => cmd_scan(&home_dir, top).await,
        Commands::Status { verify } => cmd_status(&home_dir, verify).await,
        Commands::Balance => cmd_balance(&home_dir).await,
        Commands::Quote { target } => cmd_quote(&home_dir, target).await,
        Commands::Swap { from, to, amount } => {
            let rt = Runtime::bootstrap(&home_dir, dry_run, true)?;
            let result = rt.protocols.tinyman.swap(&from, &to, amount).await;
            rt.record(TradeKind::Swap, Protocol::Tinyman, &format!("{}-{}", from, to), &from, amount, result)
                .await
        }
        Commands::AddLiquidity {
            asset_a,
            asset_b,
            amount_a,
            amount_b,
        } => {
            let rt = Runtime::bootstrap(&home_dir, dry_run, true)?;
            let result = rt
                .protocols
                .tinyman
                .add_liquidity(&asset_a, &asset_b, amount_a, amount_b)
                .await;
            let pool = format!("{}-{}", asset_a, asset_b);
            rt.record(TradeKind::AddLiquidity, Protocol::Tinyman, &pool, &asset_a, amount_a, result)
                .await
        }
        Commands::Lend { pool, amount } => {
            let rt = Runtime::bootstrap(&home_dir, dry_run, true)?;
            let result = rt.protocols.folks.lend(&pool, amount).await;
            rt.record(TradeKind::Lend, Protocol::FolksFinance, &pool, leading_asset(&pool), amount, result)
                .await
        }
        Commands::Farm { pool, amount } => {
            let rt = Runtime::bootstrap(&home_dir, dry_run, true)?;
            let result = rt.protocols.pact.yield_farm(&pool, amount).await;
            rt.record(TradeKind::YieldFarm, Protocol::PactFinance, &pool, leading_asset(&pool), amount, result)
                .await
        }
        Commands::Trades { limit } => cmd_trades(&home_dir, limit).await,
        Commands::ClosePosition { id } => cmd_close_position(&home_dir, &id).await,
        Commands::Report => cmd_report(&home_dir).await,
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Loaded config, database, node client, wallet and protocol clients.
struct Runtime {
    config: TraderConfig,
    db: Arc<Mutex<Database>>,
    algod: Arc<dyn AlgodApi>,
    wallet: Option<Wallet>,
    protocols: ProtocolSet,
    data_dir: PathBuf,
}

impl Runtime {
    /// Load everything. Without a wallet, read-only commands still work;
    /// `require_wallet` turns a missing wallet into an error.
    fn bootstrap(home_dir: &Path, dry_run: bool, require_wallet: bool) -> Result<Self> {
        if !home_dir.exists() {
            std::fs::create_dir_all(home_dir)
                .with_context(|| format!("Failed to create home directory: {}", home_dir.display()))?;
        }
        config::load_env(home_dir);

        let config_path = config::config_path(home_dir);
        if !config_path.exists() {
            anyhow::bail!(
                "No config found at {}. Run `algotrader setup` first.",
                config_path.display()
            );
        }
        let mut config = config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        if dry_run {
            config.dry_run = true;
        }

        let db_path = PathBuf::from(config.resolved_db_path());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB parent directory: {}", parent.display()))?;
        }
        let db = Database::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        let db = Arc::new(Mutex::new(db));

        let algod: Arc<dyn AlgodApi> = Arc::new(AlgodClient::new(
            &config.algod_url,
            &config.algod_token,
            config.submission.validity_window,
        )?);

        let wallet = match Wallet::from_env() {
            Ok(wallet) => Some(wallet),
            Err(e) if require_wallet => return Err(e),
            Err(e) => {
                warn!("Running without a wallet: {:#}", e);
                None
            }
        };

        let exec = wallet.clone().map(|w| {
            ExecutionContext::new(
                algod.clone(),
                w,
                RetryPolicy::from(&config.submission),
                config.dry_run,
            )
        });
        let deps = ProtocolDeps::new(&config, algod.clone(), exec)?;
        let protocols = ProtocolSet::new(&config, deps);
        let data_dir = PathBuf::from(config.resolved_data_dir());

        Ok(Self {
            config,
            db,
            algod,
            wallet,
            protocols,
            data_dir,
        })
    }

    /// Persist a manual trade outcome and print it. Failures are stored as
    /// `failed` rows and returned as errors.
    async fn record(
        &self,
        kind: TradeKind,
        protocol: Protocol,
        pool: &str,
        asset: &str,
        amount: f64,
        result: Result<TradeRecord, ExecutionError>,
    ) -> Result<()> {
        let (trade, failure) = match result {
            Ok(trade) => (trade, None),
            Err(e) => {
                let mut trade = TradeRecord::new(kind, protocol, pool, asset, amount);
                trade.status = TradeStatus::Failed;
                trade.error = Some(e.to_string());
                (trade, Some(e))
            }
        };

        self.db.lock().await.save_trade(&trade)?;
        let path = export::write_trade(&self.data_dir, &trade)?;
        print_trade(&trade);
        println!("  Saved: {}", path.display());

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn report(&self) -> Result<PortfolioReport> {
        let address = self.wallet.as_ref().map(|w| w.address);
        PortfolioReport::collect(&self.config, &self.db, self.algod.as_ref(), address).await
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_setup(home_dir: &Path) -> Result<()> {
    let outcome = algotrader::setup::run_setup_wizard(home_dir)?;
    if let Some(mnemonic) = outcome.new_mnemonic {
        println!("{}", "Back up this mnemonic now. It is the only copy outside .env:".yellow().bold());
        println!("  {}", mnemonic);
        println!();
    }
    Ok(())
}

async fn cmd_run(home_dir: &Path, dry_run: bool) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, dry_run, true)?;
    let Some(wallet) = rt.wallet.clone() else {
        anyhow::bail!(ExecutionError::NoWallet);
    };

    println!(
        "{} Starting '{}' (wallet: {}, {})",
        ">>>".green().bold(),
        rt.config.name,
        wallet.address,
        if rt.config.dry_run {
            "dry run".yellow().to_string()
        } else {
            "LIVE".red().bold().to_string()
        },
    );

    let cancel = CancellationToken::new();

    let heartbeat_ctx = HeartbeatContext::new(rt.config.clone(), rt.db.clone(), rt.algod.clone(), Some(wallet.address));
    let heartbeat_cancel = cancel.clone();
    let heartbeat_handle = tokio::spawn(async move {
        match HeartbeatDaemon::new(heartbeat_ctx) {
            Ok(mut daemon) => {
                info!("Heartbeat tasks: {}", daemon.task_names().join(", "));
                if let Err(e) = daemon.run(heartbeat_cancel).await {
                    error!("Heartbeat daemon error: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to create heartbeat daemon: {}", e);
            }
        }
    });

    let trading_ctx = TradingContext::new(
        rt.config.clone(),
        rt.db.clone(),
        rt.algod.clone(),
        wallet.address,
        rt.protocols.enabled(),
    );
    let trading_cancel = cancel.clone();
    let trading_handle = tokio::spawn(async move {
        if let Err(e) = strategy::run_trading_loop(trading_ctx, trading_cancel).await {
            error!("Trading loop error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\n{} Shutting down gracefully...", "<<<".red().bold());
    cancel.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        if let Err(e) = heartbeat_handle.await {
            warn!("Heartbeat task join error: {}", e);
        }
        if let Err(e) = trading_handle.await {
            warn!("Trading task join error: {}", e);
        }
    })
    .await;

    info!("Shutdown complete");
    Ok(())
}

async fn cmd_scan(home_dir: &Path, top: Option<usize>) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    let top = top.unwrap_or(rt.config.trading.top_pools_per_protocol);
    let scan = strategy::scan_and_record(&rt.protocols.enabled(), top, &rt.db, &rt.data_dir).await?;

    println!();
    println!("{}", format!("=== Scan {} ===", scan.scan_id).bold());
    println!();
    for opp in &scan.opportunities {
        let source = opp.pool.source();
        let source = if source.is_live() {
            source.to_string().green().to_string()
        } else {
            source.to_string().yellow().to_string()
        };
        println!(
            "  {:>5.1}  {:<14} {:<13} {:>7.2}%  {:<6}  {}  [{}]",
            opp.score,
            opp.protocol.display_name(),
            opp.opportunity_type,
            opp.estimated_apy,
            opp.risk_level,
            opp.description,
            source,
        );
    }
    if scan.opportunities.is_empty() {
        println!("  {}", "No opportunities found".dimmed());
    }
    println!();
    Ok(())
}

async fn cmd_status(home_dir: &Path, verify: bool) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    let report = rt.report().await?;
    let last_heartbeat = rt
        .db
        .lock()
        .await
        .kv_get("last_heartbeat")?
        .unwrap_or_else(|| "never".into());

    println!();
    println!("{}", "=== algotrader Status ===".bold());
    println!();
    println!("  {}:  {}", "Name".bold(), report.name);
    println!("  {}:", "Wallet".bold());
    println!(
        "    Address:  {}",
        report.address.as_deref().unwrap_or("not configured")
    );
    match &report.balances {
        Some(b) => {
            println!("    ALGO:     {:.6} (min balance {:.6})", b.algo, b.min_balance);
            for (asset, amount) in &b.assets {
                println!("    {:<8}  {:.6}", format!("{}:", asset), amount);
            }
        }
        None => println!("    Balance:  {}", "unavailable".dimmed()),
    }
    println!();
    println!("  {}:", "Safety".bold());
    println!(
        "    Level:    {}",
        report.safety.map(colorize_level).unwrap_or_else(|| "unknown".dimmed().to_string())
    );
    if let Some(reason) = &report.halted {
        println!("    Halted:   {}", reason.red());
    }
    println!("    Mode:     {}", if report.dry_run { "dry run" } else { "live" });
    println!();
    println!("  {}:", "Trading".bold());
    println!("    Trades:   {} ({} confirmed, {} failed)", report.stats.total_trades, report.stats.confirmed_trades, report.stats.failed_trades);
    println!("    Active:   {} / {}", report.stats.active_trades, rt.config.trading.max_active_trades);
    println!("    Volume:   {:.3}", report.stats.total_volume);
    println!("    Yield/day: {:.6}", report.stats.expected_daily_yield);
    println!("    Heartbeat: {}", last_heartbeat);
    println!();

    if verify {
        println!("  {}:", "Contracts".bold());
        for protocol in rt.protocols.enabled() {
            for check in protocol.verify_contracts().await {
                let mark = if check.reachable { "ok".green() } else { "unreachable".red() };
                println!("    {:<28} {:>11}  {}  {}", check.name, check.app_id, mark, check.detail.dimmed());
            }
        }
        println!();
    }

    Ok(())
}

async fn cmd_balance(home_dir: &Path) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, true)?;
    let Some(wallet) = &rt.wallet else {
        anyhow::bail!(ExecutionError::NoWallet);
    };
    let balances = fetch_balances(rt.algod.as_ref(), &wallet.address, &AssetRegistry::new()).await?;
    rt.db.lock().await.save_balance_snapshot(&balances)?;

    println!();
    println!("  {}  {}", "Address".bold(), wallet.address);
    println!("  {:<8} {:.6}", "ALGO", balances.algo);
    for (asset, amount) in &balances.assets {
        println!("  {:<8} {:.6}", asset, amount);
    }
    println!("  {:<8} {:.6}", "min", balances.min_balance);
    println!();
    Ok(())
}

async fn cmd_quote(home_dir: &Path, target: QuoteTarget) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    let json = match target {
        QuoteTarget::Tinyman { from, to, amount } => {
            serde_json::to_string_pretty(&rt.protocols.tinyman.quote(&from, &to, amount).await?)?
        }
        QuoteTarget::Pact { pool, amount } => {
            serde_json::to_string_pretty(&rt.protocols.pact.quote(&pool, amount).await?)?
        }
        QuoteTarget::Folks { pool, amount } => {
            serde_json::to_string_pretty(&rt.protocols.folks.quote(&pool, amount).await?)?
        }
    };
    println!("{}", json);
    Ok(())
}

async fn cmd_trades(home_dir: &Path, limit: u32) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    let trades = rt.db.lock().await.recent_trades(limit)?;

    println!();
    if trades.is_empty() {
        println!("  {}", "No trades yet".dimmed());
    }
    for trade in &trades {
        print_trade(trade);
    }
    println!();
    Ok(())
}

async fn cmd_close_position(home_dir: &Path, id: &str) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    if rt.db.lock().await.close_position(id)? {
        println!("Closed position {}", id);
        Ok(())
    } else {
        anyhow::bail!("No open position with id {}", id)
    }
}

async fn cmd_report(home_dir: &Path) -> Result<()> {
    let rt = Runtime::bootstrap(home_dir, false, false)?;
    let report = rt.report().await?;
    let path = export::write_report(&rt.data_dir, &report)?;
    println!("Report written to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// "ALGO Lending Pool" and "ALGO-USDC Yield Farm" both lead with the asset spent.
fn leading_asset(pool: &str) -> &str {
    pool.split(|c: char| c.is_whitespace() || c == '-')
        .next()
        .unwrap_or(pool)
}

fn print_trade(trade: &TradeRecord) {
    println!(
        "  {}  {:<13} {:<14} {:<24} {:>10.4} {:<6} {}",
        trade.created_at.format("%Y-%m-%d %H:%M"),
        trade.kind,
        trade.protocol.display_name(),
        trade.pool,
        trade.amount,
        trade.asset,
        colorize_status(trade.status),
    );
    if let Some(tx_id) = &trade.tx_id {
        println!("    tx: {}", tx_id.dimmed());
    }
    if let Some(err) = &trade.error {
        println!("    error: {}", err.red());
    }
}

fn colorize_status(status: TradeStatus) -> String {
    match status {
        TradeStatus::Confirmed => "confirmed".green().to_string(),
        TradeStatus::Pending => "pending".yellow().to_string(),
        TradeStatus::DryRun => "dry_run".cyan().to_string(),
        TradeStatus::Failed => "failed".red().to_string(),
    }
}

fn colorize_level(level: SafetyLevel) -> String {
    match level {
        SafetyLevel::Normal => "normal".green().to_string(),
        SafetyLevel::Caution => "caution".yellow().to_string(),
        SafetyLevel::Halted => "HALTED".red().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "algotrader", "status", "--verify", "--home", "/tmp/trader", "--log-level", "debug", "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.home.as_deref(), Some("/tmp/trader"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.dry_run);
        assert!(matches!(cli.command, Commands::Status { verify: true }));
    }

    #[test]
    fn home_and_log_level_default_to_unset() {
        let cli = Cli::try_parse_from(["algotrader", "balance"]).unwrap();
        assert!(cli.home.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn leading_asset_of_pool_names() {
        assert_eq!(leading_asset("ALGO Lending Pool"), "ALGO");
        assert_eq!(leading_asset("USDC-USDT Yield Farm"), "USDC");
    }
}
