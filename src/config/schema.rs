//! Configuration schema for algotrader.toml.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraderConfig {
    /// Human-readable agent name used in logs and reports.
    pub name: String,

    /// Algod REST endpoint.
    pub algod_url: String,

    /// Algod API token (empty for public nodes).
    pub algod_token: String,

    /// Build and sign transactions without submitting them.
    pub dry_run: bool,

    /// Path to heartbeat YAML config.
    pub heartbeat_config_path: String,

    /// Path to SQLite database.
    pub db_path: String,

    /// Directory for JSON trade, scan, and report exports.
    pub data_dir: String,

    /// Log level (debug, info, warn, error).
    pub log_level: String,

    pub trading: TradingConfig,
    pub safety: SafetyConfig,
    pub submission: SubmissionConfig,
    pub http: HttpConfig,
    pub tinyman: TinymanConfig,
    pub pact: PactConfig,
    pub folks: FolksConfig,
}

/// Orchestrator loop and risk parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub scan_interval_secs: u64,
    pub error_backoff_secs: u64,
    /// Opportunities below this score are never executed.
    pub min_score: f64,
    pub max_active_trades: u32,
    /// Minimum ALGO the wallet must hold before any trade.
    pub min_algo_balance: f64,
    pub top_pools_per_protocol: usize,
    pub executions_per_cycle: usize,
    /// Fraction of the ALGO balance used as the base position.
    pub position_fraction: f64,
    pub max_base_position: f64,
    pub min_position: f64,
    pub max_position: f64,
    pub max_consecutive_errors: u32,
}

/// Balance floor protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Trading halts while the ALGO balance is below this floor.
    pub algo_floor: f64,
}

/// Transaction submission and confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub max_attempts: u32,
    /// Backoff after HTTP 403 is `base * 2^attempt` seconds.
    pub backoff_base_secs: u64,
    pub confirmation_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Rounds a transaction stays valid after `first_valid`.
    pub validity_window: u64,
}

/// Shared settings for protocol data endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub pool_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TinymanConfig {
    pub enabled: bool,
    pub app_id: u64,
    /// Pool analytics endpoints, tried in order.
    pub pool_api_urls: Vec<String>,
    /// Accepted shortfall below the quoted output (0.01 = 1%).
    pub slippage: f64,
    /// USD price used for the reserve-less price impact estimate.
    pub algo_price_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PactConfig {
    pub enabled: bool,
    pub factory_app_id: u64,
    pub router_app_id: u64,
    pub staking_app_id: u64,
    pub api_url: String,
    pub analytics_url: String,
    pub github_pools_url: String,
    /// Network fee charged for a farming group, in ALGO.
    pub network_fee: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolksConfig {
    pub enabled: bool,
    pub deposit_app_id: u64,
    pub pool_manager_app_id: u64,
    /// Lending pool application per asset name.
    pub lending_pools: BTreeMap<String, u64>,
    pub markets_url: String,
    pub pools_url: String,
    /// Protocol fee as a fraction of the deposit.
    pub deposit_fee: f64,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            name: "algotrader".into(),
            algod_url: "https://mainnet-api.algonode.cloud".into(),
            algod_token: String::new(),
            dry_run: false,
            heartbeat_config_path: "~/.algotrader/heartbeat.yml".into(),
            db_path: "~/.algotrader/state.db".into(),
            data_dir: "~/.algotrader/data".into(),
            log_level: "info".into(),
            trading: TradingConfig::default(),
            safety: SafetyConfig::default(),
            submission: SubmissionConfig::default(),
            http: HttpConfig::default(),
            tinyman: TinymanConfig::default(),
            pact: PactConfig::default(),
            folks: FolksConfig::default(),
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            error_backoff_secs: 60,
            min_score: 70.0,
            max_active_trades: 5,
            min_algo_balance: 0.1,
            top_pools_per_protocol: 5,
            executions_per_cycle: 3,
            position_fraction: 0.1,
            max_base_position: 1.0,
            min_position: 0.1,
            max_position: 2.0,
            max_consecutive_errors: 5,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self { algo_floor: 0.2 }
    }
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2,
            confirmation_timeout_secs: 120,
            poll_interval_secs: 2,
            validity_window: 1000,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".into(),
            pool_cache_ttl_secs: 60,
        }
    }
}

impl Default for TinymanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_id: 1002541853,
            pool_api_urls: vec![
                "https://mainnet.analytics.tinyman.org/api/v1/pools".into(),
                "https://mainnet.analytics.tinyman.org/api/v1/pools/".into(),
            ],
            slippage: 0.01,
            algo_price_usd: 0.5,
        }
    }
}

impl Default for PactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            factory_app_id: 1072843805,
            router_app_id: 1072843806,
            staking_app_id: 1072843807,
            api_url: "https://api.pact.fi".into(),
            analytics_url: "https://analytics.pact.fi".into(),
            github_pools_url:
                "https://raw.githubusercontent.com/pactfi/pact-contracts/main/config/pools.json"
                    .into(),
            network_fee: 0.0024,
        }
    }
}

impl Default for FolksConfig {
    fn default() -> Self {
        let mut lending_pools = BTreeMap::new();
        lending_pools.insert("ALGO".to_string(), 971368268);
        lending_pools.insert("USDC".to_string(), 971370097);
        lending_pools.insert("USDT".to_string(), 971372000);

        Self {
            enabled: true,
            deposit_app_id: 971353536,
            pool_manager_app_id: 971350278,
            lending_pools,
            markets_url: "https://raw.githubusercontent.com/Folks-Finance/folks-finance-js/main/src/networks/algorand/markets.json".into(),
            pools_url: "https://raw.githubusercontent.com/Folks-Finance/folks-finance-js/main/src/networks/algorand/pools.json".into(),
            deposit_fee: 0.001,
        }
    }
}

impl TraderConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    /// Resolved database path.
    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.db_path)
    }

    /// Resolved heartbeat config path.
    pub fn resolved_heartbeat_path(&self) -> String {
        self.resolve_path(&self.heartbeat_config_path)
    }

    /// Resolved export directory.
    pub fn resolved_data_dir(&self) -> String {
        self.resolve_path(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: TraderConfig = toml::from_str(
            r#"
            dry_run = true

            [trading]
            min_score = 80.0

            [folks]
            enabled = false
            "#,
        )
        .unwrap();

        assert!(cfg.dry_run);
        assert_eq!(cfg.trading.min_score, 80.0);
        assert_eq!(cfg.trading.max_active_trades, 5);
        assert!(!cfg.folks.enabled);
        assert_eq!(cfg.folks.lending_pools.get("USDC"), Some(&971370097));
        assert_eq!(cfg.tinyman.app_id, 1002541853);
        assert_eq!(cfg.algod_url, "https://mainnet-api.algonode.cloud");
    }

    #[test]
    fn default_config_survives_toml_roundtrip() {
        let cfg = TraderConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: TraderConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.pact.staking_app_id, 1072843807);
        assert_eq!(back.submission.backoff_base_secs, 2);
    }
}
