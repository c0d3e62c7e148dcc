pub mod schema;

pub use schema::TraderConfig;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable holding the 25-word wallet mnemonic.
pub const ENV_WALLET_MNEMONIC: &str = "ALGORAND_WALLET_MNEMONIC";

/// Environment variable holding the expected wallet address.
pub const ENV_WALLET_ADDRESS: &str = "ALGORAND_WALLET_ADDRESS";

/// Default trader home directory (~/.algotrader).
pub fn default_home_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().join(".algotrader"))
        .unwrap_or_else(|| PathBuf::from(".algotrader"))
}

/// Path of the TOML config inside a home directory.
pub fn config_path(home_dir: &Path) -> PathBuf {
    home_dir.join("algotrader.toml")
}

/// Load config from the given path, or return defaults.
pub fn load_config(path: &Path) -> Result<TraderConfig> {
    if path.exists() {
        let contents =
            std::fs::read_to_string(path).context("Failed to read algotrader config file")?;
        let config: TraderConfig =
            toml::from_str(&contents).context("Failed to parse algotrader config (TOML)")?;
        Ok(config)
    } else {
        Ok(TraderConfig::default())
    }
}

/// Log level from the home directory's config, `info` when it is missing or unreadable.
pub fn configured_log_level(home_dir: &Path) -> String {
    load_config(&config_path(home_dir))
        .map(|config| config.log_level)
        .unwrap_or_else(|_| TraderConfig::default().log_level)
}

/// Save config to the given path (TOML format).
pub fn save_config(config: &TraderConfig, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents).context("Failed to write config file")?;
    Ok(())
}

/// Load wallet credentials from `.env` files into the process environment.
///
/// The working directory's `.env` wins over `<home>/.env`; variables already
/// set in the environment are never overwritten.
pub fn load_env(home_dir: &Path) {
    if let Ok(path) = dotenv::dotenv() {
        debug!("Loaded environment from {}", path.display());
    }
    let home_env = home_dir.join(".env");
    if home_env.exists() && dotenv::from_path(&home_env).is_ok() {
        debug!("Loaded environment from {}", home_env.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(dir.path());

        let mut cfg = TraderConfig::default();
        cfg.dry_run = true;
        cfg.trading.scan_interval_secs = 42;
        save_config(&cfg, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert!(loaded.dry_run);
        assert_eq!(loaded.trading.scan_interval_secs, 42);
    }

    #[test]
    fn missing_config_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.trading.scan_interval_secs, 300);
    }

    #[test]
    fn log_level_falls_back_to_config() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(configured_log_level(dir.path()), "info");

        let cfg = TraderConfig {
            log_level: "debug".into(),
            ..TraderConfig::default()
        };
        save_config(&cfg, &config_path(dir.path())).unwrap();
        assert_eq!(configured_log_level(dir.path()), "debug");

        std::fs::write(config_path(dir.path()), "not = [valid").unwrap();
        assert_eq!(configured_log_level(dir.path()), "info");
    }

    #[test]
    fn default_home_is_dot_algotrader() {
        assert!(default_home_dir().ends_with(".algotrader"));
    }
}
