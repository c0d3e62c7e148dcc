//! First-run interactive setup wizard.
//!
//! Steps:
//! 1. Display banner
//! 2. Generate or restore the wallet
//! 3. Collect trader name and algod node
//! 4. Choose dry-run or live trading
//! 5. Write algotrader.toml, heartbeat.yml and .env

use crate::config::{self, TraderConfig, ENV_WALLET_ADDRESS, ENV_WALLET_MNEMONIC};
use crate::identity::Wallet;
use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// ASCII banner displayed during setup.
const BANNER: &str = r#"
     _    _             _____              _
    / \  | | __ _  ___ |_   _| __ __ _  __| | ___ _ __
   / _ \ | |/ _` |/ _ \  | || '__/ _` |/ _` |/ _ \ '__|
  / ___ \| | (_| | (_) | | || | | (_| | (_| |  __/ |
 /_/   \_\_|\__, |\___/  |_||_|  \__,_|\__,_|\___|_|
            |___/
          Algorand DeFi Trade Execution
"#;

/// What setup produced.
pub struct SetupOutcome {
    pub config: TraderConfig,
    pub address: String,
    /// Set when a new wallet was generated; shown once to the user.
    pub new_mnemonic: Option<String>,
}

/// Run the interactive setup wizard on stdin.
pub fn run_setup_wizard(home_dir: &Path) -> Result<SetupOutcome> {
    println!("{}", BANNER);
    println!("Welcome to algotrader setup.\n");

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    run_with_input(home_dir, &mut reader)
}

/// The wizard body, reading answers from `reader`.
pub fn run_with_input(home_dir: &Path, reader: &mut impl BufRead) -> Result<SetupOutcome> {
    // Step 1: Wallet
    println!("[1/4] Wallet");
    let phrase = prompt(reader, "  Existing 25-word mnemonic (or press Enter to generate)")?;
    let (wallet, new_mnemonic) = if phrase.is_empty() {
        let wallet = Wallet::generate();
        let mnemonic = wallet.mnemonic();
        (wallet, Some(mnemonic))
    } else {
        (Wallet::from_mnemonic(&phrase)?, None)
    };
    println!("  Address: {}", wallet.address);

    // Step 2: Identity and node
    println!("\n[2/4] Node");
    let defaults = TraderConfig::default();
    let name = prompt_with_default(reader, "  Trader name", &defaults.name)?;
    let algod_url = prompt_with_default(reader, "  Algod URL", &defaults.algod_url)?;

    // Step 3: Mode
    println!("\n[3/4] Mode");
    let dry_run = prompt_with_default(reader, "  Dry run (sign but never submit)? [y/n]", "y")?;
    let dry_run = !dry_run.eq_ignore_ascii_case("n");

    // Step 4: Write files
    println!("\n[4/4] Writing configuration...");
    std::fs::create_dir_all(home_dir)
        .with_context(|| format!("Failed to create {}", home_dir.display()))?;

    let config = TraderConfig {
        name,
        algod_url,
        dry_run,
        heartbeat_config_path: home_path(home_dir, "heartbeat.yml"),
        db_path: home_path(home_dir, "state.db"),
        data_dir: home_path(home_dir, "data"),
        ..defaults
    };
    config::save_config(&config, &config::config_path(home_dir))?;
    println!("  Written: algotrader.toml");

    let heartbeat_path = home_dir.join("heartbeat.yml");
    if !heartbeat_path.exists() {
        std::fs::write(&heartbeat_path, DEFAULT_HEARTBEAT)?;
        println!("  Written: heartbeat.yml");
    }

    let env_path = home_dir.join(".env");
    let wallet_lines = format!(
        "{}={}\n{}=\"{}\"\n",
        ENV_WALLET_ADDRESS,
        wallet.address,
        ENV_WALLET_MNEMONIC,
        wallet.mnemonic()
    );
    let existing = env_address(&env_path)?;
    if existing.as_deref() == Some(wallet.address.to_string().as_str()) {
        println!("  Kept existing .env");
    } else {
        let kept = if env_path.exists() {
            std::fs::read_to_string(&env_path)
                .with_context(|| format!("Failed to read {}", env_path.display()))?
                .lines()
                .filter(|line| !is_wallet_line(line))
                .map(|line| format!("{}\n", line))
                .collect::<String>()
        } else {
            String::new()
        };
        write_private(&env_path, &format!("{}{}", kept, wallet_lines))?;
        match existing {
            Some(previous) => println!("  Replaced wallet {} in .env", previous),
            None => println!("  Written: .env"),
        }
    }

    println!("\nSetup complete! Fund {} and run `algotrader run`.\n", wallet.address);

    Ok(SetupOutcome {
        config,
        address: wallet.address.to_string(),
        new_mnemonic,
    })
}

/// Wallet address recorded in an existing `.env`, if any.
fn env_address(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let iter = dotenv::from_path_iter(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    for item in iter {
        let (key, value) = item.with_context(|| format!("Malformed line in {}", path.display()))?;
        if key == ENV_WALLET_ADDRESS {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn is_wallet_line(line: &str) -> bool {
    let key = line.trim_start().trim_start_matches("export ");
    [ENV_WALLET_ADDRESS, ENV_WALLET_MNEMONIC]
        .iter()
        .any(|name| key.starts_with(&format!("{}=", name)))
}

fn home_path(home_dir: &Path, name: &str) -> String {
    home_dir.join(name).to_string_lossy().into_owned()
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Prompt the user for input with a label.
fn prompt(reader: &mut impl BufRead, label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut input = String::new();
    reader.read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Prompt with a default value.
fn prompt_with_default(reader: &mut impl BufRead, label: &str, default: &str) -> Result<String> {
    print!("{} [{}]: ", label, default);
    io::stdout().flush()?;
    let mut input = String::new();
    reader.read_line(&mut input)?;
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Ok(default.to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

const DEFAULT_HEARTBEAT: &str = r#"# algotrader heartbeat configuration
# Each entry runs on a cron schedule (sec min hour day month weekday)

- name: heartbeat_ping
  schedule: "0 */5 * * * *"
  task: heartbeat_ping
  enabled: true

- name: check_safety
  schedule: "0 */5 * * * *"
  task: check_safety
  enabled: true

- name: reconcile_pending
  schedule: "0 */2 * * * *"
  task: reconcile_pending
  enabled: true

- name: snapshot_balances
  schedule: "0 */15 * * * *"
  task: snapshot_balances
  enabled: true
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartbeatEntry;
    use std::io::Cursor;

    #[test]
    fn generates_wallet_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new("\nmy-trader\n\nn\n");

        let outcome = run_with_input(dir.path(), &mut input).unwrap();
        assert_eq!(outcome.config.name, "my-trader");
        assert!(!outcome.config.dry_run);
        let mnemonic = outcome.new_mnemonic.unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 25);

        let loaded = config::load_config(&config::config_path(dir.path())).unwrap();
        assert_eq!(loaded.name, "my-trader");
        let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(env.contains(&outcome.address));
        assert!(env.contains(&mnemonic));
    }

    #[test]
    fn restores_existing_mnemonic() {
        let wallet = Wallet::generate();
        let dir = tempfile::tempdir().unwrap();
        let mut input = Cursor::new(format!("{}\n\n\n\n", wallet.mnemonic()));

        let outcome = run_with_input(dir.path(), &mut input).unwrap();
        assert_eq!(outcome.address, wallet.address.to_string());
        assert!(outcome.new_mnemonic.is_none());
        assert!(outcome.config.dry_run);
    }

    #[test]
    fn rerun_replaces_wallet_in_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "ALGOD_TOKEN=abc\n").unwrap();

        let first = run_with_input(dir.path(), &mut Cursor::new("\n\n\n\n")).unwrap();
        let second = run_with_input(dir.path(), &mut Cursor::new("\n\n\n\n")).unwrap();
        assert_ne!(first.address, second.address);

        let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert!(env.contains(&second.address));
        assert!(!env.contains(&first.address));
        assert!(env.contains(&second.new_mnemonic.unwrap()));
        assert!(env.contains("ALGOD_TOKEN=abc"));
        assert_eq!(env_address(&dir.path().join(".env")).unwrap(), Some(second.address));
    }

    #[test]
    fn rerun_with_same_wallet_keeps_env() {
        let wallet = Wallet::generate();
        let dir = tempfile::tempdir().unwrap();
        let answers = format!("{}\n\n\n\n", wallet.mnemonic());
        run_with_input(dir.path(), &mut Cursor::new(answers.clone())).unwrap();
        let before = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        run_with_input(dir.path(), &mut Cursor::new(answers)).unwrap();
        let after = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn default_heartbeat_file_parses() {
        let entries: Vec<HeartbeatEntry> = serde_yaml::from_str(DEFAULT_HEARTBEAT).unwrap();
        assert_eq!(entries.len(), 4);
    }
}
