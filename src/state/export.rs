//! JSON file exports: one file per trade, per scan, and per status report.

use crate::types::{Opportunity, TradeRecord};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

fn write_json<T: Serialize + ?Sized>(dir: &Path, file_name: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
    let path = dir.join(file_name);
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn stamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// `trades/trade_<timestamp>_<id>.json`
pub fn write_trade(data_dir: &Path, trade: &TradeRecord) -> Result<PathBuf> {
    let name = format!("trade_{}_{}.json", stamp(), trade.id);
    write_json(&data_dir.join("trades"), &name, trade)
}

#[derive(Serialize)]
struct ScanFile<'a> {
    scan_id: &'a str,
    timestamp: String,
    count: usize,
    opportunities: &'a [Opportunity],
}

/// `opportunities/opportunities_<timestamp>.json`
pub fn write_scan(data_dir: &Path, scan_id: &str, opportunities: &[Opportunity]) -> Result<PathBuf> {
    let file = ScanFile {
        scan_id,
        timestamp: Utc::now().to_rfc3339(),
        count: opportunities.len(),
        opportunities,
    };
    let name = format!("opportunities_{}.json", stamp());
    write_json(&data_dir.join("opportunities"), &name, &file)
}

/// `reports/report_<timestamp>.json`
pub fn write_report<T: Serialize>(data_dir: &Path, report: &T) -> Result<PathBuf> {
    let name = format!("report_{}.json", stamp());
    write_json(&data_dir.join("reports"), &name, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Protocol, TradeKind};

    #[test]
    fn trade_file_lands_in_trades_dir() {
        let dir = tempfile::tempdir().unwrap();
        let trade = TradeRecord::new(TradeKind::Lend, Protocol::FolksFinance, "ALGO Lending", "ALGO", 0.5);
        let path = write_trade(dir.path(), &trade).unwrap();

        assert!(path.starts_with(dir.path().join("trades")));
        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["protocol"], "folks_finance");
        assert_eq!(back["status"], "pending");
        assert!(back["tx_id"].is_null());
    }

    #[test]
    fn scan_file_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scan(dir.path(), "scan-1", &[]).unwrap();
        let back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back["count"], 0);
        assert_eq!(back["scan_id"], "scan-1");
    }
}
