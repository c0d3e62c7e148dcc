//! Concurrent opportunity scan across every enabled protocol.

use crate::protocols::DefiProtocol;
use crate::state::{export, Database};
use crate::types::Opportunity;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One persisted scan.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub scan_id: String,
    pub opportunities: Vec<Opportunity>,
}

/// Query every protocol concurrently and merge the results, best first.
/// A protocol that fails is logged and left out.
pub async fn scan(protocols: &[Arc<dyn DefiProtocol>], top_n: usize) -> Vec<Opportunity> {
    let mut tasks = JoinSet::new();
    for protocol in protocols {
        let protocol = protocol.clone();
        tasks.spawn(async move {
            let name = protocol.protocol();
            (name, protocol.opportunities(top_n).await)
        });
    }

    let mut all = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((protocol, Ok(found))) => {
                info!("{}: {} opportunities", protocol.display_name(), found.len());
                all.extend(found);
            }
            Ok((protocol, Err(e))) => warn!("{} scan failed: {:#}", protocol.display_name(), e),
            Err(e) => warn!("Scan task failed: {}", e),
        }
    }

    all.sort_by(|a, b| b.score.total_cmp(&a.score));
    all
}

/// Scan, then store the result in SQLite and as a JSON export.
pub async fn scan_and_record(
    protocols: &[Arc<dyn DefiProtocol>],
    top_n: usize,
    db: &Arc<Mutex<Database>>,
    data_dir: &Path,
) -> Result<ScanResult> {
    let opportunities = scan(protocols, top_n).await;
    let scan_id = ulid::Ulid::new().to_string();

    db.lock().await.save_scan(&scan_id, &opportunities)?;
    if let Err(e) = export::write_scan(data_dir, &scan_id, &opportunities) {
        warn!("Failed to export scan {}: {}", scan_id, e);
    }
    info!("Scan {} found {} opportunities", scan_id, opportunities.len());

    Ok(ScanResult {
        scan_id,
        opportunities,
    })
}
