//! SQLite database wrapper with WAL mode and schema versioning.

use crate::state::schema;
use crate::types::*;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::info;

/// The trader state database.
pub struct Database {
    conn: Connection,
}

const TRADE_COLUMNS: &str = "id, tx_id, kind, protocol, pool, asset, amount, status, method,
     confirmed_round, expected_apy, expected_daily_return, opportunity_id, error,
     closed_at, created_at";

/// Confirmed deposits not yet closed.
fn open_position_filter() -> String {
    let kinds = TradeKind::ALL
        .iter()
        .filter(|kind| kind.opens_position())
        .map(|kind| format!("'{}'", kind))
        .collect::<Vec<_>>()
        .join(", ");
    format!("status = 'confirmed' AND kind IN ({}) AND closed_at IS NULL", kinds)
}

impl Database {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Create the schema on first open; refuse databases from a newer build.
    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();

        if version == 0 {
            info!("Creating database schema v{}", schema::SCHEMA_VERSION);
            self.conn
                .execute_batch(schema::CREATE_SCHEMA)
                .context("Failed to create schema")?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version > schema::SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema v{} is newer than supported v{}",
                version,
                schema::SCHEMA_VERSION
            );
        }

        Ok(())
    }

    /// Get the current schema version (0 if uninitialized).
    pub fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Key-value store
    // -----------------------------------------------------------------------

    /// Get a value from the KV store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get(0)).ok();
        Ok(result)
    }

    /// Set a value in the KV store (upsert).
    pub fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2",
            params![key, value],
        )?;
        Ok(())
    }

    /// Delete a key from the KV store.
    pub fn kv_delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Opportunities
    // -----------------------------------------------------------------------

    /// Persist one scan's opportunities under a shared scan id.
    pub fn save_scan(&self, scan_id: &str, opportunities: &[Opportunity]) -> Result<()> {
        for opp in opportunities {
            let data_json = serde_json::to_string(opp)?;
            self.conn.execute(
                "INSERT INTO opportunities
                    (id, scan_id, protocol, opportunity_type, pool_name, score, risk_level,
                     estimated_apy, source, data_json, discovered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    opp.id,
                    scan_id,
                    opp.protocol.to_string(),
                    opp.opportunity_type.to_string(),
                    opp.pool.name(),
                    opp.score,
                    opp.risk_level.to_string(),
                    opp.estimated_apy,
                    opp.pool.source().to_string(),
                    data_json,
                    opp.discovered_at.to_rfc3339(),
                ],
            )?;
        }
        self.kv_set("last_scan_id", scan_id)?;
        Ok(())
    }

    /// Opportunities from the most recent scan, best first.
    pub fn latest_opportunities(&self) -> Result<Vec<Opportunity>> {
        let scan_id = match self.kv_get("last_scan_id")? {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM opportunities WHERE scan_id = ?1 ORDER BY score DESC",
        )?;
        let rows = stmt.query_map(params![scan_id], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?).context("Corrupt opportunity row")?);
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Trades
    // -----------------------------------------------------------------------

    /// Insert or replace a trade record.
    pub fn save_trade(&self, trade: &TradeRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO trades
                (id, tx_id, kind, protocol, pool, asset, amount, status, method,
                 confirmed_round, expected_apy, expected_daily_return, opportunity_id,
                 error, closed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                trade.id,
                trade.tx_id,
                trade.kind.to_string(),
                trade.protocol.to_string(),
                trade.pool,
                trade.asset,
                trade.amount,
                trade.status.to_string(),
                trade.method,
                trade.confirmed_round.map(|r| r as i64),
                trade.expected_apy,
                trade.expected_daily_return,
                trade.opportunity_id,
                trade.error,
                trade.closed_at.map(|t| t.to_rfc3339()),
                trade.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Move a trade to a new status, recording round or error when known.
    pub fn update_trade_status(
        &self,
        id: &str,
        status: TradeStatus,
        confirmed_round: Option<u64>,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE trades SET status = ?2,
                confirmed_round = COALESCE(?3, confirmed_round),
                error = COALESCE(?4, error)
             WHERE id = ?1",
            params![id, status.to_string(), confirmed_round.map(|r| r as i64), error],
        )?;
        Ok(())
    }

    /// Mark an open position as closed. Returns false if nothing was open.
    pub fn close_position(&self, id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE trades SET closed_at = ?2 WHERE id = ?1 AND closed_at IS NULL",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn get_trade(&self, id: &str) -> Result<Option<TradeRecord>> {
        let sql = format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], row_to_trade)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades ORDER BY created_at DESC LIMIT ?1",
            TRADE_COLUMNS
        );
        self.query_trades(&sql, params![limit])
    }

    /// Submitted trades still waiting for confirmation.
    pub fn pending_trades(&self) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE status = 'pending' AND tx_id IS NOT NULL ORDER BY created_at",
            TRADE_COLUMNS
        );
        self.query_trades(&sql, [])
    }

    /// Confirmed deposits that have not been closed.
    pub fn open_positions(&self) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE {} ORDER BY created_at",
            TRADE_COLUMNS,
            open_position_filter()
        );
        self.query_trades(&sql, [])
    }

    pub fn active_trade_count(&self) -> Result<u32> {
        // Pending trades also tie up capital.
        let sql = format!(
            "SELECT COUNT(*) FROM trades WHERE status = 'pending' OR ({})",
            open_position_filter()
        );
        let count: u32 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn trade_stats(&self) -> Result<TradeStats> {
        let (total, confirmed, failed, volume): (u64, u64, u64, f64) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status = 'confirmed'), 0),
                    COALESCE(SUM(status = 'failed'), 0),
                    COALESCE(SUM(CASE WHEN status = 'confirmed' THEN amount ELSE 0 END), 0.0)
             FROM trades",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let expected_daily_yield: f64 = self.conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(expected_daily_return), 0.0) FROM trades WHERE {}",
                open_position_filter()
            ),
            [],
            |row| row.get(0),
        )?;

        Ok(TradeStats {
            total_trades: total,
            confirmed_trades: confirmed,
            failed_trades: failed,
            active_trades: self.active_trade_count()? as u64,
            total_volume: volume,
            expected_daily_yield,
        })
    }

    fn query_trades<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_trade)?;

        let mut trades = Vec::new();
        for row in rows {
            trades.push(row?);
        }
        Ok(trades)
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Log a heartbeat task execution.
    pub fn log_heartbeat(&self, task_name: &str, result: &str, success: bool) -> Result<()> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO heartbeat_entries (id, task_name, result, success)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, task_name, result, success as i32],
        )?;
        Ok(())
    }

    pub fn heartbeat_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM heartbeat_entries", [], |row| row.get(0))?;
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Balances and safety
    // -----------------------------------------------------------------------

    pub fn save_balance_snapshot(&self, balances: &Balances) -> Result<()> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO balance_snapshots (id, algo, min_balance, assets_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                balances.algo,
                balances.min_balance,
                serde_json::to_string(&balances.assets)?,
            ],
        )?;
        Ok(())
    }

    pub fn latest_balance_snapshot(&self) -> Result<Option<Balances>> {
        let mut stmt = self.conn.prepare(
            "SELECT algo, min_balance, assets_json FROM balance_snapshots
             ORDER BY taken_at DESC, id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        match rows.next() {
            Some(row) => {
                let (algo, min_balance, assets_json) = row?;
                Ok(Some(Balances {
                    algo,
                    min_balance,
                    assets: serde_json::from_str(&assets_json).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    pub fn log_safety_event(&self, level: SafetyLevel, event: &str, details: &str) -> Result<()> {
        let id = ulid::Ulid::new().to_string();
        self.conn.execute(
            "INSERT INTO safety_events (id, level, event, details) VALUES (?1, ?2, ?3, ?4)",
            params![id, level.to_string(), event, details],
        )?;
        Ok(())
    }

    pub fn safety_event_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM safety_events", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_col<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_to_trade(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    Ok(TradeRecord {
        id: row.get(0)?,
        tx_id: row.get(1)?,
        kind: parse_col(2, row.get(2)?)?,
        protocol: parse_col(3, row.get(3)?)?,
        pool: row.get(4)?,
        asset: row.get(5)?,
        amount: row.get(6)?,
        status: parse_col(7, row.get(7)?)?,
        method: row.get(8)?,
        confirmed_round: row.get::<_, Option<i64>>(9)?.map(|r| r as u64),
        expected_apy: row.get(10)?,
        expected_daily_return: row.get(11)?,
        opportunity_id: row.get(12)?,
        error: row.get(13)?,
        closed_at: row.get::<_, Option<String>>(14)?.map(|s| parse_ts(&s)),
        created_at: parse_ts(&row.get::<_, String>(15)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(kind: TradeKind, status: TradeStatus, amount: f64) -> TradeRecord {
        let mut t = TradeRecord::new(kind, Protocol::PactFinance, "ALGO-USDC-FARM", "ALGO", amount);
        t.status = status;
        t.expected_daily_return = Some(0.01);
        t
    }

    #[test]
    fn reopening_keeps_schema_and_rejects_newer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        Database::open(&path).unwrap().kv_set("k", "v").unwrap();

        let db = Database::open(&path).unwrap();
        assert_eq!(db.schema_version(), 1);
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));

        db.conn.execute("UPDATE schema_version SET version = 9", []).unwrap();
        drop(db);
        assert!(Database::open(&path).is_err());
    }

    #[test]
    fn kv_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.schema_version(), schema::SCHEMA_VERSION);
        db.kv_set("trading_halted", "floor").unwrap();
        assert_eq!(db.kv_get("trading_halted").unwrap().as_deref(), Some("floor"));
        db.kv_delete("trading_halted").unwrap();
        assert!(db.kv_get("trading_halted").unwrap().is_none());
    }

    #[test]
    fn only_deposit_kinds_hold_positions() {
        let db = Database::open_memory().unwrap();
        for kind in TradeKind::ALL {
            db.save_trade(&trade(kind, TradeStatus::Confirmed, 1.0)).unwrap();
        }

        let open = db.open_positions().unwrap();
        assert_eq!(open.len(), 3);
        assert!(open.iter().all(|t| t.kind != TradeKind::Swap));
        assert_eq!(db.active_trade_count().unwrap(), 3);
        assert!((db.trade_stats().unwrap().expected_daily_yield - 0.03).abs() < 1e-9);
    }

    #[test]
    fn trade_lifecycle_and_active_count() {
        let db = Database::open_memory().unwrap();

        let mut pending = trade(TradeKind::YieldFarm, TradeStatus::Pending, 0.5);
        pending.tx_id = Some("TXA".into());
        db.save_trade(&pending).unwrap();
        db.save_trade(&trade(TradeKind::Swap, TradeStatus::Confirmed, 1.0)).unwrap();
        db.save_trade(&trade(TradeKind::Lend, TradeStatus::Failed, 0.3)).unwrap();
        db.save_trade(&trade(TradeKind::Lend, TradeStatus::DryRun, 0.3)).unwrap();

        // Pending farm counts; confirmed swap, failure and dry run do not.
        assert_eq!(db.active_trade_count().unwrap(), 1);
        assert_eq!(db.pending_trades().unwrap().len(), 1);

        db.update_trade_status(&pending.id, TradeStatus::Confirmed, Some(77), None)
            .unwrap();
        let loaded = db.get_trade(&pending.id).unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Confirmed);
        assert_eq!(loaded.confirmed_round, Some(77));
        assert_eq!(loaded.protocol, Protocol::PactFinance);
        assert_eq!(db.open_positions().unwrap().len(), 1);
        assert_eq!(db.active_trade_count().unwrap(), 1);

        assert!(db.close_position(&pending.id).unwrap());
        assert!(!db.close_position(&pending.id).unwrap());
        assert_eq!(db.active_trade_count().unwrap(), 0);
    }

    #[test]
    fn stats_sum_confirmed_volume() {
        let db = Database::open_memory().unwrap();
        db.save_trade(&trade(TradeKind::YieldFarm, TradeStatus::Confirmed, 0.5)).unwrap();
        db.save_trade(&trade(TradeKind::Swap, TradeStatus::Confirmed, 1.0)).unwrap();
        db.save_trade(&trade(TradeKind::Lend, TradeStatus::Failed, 9.0)).unwrap();

        let stats = db.trade_stats().unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.confirmed_trades, 2);
        assert_eq!(stats.failed_trades, 1);
        assert!((stats.total_volume - 1.5).abs() < 1e-9);
        assert!((stats.expected_daily_yield - 0.01).abs() < 1e-9);
    }

    #[test]
    fn balance_snapshots_and_safety_events() {
        let db = Database::open_memory().unwrap();
        assert!(db.latest_balance_snapshot().unwrap().is_none());

        let mut balances = Balances {
            algo: 3.5,
            min_balance: 0.2,
            ..Default::default()
        };
        balances.assets.insert("USDC".into(), 12.0);
        db.save_balance_snapshot(&balances).unwrap();

        let latest = db.latest_balance_snapshot().unwrap().unwrap();
        assert_eq!(latest.algo, 3.5);
        assert_eq!(latest.get("USDC"), 12.0);

        db.log_safety_event(SafetyLevel::Halted, "trading_halted", "below floor")
            .unwrap();
        assert_eq!(db.safety_event_count().unwrap(), 1);
    }
}
