//! Database schema definition.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Full DDL for the trader state database.
pub const CREATE_SCHEMA: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

-- Key-value store for runtime state
CREATE TABLE IF NOT EXISTS kv (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Scored opportunities, one row per opportunity per scan
CREATE TABLE IF NOT EXISTS opportunities (
    id               TEXT PRIMARY KEY,
    scan_id          TEXT NOT NULL,
    protocol         TEXT NOT NULL,
    opportunity_type TEXT NOT NULL,
    pool_name        TEXT NOT NULL,
    score            REAL NOT NULL,
    risk_level       TEXT NOT NULL,
    estimated_apy    REAL NOT NULL DEFAULT 0.0,
    source           TEXT NOT NULL,
    data_json        TEXT NOT NULL,
    discovered_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Execution attempts (successful, pending, dry-run and failed)
CREATE TABLE IF NOT EXISTS trades (
    id                    TEXT PRIMARY KEY,
    tx_id                 TEXT,
    kind                  TEXT NOT NULL,
    protocol              TEXT NOT NULL,
    pool                  TEXT NOT NULL,
    asset                 TEXT NOT NULL,
    amount                REAL NOT NULL,
    status                TEXT NOT NULL,
    method                TEXT,
    confirmed_round       INTEGER,
    expected_apy          REAL,
    expected_daily_return REAL,
    opportunity_id        TEXT,
    error                 TEXT,
    closed_at             TEXT,
    created_at            TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Heartbeat execution log
CREATE TABLE IF NOT EXISTS heartbeat_entries (
    id          TEXT PRIMARY KEY,
    task_name   TEXT NOT NULL,
    result      TEXT,
    success     INTEGER NOT NULL DEFAULT 1,
    executed_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Wallet balance history
CREATE TABLE IF NOT EXISTS balance_snapshots (
    id          TEXT PRIMARY KEY,
    algo        REAL NOT NULL,
    min_balance REAL NOT NULL DEFAULT 0.0,
    assets_json TEXT NOT NULL DEFAULT '{}',
    taken_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Safety floor events (halts, recoveries)
CREATE TABLE IF NOT EXISTS safety_events (
    id         TEXT PRIMARY KEY,
    level      TEXT NOT NULL,
    event      TEXT NOT NULL,
    details    TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_opportunities_scan ON opportunities(scan_id);
CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status);
CREATE INDEX IF NOT EXISTS idx_trades_created ON trades(created_at);
CREATE INDEX IF NOT EXISTS idx_heartbeat_task ON heartbeat_entries(task_name);
CREATE INDEX IF NOT EXISTS idx_snapshots_taken ON balance_snapshots(taken_at);
"#;
