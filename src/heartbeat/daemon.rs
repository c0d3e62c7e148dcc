//! Heartbeat scheduler.
//!
//! Schedules come from heartbeat.yml (or the built-in set) and are parsed
//! once at startup. Every minute the daemon runs whichever tasks came due
//! and records each result in the heartbeat log.

use crate::heartbeat::tasks::{self, HeartbeatContext};
use crate::types::HeartbeatEntry;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::path::Path;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TICK: std::time::Duration = std::time::Duration::from_secs(60);

/// How far back a task that never ran looks for a missed slot.
const FIRST_RUN_LOOKBACK_MINUTES: i64 = 60;

struct Scheduled {
    entry: HeartbeatEntry,
    schedule: Schedule,
    last_run: Option<DateTime<Utc>>,
}

impl Scheduled {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        let since = self
            .last_run
            .unwrap_or(now - Duration::minutes(FIRST_RUN_LOOKBACK_MINUTES));
        self.schedule.after(&since).next().is_some_and(|next| next <= now)
    }
}

pub struct HeartbeatDaemon {
    ctx: HeartbeatContext,
    tasks: Vec<Scheduled>,
}

impl HeartbeatDaemon {
    pub fn new(ctx: HeartbeatContext) -> Result<Self> {
        let path = ctx.config.resolved_heartbeat_path();
        let tasks = schedule_entries(load_heartbeat_config(Path::new(&path))?);
        info!("Heartbeat scheduling {} task(s)", tasks.len());
        Ok(Self { ctx, tasks })
    }

    /// Names of the enabled tasks with a valid schedule.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.entry.name.as_str()).collect()
    }

    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        info!("Heartbeat daemon started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Heartbeat daemon shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(TICK) => {
                    if let Err(e) = self.tick().await {
                        error!("Heartbeat tick failed: {:#}", e);
                    }
                }
            }
        }
    }

    pub async fn tick(&mut self) -> Result<usize> {
        self.run_due(Utc::now()).await
    }

    /// Run every task due at `now`; returns how many ran. A failing task is
    /// logged and recorded, only a failed log write aborts the tick.
    async fn run_due(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let mut ran = 0;
        for task in self.tasks.iter_mut().filter(|t| t.is_due(now)) {
            debug!("Heartbeat task {} due", task.entry.name);
            let (result, success) =
                match tasks::execute_task(&task.entry.task, &task.entry.params, &self.ctx).await {
                    Ok(msg) => (msg, true),
                    Err(e) => {
                        warn!("Heartbeat task {} failed: {:#}", task.entry.name, e);
                        (format!("Error: {:#}", e), false)
                    }
                };

            self.ctx
                .db
                .lock()
                .await
                .log_heartbeat(&task.entry.name, &result, success)
                .context("Failed to record heartbeat result")?;
            task.last_run = Some(now);
            ran += 1;
        }
        Ok(ran)
    }
}

/// Keep enabled entries whose cron expression parses.
fn schedule_entries(entries: Vec<HeartbeatEntry>) -> Vec<Scheduled> {
    entries
        .into_iter()
        .filter(|e| e.enabled)
        .filter_map(|entry| match Schedule::from_str(&entry.schedule) {
            Ok(schedule) => Some(Scheduled {
                entry,
                schedule,
                last_run: None,
            }),
            Err(e) => {
                warn!("Skipping {}: bad schedule '{}': {}", entry.name, entry.schedule, e);
                None
            }
        })
        .collect()
}

fn load_heartbeat_config(path: &Path) -> Result<Vec<HeartbeatEntry>> {
    if !path.exists() {
        debug!("{} not found, using built-in schedule", path.display());
        return Ok(default_heartbeat_entries());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn entry(name: &str, schedule: &str) -> HeartbeatEntry {
    HeartbeatEntry {
        name: name.into(),
        schedule: schedule.into(),
        task: name.into(),
        enabled: true,
        params: serde_json::Value::Null,
    }
}

/// Built-in schedule (cron with seconds).
pub fn default_heartbeat_entries() -> Vec<HeartbeatEntry> {
    vec![
        entry("heartbeat_ping", "0 */5 * * * *"),
        entry("check_safety", "0 */5 * * * *"),
        entry("reconcile_pending", "0 */2 * * * *"),
        entry("snapshot_balances", "0 */15 * * * *"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorand::testing::FakeAlgod;
    use crate::config::TraderConfig;
    use std::sync::Arc;

    fn daemon(dir: &Path) -> HeartbeatDaemon {
        let mut config = TraderConfig::default();
        config.heartbeat_config_path = dir.join("missing.yml").to_string_lossy().into_owned();
        HeartbeatDaemon::new(tasks::tests::context(Arc::new(FakeAlgod::default()), config)).unwrap()
    }

    #[test]
    fn default_schedules_parse() {
        assert_eq!(schedule_entries(default_heartbeat_entries()).len(), 4);
    }

    #[test]
    fn disabled_and_invalid_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.yml");
        std::fs::write(
            &path,
            "- name: ping\n  schedule: \"0 * * * * *\"\n  task: heartbeat_ping\n\
             - name: off\n  schedule: \"0 * * * * *\"\n  task: check_safety\n  enabled: false\n\
             - name: bad\n  schedule: \"*/5 * * * *\"\n  task: check_safety\n",
        )
        .unwrap();

        let entries = load_heartbeat_config(&path).unwrap();
        assert_eq!(entries.len(), 3);
        let scheduled = schedule_entries(entries);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].entry.name, "ping");
    }

    #[tokio::test]
    async fn first_tick_runs_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon(dir.path());
        let db = daemon.ctx.db.clone();

        assert_eq!(daemon.task_names().len(), 4);
        assert_eq!(daemon.tick().await.unwrap(), 4);
        assert_eq!(db.lock().await.heartbeat_count().unwrap(), 4);
        assert!(db.lock().await.kv_get("last_heartbeat").unwrap().is_some());
    }

    #[tokio::test]
    async fn tasks_wait_for_their_next_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = daemon(dir.path());
        let start = DateTime::parse_from_rfc3339("2026-01-01T10:00:30Z").unwrap().with_timezone(&Utc);

        assert_eq!(daemon.run_due(start).await.unwrap(), 4);
        // 10:01:30: nothing has a slot between 10:00:30 and now.
        assert_eq!(daemon.run_due(start + Duration::minutes(1)).await.unwrap(), 0);
        // 10:02:30: only the two-minute reconcile.
        assert_eq!(daemon.run_due(start + Duration::minutes(2)).await.unwrap(), 1);
        // 10:05:30: ping, safety and reconcile.
        assert_eq!(daemon.run_due(start + Duration::minutes(5)).await.unwrap(), 3);
    }
}
