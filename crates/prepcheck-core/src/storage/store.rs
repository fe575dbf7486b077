use crate::model::{Divergence, RunResult, RunStatus};
use anyhow::{anyhow, Context};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// A stored result row as `prepcheck history` shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub run_id: i64,
    pub started_at: String,
    pub target: String,
    pub policy: String,
    pub status: RunStatus,
    pub failure_kind: Option<String>,
    pub failing_step: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    pub fn create_run<C: Serialize>(&self, suite: &str, config: &C) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO runs(suite, started_at, status, config_json) VALUES (?1, ?2, ?3, ?4)",
            params![suite, now_rfc3339(), "running", serde_json::to_string(config)?],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finalize_run(&self, run_id: i64, status: &str) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET status=?1, finished_at=?2 WHERE id=?3",
            params![status, now_rfc3339(), run_id],
        )?;
        Ok(())
    }

    pub fn insert_result(&self, run_id: i64, result: &RunResult) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO results(run_id, target, policy, status, state_reached, failure_kind, failing_step, duration_ms, result_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run_id,
                result.target.image_ref(),
                result.policy.label(),
                result.status.as_str(),
                result.state_reached.map(|s| s.as_str()),
                result.failure.as_ref().map(|f| f.kind.as_str()),
                result
                    .failure
                    .as_ref()
                    .and_then(|f| f.step_index)
                    .map(|i| i as i64),
                result.duration_ms.map(|d| d as i64),
                serde_json::to_string(result)?,
            ],
        )?;
        Ok(())
    }

    pub fn insert_divergence(&self, run_id: i64, divergence: &Divergence) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO divergences(run_id, target, divergence_json) VALUES (?1, ?2, ?3)",
            params![
                run_id,
                divergence.target.image_ref(),
                serde_json::to_string(divergence)?
            ],
        )?;
        Ok(())
    }

    /// Most recent results first.
    pub fn fetch_recent_results(&self, suite: &str, limit: u32) -> anyhow::Result<Vec<HistoryRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT
                runs.id, runs.started_at, r.target, r.policy, r.status,
                r.failure_kind, r.failing_step, r.duration_ms
             FROM results r
             JOIN runs ON r.run_id = runs.id
             WHERE runs.suite = ?1
             ORDER BY r.id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![suite, limit], |row| {
            Ok(HistoryRow {
                run_id: row.get(0)?,
                started_at: row.get(1)?,
                target: row.get(2)?,
                policy: row.get(3)?,
                status: RunStatus::parse(&row.get::<_, String>(4)?),
                failure_kind: row.get(5)?,
                failing_step: row.get(6)?,
                duration_ms: row.get(7)?,
            })
        })?;

        let mut results = Vec::new();
        for r in rows {
            results.push(r?);
        }
        Ok(results)
    }

    pub fn count_divergences(&self, run_id: i64) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM divergences WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
