use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};

use crate::{registry::Run, utils, SandpoolResult};

use super::{init_db, HISTORY_DB_MIGRATOR};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Durable, best-effort persistence of terminal run records and rate-window
/// counters.
///
/// Failures here never affect the in-memory registry's view of the world:
/// callers log and move on. The store is the source for the history and
/// stats endpoints, not for any runtime decision.
#[derive(Clone)]
pub struct HistoryStore {
    pool: Pool<Sqlite>,
}

/// A terminal run as recorded in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRun {
    /// The run ID.
    pub run_id: String,

    /// The provisioning path (`cold`/`warm`).
    pub kind: String,

    /// The sandbox image/flavor.
    pub resource_class: String,

    /// The terminal state (`failed`/`deleted`).
    pub state: String,

    /// Time to obtain the compute unit.
    pub bootstrap_ms: Option<i64>,

    /// Time to materialize application state.
    pub restore_ms: Option<i64>,

    /// End-to-end provisioning time.
    pub total_ms: Option<i64>,

    /// Whether the compute unit came from the warm pool.
    pub pool_hit: Option<bool>,

    /// Failure detail, for failed runs.
    pub error: Option<String>,

    /// Why the run was deleted, for deleted runs.
    pub deleted_reason: Option<String>,

    /// When the run was admitted.
    pub created_at: String,

    /// When the terminal record was written.
    pub recorded_at: String,
}

/// Aggregate statistics over recorded runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Total terminal runs recorded.
    pub total_runs: i64,

    /// Terminal runs per kind.
    pub by_kind: HashMap<String, i64>,

    /// Average end-to-end provisioning time per kind, in milliseconds.
    pub avg_total_ms: HashMap<String, f64>,

    /// Fraction of warm runs served from the pool, when any were recorded.
    pub pool_hit_rate: Option<f64>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HistoryStore {
    /// Opens (creating and migrating if necessary) the history database at
    /// `db_path`.
    pub async fn open(db_path: impl AsRef<Path>) -> SandpoolResult<Self> {
        let pool = init_db(db_path, &HISTORY_DB_MIGRATOR).await?;
        Ok(Self { pool })
    }

    /// Opens the history database at its default location under the sandpool
    /// home directory.
    pub async fn open_default() -> SandpoolResult<Self> {
        Self::open(utils::history_db_path()).await
    }

    /// Records a terminal run. An existing record for the same run is
    /// replaced, which makes recording idempotent across e.g. a failed run
    /// that is later swept.
    pub async fn record_terminal(&self, run: &Run) -> SandpoolResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs (
                run_id, kind, resource_class, state,
                provider_handle, ingress_endpoint,
                bootstrap_ms, restore_ms, total_ms, pool_hit,
                error, deleted_reason, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(run.kind.to_string())
        .bind(&run.resource_class)
        .bind(run.state.to_string())
        .bind(run.provider_handle.as_ref().map(|h| h.to_string()))
        .bind(run.ingress_endpoint.as_deref())
        .bind(run.bootstrap_ms.map(|v| v as i64))
        .bind(run.restore_ms.map(|v| v as i64))
        .bind(run.total_ms.map(|v| v as i64))
        .bind(run.pool_hit)
        .bind(run.error.as_deref())
        .bind(run.deleted_reason.map(|r| r.to_string()))
        .bind(run.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Increments the admitted-launch counter for an hour window, creating
    /// the window lazily on first admission.
    pub async fn increment_rate_window(&self, hour_start: &str) -> SandpoolResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_windows (hour_start, launches)
            VALUES (?, 1)
            ON CONFLICT(hour_start) DO UPDATE SET launches = launches + 1
            "#,
        )
        .bind(hour_start)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns up to `limit` recorded runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> SandpoolResult<Vec<HistoryRun>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, kind, resource_class, state,
                   bootstrap_ms, restore_ms, total_ms, pool_hit,
                   error, deleted_reason, created_at, recorded_at
            FROM runs
            ORDER BY recorded_at DESC, run_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryRun {
                run_id: row.get("run_id"),
                kind: row.get("kind"),
                resource_class: row.get("resource_class"),
                state: row.get("state"),
                bootstrap_ms: row.get("bootstrap_ms"),
                restore_ms: row.get("restore_ms"),
                total_ms: row.get("total_ms"),
                pool_hit: row.get("pool_hit"),
                error: row.get("error"),
                deleted_reason: row.get("deleted_reason"),
                created_at: row.get("created_at"),
                recorded_at: row.get("recorded_at"),
            })
            .collect())
    }

    /// Returns aggregate statistics over all recorded runs.
    pub async fn stats(&self) -> SandpoolResult<HistoryStats> {
        let total_runs = sqlx::query("SELECT COUNT(*) AS n FROM runs")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n");

        let mut by_kind = HashMap::new();
        for row in sqlx::query("SELECT kind, COUNT(*) AS n FROM runs GROUP BY kind")
            .fetch_all(&self.pool)
            .await?
        {
            by_kind.insert(row.get::<String, _>("kind"), row.get::<i64, _>("n"));
        }

        let mut avg_total_ms = HashMap::new();
        for row in sqlx::query(
            "SELECT kind, AVG(total_ms) AS avg_ms FROM runs WHERE total_ms IS NOT NULL GROUP BY kind",
        )
        .fetch_all(&self.pool)
        .await?
        {
            avg_total_ms.insert(row.get::<String, _>("kind"), row.get::<f64, _>("avg_ms"));
        }

        let pool_hit_rate = sqlx::query(
            r#"
            SELECT AVG(CASE WHEN pool_hit THEN 1.0 ELSE 0.0 END) AS rate
            FROM runs
            WHERE kind = 'warm' AND pool_hit IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?
        .get::<Option<f64>, _>("rate");

        Ok(HistoryStats {
            total_runs,
            by_kind,
            avg_total_ms,
            pool_hit_rate,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
