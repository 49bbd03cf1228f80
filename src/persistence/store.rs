//! SQLite-based run store

use crate::core::{RunStatus, TargetIdentity};
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, plan_name, cluster, region, namespace, status, endpoint, \
     started_at, completed_at, steps FROM runs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Create a new SQLite store
    ///
    /// `:memory:` opens a private in-memory database.
    pub async fn new(db_path: &str) -> Result<Self> {
        let url = if db_path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", db_path)
        };
        // One connection: an in-memory database lives and dies with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("rollout");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        let db_path = db_dir.join("runs.db");
        let db_path = db_path
            .to_str()
            .context("Database path is not valid UTF-8")?;
        Self::new(db_path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                plan_name TEXT NOT NULL,
                cluster TEXT NOT NULL,
                region TEXT NOT NULL,
                namespace TEXT NOT NULL,
                status TEXT NOT NULL,
                endpoint TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                steps TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_plan_name ON runs(plan_name);
            CREATE INDEX IF NOT EXISTS idx_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    /// Convert NaiveDateTime to DateTime<Utc>
    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn status_to_str(status: RunStatus) -> &'static str {
        match status {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::CompletedWithWarning => "CompletedWithWarning",
            RunStatus::Aborted => "Aborted",
        }
    }

    fn status_from_str(status: &str) -> RunStatus {
        match status {
            "Running" => RunStatus::Running,
            "Completed" => RunStatus::Completed,
            "CompletedWithWarning" => RunStatus::CompletedWithWarning,
            "Aborted" => RunStatus::Aborted,
            _ => RunStatus::Pending,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            plan_name: row.get("plan_name"),
            target: TargetIdentity {
                cluster: row.get("cluster"),
                region: row.get("region"),
                namespace: row.get("namespace"),
            },
            status: Self::status_from_str(&row.get::<String, _>("status")),
            endpoint: row.get("endpoint"),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row
                .get::<Option<NaiveDateTime>, _>("completed_at")
                .map(Self::from_naive),
            steps: serde_json::from_str(&row.get::<String, _>("steps"))
                .context("Corrupt step log in run record")?,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let steps = serde_json::to_string(&run.steps)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, plan_name, cluster, region, namespace, status, endpoint, started_at, completed_at, steps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.plan_name)
        .bind(&run.target.cluster)
        .bind(&run.target.region)
        .bind(&run.target.namespace)
        .bind(Self::status_to_str(run.status))
        .bind(&run.endpoint)
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(steps)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, plan_name: &str) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(&format!(
            "{} WHERE plan_name = ?1 ORDER BY started_at DESC",
            SELECT_COLUMNS
        ))
        .bind(plan_name)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_plans(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT plan_name
            FROM runs
            ORDER BY plan_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list plans")?;

        Ok(rows.iter().map(|row| row.get("plan_name")).collect())
    }
}
