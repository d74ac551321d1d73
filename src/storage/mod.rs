use anyhow::{Context as _, Result};
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the daemon indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

/// Terminal record of one provisioning run — written once, never updated.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRow {
    pub id: String,
    pub project_id: String,
    pub display_name: String,
    /// Terminal workflow state, e.g. `completed` or `failed_timeout`.
    pub state: String,
    pub client_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it
    /// are logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("nimbusd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Return a clone of the connection pool (cheap — Arc-backed).
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        // Two small tables; created idempotently on every startup rather
        // than through versioned migration files.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS provision_runs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                state TEXT NOT NULL,
                client_id TEXT,
                error TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .context("failed to create provision_runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provision_runs_project
             ON provision_runs(project_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(pool)
        .await
        .context("failed to create settings table")?;

        Ok(())
    }

    // ─── Provision runs ─────────────────────────────────────────────────────

    pub async fn record_run(
        &self,
        project_id: &str,
        display_name: &str,
        state: &str,
        client_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<RunRow> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO provision_runs (id, project_id, display_name, state, client_id, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(display_name)
        .bind(state)
        .bind(client_id)
        .bind(error)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_run(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run not found after insert"))
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<RunRow>> {
        Ok(sqlx::query_as("SELECT * FROM provision_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Most recent run for a project id; a display name can be provisioned
    /// more than once, each run with its own record.
    pub async fn latest_run_for_project(&self, project_id: &str) -> Result<Option<RunRow>> {
        Ok(sqlx::query_as(
            "SELECT * FROM provision_runs WHERE project_id = ?
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn list_runs(&self, limit: i64) -> Result<Vec<RunRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM provision_runs ORDER BY created_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn count_runs(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM provision_runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
