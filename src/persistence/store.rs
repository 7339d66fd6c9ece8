//! SQLite-based persistence store

use crate::core::{DeploymentRecord, Environment, PipelineRun, PipelineStage};
use crate::persistence::{Claim, RunStore};
use anyhow::{Context, Result};
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run store
///
/// Runs and records are stored as JSON bodies next to indexed columns. A
/// partial unique index allows one non-terminal run per environment, which
/// holds across processes sharing the database file.
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) a store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        for statement in [
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                environment TEXT NOT NULL,
                version TEXT NOT NULL,
                stage TEXT NOT NULL,
                terminal INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                body TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_runs_environment ON runs(environment, terminal)",
            "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_one_active ON runs(environment) WHERE terminal = 0",
            r#"
            CREATE TABLE IF NOT EXISTS records (
                environment TEXT PRIMARY KEY,
                body TEXT NOT NULL
            )
            "#,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialize schema")?;
        }

        Ok(())
    }

    /// Plain insert, failing on any unique index
    async fn insert_run(&self, row: RunColumns) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO runs
            (id, environment, version, stage, terminal, started_at, completed_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(row.id)
        .bind(row.environment)
        .bind(row.version)
        .bind(row.stage)
        .bind(row.terminal)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode_run(row: &sqlx::sqlite::SqliteRow) -> Result<PipelineRun> {
        let body: String = row.get("body");
        serde_json::from_str(&body).context("Corrupt run body")
    }
}

/// Column values of a run row
struct RunColumns {
    id: String,
    environment: &'static str,
    version: String,
    stage: String,
    terminal: bool,
    started_at: String,
    completed_at: Option<String>,
    body: String,
}

impl RunColumns {
    fn of(run: &PipelineRun) -> serde_json::Result<Self> {
        Ok(Self {
            id: run.id.to_string(),
            environment: run.environment.as_str(),
            version: run.release.tag(),
            stage: run.stage.to_string(),
            terminal: run.is_terminal(),
            started_at: run.started_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            completed_at: run.completed_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            body: serde_json::to_string(run)?,
        })
    }
}

#[async_trait::async_trait]
impl RunStore for SqliteRunStore {
    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        let row = RunColumns::of(run)?;
        // Upsert by id; a second non-terminal run for the environment still
        // violates idx_runs_one_active
        sqlx::query(
            r#"
            INSERT INTO runs
            (id, environment, version, stage, terminal, started_at, completed_at, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (id) DO UPDATE SET
                stage = excluded.stage,
                terminal = excluded.terminal,
                completed_at = excluded.completed_at,
                body = excluded.body
            "#,
        )
        .bind(row.id)
        .bind(row.environment)
        .bind(row.version)
        .bind(row.stage)
        .bind(row.terminal)
        .bind(row.started_at)
        .bind(row.completed_at)
        .bind(row.body)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn claim_environment(&self, run: &PipelineRun) -> Result<Claim> {
        match self.insert_run(RunColumns::of(run)?).await {
            Ok(()) => Ok(Claim::Granted),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let holder = self
                    .active_run(run.environment)
                    .await?
                    .with_context(|| format!("{} was claimed and released during admission", run.environment))?;
                Ok(Claim::Held(holder.id))
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to claim environment")),
        }
    }

    async fn save_run_if(&self, run: &PipelineRun, expected: PipelineStage) -> Result<bool> {
        let row = RunColumns::of(run)?;
        let result = sqlx::query(
            r#"
            UPDATE runs
            SET stage = ?2, terminal = ?3, completed_at = ?4, body = ?5
            WHERE id = ?1 AND stage = ?6
            "#,
        )
        .bind(row.id)
        .bind(row.stage)
        .bind(row.terminal)
        .bind(row.completed_at)
        .bind(row.body)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update run")?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT body FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::decode_run).transpose()
    }

    async fn list_runs(&self, environment: Option<Environment>, limit: Option<usize>) -> Result<Vec<PipelineRun>> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM runs
            WHERE (?1 IS NULL OR environment = ?1)
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
        )
        .bind(environment.map(|e| e.as_str()))
        .bind(limit.map_or(-1, |l| l as i64))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter().map(Self::decode_run).collect()
    }

    async fn active_run(&self, environment: Environment) -> Result<Option<PipelineRun>> {
        let row = sqlx::query(
            r#"
            SELECT body FROM runs
            WHERE environment = ?1 AND terminal = 0
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(environment.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query active run")?;

        row.as_ref().map(Self::decode_run).transpose()
    }

    async fn save_record(&self, record: &DeploymentRecord) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO records (environment, body) VALUES (?1, ?2)")
            .bind(record.environment.as_str())
            .bind(serde_json::to_string(record)?)
            .execute(&self.pool)
            .await
            .context("Failed to save deployment record")?;

        Ok(())
    }

    async fn load_record(&self, environment: Environment) -> Result<Option<DeploymentRecord>> {
        let row = sqlx::query("SELECT body FROM records WHERE environment = ?1")
            .bind(environment.as_str())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load deployment record")?;

        match row {
            Some(row) => {
                let body: String = row.get("body");
                Ok(Some(serde_json::from_str(&body).context("Corrupt deployment record")?))
            }
            None => Ok(None),
        }
    }
}
