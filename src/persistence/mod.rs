//! Persistence layer for run history and deployment records

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{DeploymentRecord, Environment, PipelineRun, PipelineStage};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub environment: Environment,

    /// Release tag, e.g. `v1.1.0`
    pub version: String,

    pub stage: PipelineStage,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Number of stage transitions taken
    pub transitions: usize,

    /// Why the run ended, once terminal
    pub reason: Option<String>,
}

/// Result of claiming an environment for a new run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Granted,

    /// Another non-terminal run holds the environment
    Held(Uuid),
}

/// Trait for persistence backends
///
/// Runs are upserted by id on every stage change. Terminal runs are never
/// deleted.
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or update a run
    async fn save_run(&self, run: &PipelineRun) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    /// Runs newest first, optionally filtered by environment
    async fn list_runs(&self, environment: Option<Environment>, limit: Option<usize>) -> Result<Vec<PipelineRun>>;

    /// The non-terminal run of an environment, if any
    async fn active_run(&self, environment: Environment) -> Result<Option<PipelineRun>>;

    /// Insert a new run unless its environment already has a non-terminal
    /// run. Atomic across every handle to the same store.
    async fn claim_environment(&self, run: &PipelineRun) -> Result<Claim>;

    /// Update `run` only while the stored copy is still in `expected`.
    /// Returns false when another writer moved it first.
    async fn save_run_if(&self, run: &PipelineRun, expected: PipelineStage) -> Result<bool>;

    /// Insert or replace the deployment record of an environment
    async fn save_record(&self, record: &DeploymentRecord) -> Result<()>;

    async fn load_record(&self, environment: Environment) -> Result<Option<DeploymentRecord>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
    records: RwLock<HashMap<Environment, DeploymentRecord>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryPersistence {
    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, environment: Option<Environment>, limit: Option<usize>) -> Result<Vec<PipelineRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<PipelineRun> = runs
            .values()
            .filter(|r| environment.map_or(true, |env| r.environment == env))
            .cloned()
            .collect();

        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn active_run(&self, environment: Environment) -> Result<Option<PipelineRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .find(|r| r.environment == environment && !r.is_terminal())
            .cloned())
    }

    async fn claim_environment(&self, run: &PipelineRun) -> Result<Claim> {
        let mut runs = self.runs.write().await;
        if let Some(active) = runs
            .values()
            .find(|r| r.environment == run.environment && !r.is_terminal())
        {
            return Ok(Claim::Held(active.id));
        }

        runs.insert(run.id, run.clone());
        Ok(Claim::Granted)
    }

    async fn save_run_if(&self, run: &PipelineRun, expected: PipelineStage) -> Result<bool> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(stored) if stored.stage == expected => {
                *stored = run.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_record(&self, record: &DeploymentRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.environment, record.clone());
        Ok(())
    }

    async fn load_record(&self, environment: Environment) -> Result<Option<DeploymentRecord>> {
        Ok(self.records.read().await.get(&environment).cloned())
    }
}

/// Create a summary from a run
pub fn create_summary(run: &PipelineRun) -> RunSummary {
    RunSummary {
        run_id: run.id,
        environment: run.environment,
        version: run.release.tag(),
        stage: run.stage,
        started_at: run.started_at,
        completed_at: run.completed_at,
        transitions: run.history.len(),
        reason: run.terminal_reason(),
    }
}
