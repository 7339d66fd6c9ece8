//! Pipeline run state models

use crate::core::{error::PipelineError, Environment, ImageRef, Release};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stage of a promotion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Queued,
    Building,
    Pushed,
    TestDeploying,
    TestHealthCheck,
    /// Waiting for an explicit operator trigger
    AwaitingProdApproval,
    ProdDeploying,
    ProdHealthCheck,
    RollingBack,
    Succeeded,
    Failed,
    /// Operator abort before any deploy side effect
    Aborted,
}

impl PipelineStage {
    /// Check if the stage is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Succeeded | PipelineStage::Failed | PipelineStage::Aborted
        )
    }

    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;

        matches!(
            (self, next),
            (Queued, Building)
                | (Queued, AwaitingProdApproval)
                | (Queued, Failed)
                | (Building, Pushed)
                | (Building, Failed)
                | (Pushed, TestDeploying)
                | (Pushed, Failed)
                | (TestDeploying, TestHealthCheck)
                | (TestDeploying, Failed)
                | (TestHealthCheck, Succeeded)
                | (TestHealthCheck, Failed)
                | (AwaitingProdApproval, ProdDeploying)
                | (AwaitingProdApproval, Aborted)
                | (ProdDeploying, ProdHealthCheck)
                | (ProdDeploying, RollingBack)
                | (ProdHealthCheck, Succeeded)
                | (ProdHealthCheck, RollingBack)
                | (RollingBack, Failed)
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    BuildFailed,
    PushFailed,
    DeployRejected,
    DeployTimeout,
    Unhealthy,
    /// Rollback impossible; needs an operator
    NoKnownGoodState,
    RollbackFailed,
    /// Process stopped before the run could deploy anything
    Interrupted,
}

impl FailureKind {
    /// Failures that leave an environment without a verified deployment
    pub fn requires_operator(&self) -> bool {
        matches!(self, FailureKind::NoKnownGoodState | FailureKind::RollbackFailed)
    }
}

/// Reason recorded for a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Set when a production rollback restored last-known-good
    #[serde(default)]
    pub rolled_back_to: Option<ImageRef>,
}

/// One edge taken by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: PipelineStage,
    pub to: PipelineStage,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A single (release, environment) promotion attempt
///
/// Terminal runs are kept as audit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub release: Release,
    pub environment: Environment,
    pub stage: PipelineStage,

    /// Health poll attempts spent by the most recent probe
    pub attempts: u32,

    /// Artifact this run deploys, once known
    pub image: Option<ImageRef>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub history: Vec<StageTransition>,
    pub failure: Option<RunFailure>,
}

impl PipelineRun {
    /// Create a queued run
    pub fn new(release: Release, environment: Environment) -> Self {
        Self {
            id: Uuid::new_v4(),
            release,
            environment,
            stage: PipelineStage::Queued,
            attempts: 0,
            image: None,
            started_at: Utc::now(),
            completed_at: None,
            history: Vec::new(),
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Move to `next`, appending to the stage history
    pub fn advance(&mut self, next: PipelineStage, note: Option<String>) -> Result<(), PipelineError> {
        if !self.stage.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }

        let now = Utc::now();
        self.history.push(StageTransition {
            from: self.stage,
            to: next,
            at: now,
            note,
        });
        self.stage = next;

        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Move to `Failed` recording the reason
    pub fn fail(&mut self, failure: RunFailure) -> Result<(), PipelineError> {
        let note = Some(failure.message.clone());
        self.failure = Some(failure);
        self.advance(PipelineStage::Failed, note)
    }

    /// Reason for the terminal transition, if the run is terminal
    pub fn terminal_reason(&self) -> Option<String> {
        if !self.is_terminal() {
            return None;
        }
        match (&self.failure, self.stage) {
            (Some(failure), _) => Some(format!("{:?}: {}", failure.kind, failure.message)),
            (None, stage) => self
                .history
                .last()
                .and_then(|t| t.note.clone())
                .or_else(|| Some(stage.to_string())),
        }
    }

    /// Wall time of the run so far
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
