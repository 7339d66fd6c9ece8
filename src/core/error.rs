//! Error taxonomy for the release and promotion layers

use crate::adapters::AdapterError;
use crate::core::{Environment, PipelineStage, Version};
use thiserror::Error;
use uuid::Uuid;

/// Errors from version parsing and resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// Recoverable during resolution: the resolver falls back to the baseline
    #[error("Invalid tag format: {0:?} (expected v<major>.<minor>.<patch>)")]
    InvalidTagFormat(String),

    #[error("Version {requested} is not greater than the current latest {baseline}")]
    VersionNotIncreasing { requested: Version, baseline: Version },

    #[error("Cannot bump {0}: version component overflow")]
    ComponentOverflow(Version),
}

/// Release precondition failures. None of these leave side effects.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Working tree has uncommitted changes")]
    DirtyWorkingTree,

    #[error("Tag {0} already exists")]
    TagCollision(String),

    #[error("Release notes are required by configuration but none were supplied")]
    MissingReleaseNotesPolicy,

    #[error("Failed to inspect repository: {0}")]
    Inspect(#[from] AdapterError),
}

/// Tag publication failures
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Tag {0} already exists")]
    TagCollision(String),

    /// The remote refused the push; the local tag has been removed again
    #[error("Remote rejected tag {tag}: {reason}")]
    RemoteRejected { tag: String, reason: String },

    #[error("Source control error: {0}")]
    Scm(#[from] AdapterError),
}

/// Failures while restoring an environment to its last-known-good image
#[derive(Debug, Error)]
pub enum RollbackError {
    /// First-ever deploy failed, there is nothing to go back to
    #[error("No last-known-good deployment recorded for {0}")]
    NoKnownGoodState(Environment),

    #[error("Rollback deploy to {environment} was rejected: {reason}")]
    DeployRejected { environment: Environment, reason: String },

    #[error("Rolled-back image {image} in {environment} did not become healthy: {reason}")]
    Unhealthy {
        environment: Environment,
        image: String,
        reason: String,
    },
}

/// Orchestrator-level errors surfaced to the operator
///
/// Stage failures inside a run are not errors at this level; they are recorded
/// on the run as a [`crate::core::RunFailure`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("A run is already in progress for {environment} ({run_id})")]
    RunInProgress { environment: Environment, run_id: Uuid },

    #[error("No succeeded test run for {0}; promote with an explicit override to bypass")]
    PromotionNotValidated(Version),

    #[error("Promotion must target production, got {0}")]
    InvalidPromotionTarget(Environment),

    #[error("Awaiting run {run_id} is for {awaiting}, approval was given for {requested}")]
    ApprovalMismatch {
        run_id: Uuid,
        awaiting: Version,
        requested: Version,
    },

    #[error("No run is awaiting production approval for {0}")]
    NothingAwaitingApproval(Version),

    #[error("Run {run_id} cannot be aborted in stage {stage}")]
    AbortNotAllowed { run_id: Uuid, stage: PipelineStage },

    #[error("Invalid stage transition {from} -> {to}")]
    InvalidTransition { from: PipelineStage, to: PipelineStage },

    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("No last-known-good deployment recorded for {0}; operator intervention required")]
    NoKnownGoodState(Environment),

    #[error("Rollback of {environment} failed: {reason}")]
    RollbackFailed { environment: Environment, reason: String },

    #[error("State store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl RollbackError {
    pub fn environment(&self) -> Environment {
        match self {
            RollbackError::NoKnownGoodState(environment)
            | RollbackError::DeployRejected { environment, .. }
            | RollbackError::Unhealthy { environment, .. } => *environment,
        }
    }
}

impl From<RollbackError> for PipelineError {
    fn from(err: RollbackError) -> Self {
        match err {
            RollbackError::NoKnownGoodState(environment) => PipelineError::NoKnownGoodState(environment),
            other => PipelineError::RollbackFailed {
                environment: other.environment(),
                reason: other.to_string(),
            },
        }
    }
}
