//! CLI command definitions

use crate::core::{BumpClass, Environment, ReleaseRequest, Version};
use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

/// Cut a release: resolve the next version, tag it, and deploy it to test
#[derive(Debug, Args, Clone)]
pub struct ReleaseCommand {
    /// Version component to bump
    #[arg(short, long, value_enum, default_value_t = BumpArg::Patch)]
    pub bump: BumpArg,

    /// Explicit version instead of a bump (must be greater than the latest)
    #[arg(long, conflicts_with = "bump")]
    pub version: Option<Version>,

    /// Release notes used as the tag message
    #[arg(short, long)]
    pub notes: Option<String>,

    /// Only publish the tag; do not start a test run
    #[arg(long)]
    pub no_deploy: bool,
}

impl ReleaseCommand {
    pub fn to_request(&self) -> ReleaseRequest {
        let bump = match self.version {
            Some(version) => BumpClass::Custom(version),
            None => self.bump.into(),
        };
        ReleaseRequest {
            bump,
            notes: self.notes.clone(),
        }
    }
}

/// Request promotion of a validated release to production
#[derive(Debug, Args, Clone)]
pub struct PromoteCommand {
    /// Target environment
    #[arg(short, long, default_value_t = Environment::Production)]
    pub env: Environment,

    /// Release version to promote, e.g. v1.1.0
    #[arg(long)]
    pub version: Version,

    /// Stop at the approval gate instead of deploying right away
    #[arg(long)]
    pub hold: bool,

    /// Promote even without a succeeded test run for this version
    #[arg(long = "override")]
    pub override_validation: bool,
}

/// Approve a promotion waiting at the approval gate
#[derive(Debug, Args, Clone)]
pub struct ApproveCommand {
    #[arg(short, long, default_value_t = Environment::Production)]
    pub env: Environment,

    /// Version the awaiting run must be for
    #[arg(long)]
    pub version: Version,
}

/// Abort a run that has not started deploying
#[derive(Debug, Args, Clone)]
pub struct AbortCommand {
    #[arg(long)]
    pub run_id: Uuid,
}

/// Restore an environment to its last-known-good deployment
#[derive(Debug, Args, Clone)]
pub struct RollbackCommand {
    #[arg(short, long)]
    pub env: Environment,
}

/// Show the current deployment of each environment
#[derive(Debug, Args, Clone)]
pub struct StatusCommand {
    #[arg(short, long)]
    pub env: Option<Environment>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Environment to filter by
    #[arg(short, long)]
    pub env: Option<Environment>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full stage history
    #[arg(long)]
    pub full: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<Uuid>,
}

/// Drive runs interrupted by a previous process to a terminal stage
#[derive(Debug, Args, Clone)]
pub struct ResumeCommand {}

/// Write credentials into the environment secret stores
#[derive(Debug, Args, Clone)]
pub struct SecretsCommand {
    /// YAML file with `test:` and optional `production:` maps
    #[arg(short, long)]
    pub file: PathBuf,

    /// Only write this environment's scope
    #[arg(short, long)]
    pub env: Option<Environment>,

    /// Reuse test values for production when none are given
    #[arg(long)]
    pub mirror: bool,
}

/// Validate the configuration file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Bump class argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BumpArg {
    Patch,
    Minor,
    Major,
}

impl From<BumpArg> for BumpClass {
    fn from(arg: BumpArg) -> Self {
        match arg {
            BumpArg::Patch => BumpClass::Patch,
            BumpArg::Minor => BumpClass::Minor,
            BumpArg::Major => BumpClass::Major,
        }
    }
}
