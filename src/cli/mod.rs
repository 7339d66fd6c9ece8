//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{
    AbortCommand, ApproveCommand, HistoryCommand, PromoteCommand, ReleaseCommand, ResumeCommand,
    RollbackCommand, SecretsCommand, StatusCommand, ValidateCommand,
};
use std::ffi::OsString;

/// Release tagging and health-gated environment promotion
#[derive(Debug, Parser, Clone)]
#[command(name = "shipwright")]
#[command(version)]
#[command(about = "Cut releases and promote them through test and production", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Keep run history in memory only
    #[arg(long, global = true)]
    pub no_history: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Cut a release and deploy it to test
    Release(ReleaseCommand),

    /// Promote a validated release to production
    Promote(PromoteCommand),

    /// Approve a promotion waiting at the approval gate
    Approve(ApproveCommand),

    /// Abort a run awaiting approval
    Abort(AbortCommand),

    /// Roll an environment back to its last-known-good deployment
    Rollback(RollbackCommand),

    /// Show deployment status per environment
    Status(StatusCommand),

    /// Show run history
    History(HistoryCommand),

    /// Resume interrupted runs
    Resume(ResumeCommand),

    /// Provision environment secrets
    Secrets(SecretsCommand),

    /// Validate the configuration file
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
