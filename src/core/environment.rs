//! Deployment environments and their current deployment record

use crate::core::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target environment for a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Test, Environment::Production];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

/// Registry reference in `repository:tag` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Build `repository:tag`
    pub fn tagged(repository: &str, tag: &str) -> Self {
        Self(format!("{}:{}", repository, tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Repository part, i.e. everything before the last `:` that is not part
    /// of a registry host port
    pub fn repository(&self) -> &str {
        match self.0.rfind(':') {
            Some(idx) if !self.0[idx..].contains('/') => &self.0[..idx],
            _ => &self.0,
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health status of the deployment currently in an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    /// Deploy issued, health not yet confirmed
    Pending,
    Healthy,
    Failed,
    /// Restored to last-known-good and verified healthy
    RolledBack,
}

impl DeploymentStatus {
    /// Whether the image currently recorded may serve as a rollback target
    pub fn is_known_good(&self) -> bool {
        matches!(self, DeploymentStatus::Healthy | DeploymentStatus::RolledBack)
    }
}

/// Current deployment of one environment
///
/// Only the orchestrator writes these. Health probing and rollback read them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub environment: Environment,

    /// Image currently deployed (or being deployed)
    pub image_ref: Option<ImageRef>,

    /// Release version behind `image_ref`, if known
    pub deployed_version: Option<Version>,

    /// Most recent image that passed its health check
    pub last_known_good: Option<ImageRef>,

    /// Version behind `last_known_good`
    pub last_known_good_version: Option<Version>,

    pub status: DeploymentStatus,

    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Record for an environment that has never been deployed to
    pub fn empty(environment: Environment) -> Self {
        Self {
            environment,
            image_ref: None,
            deployed_version: None,
            last_known_good: None,
            last_known_good_version: None,
            status: DeploymentStatus::Pending,
            updated_at: Utc::now(),
        }
    }

    /// Point the record at a new image ahead of a deploy.
    ///
    /// The image being replaced becomes last-known-good first, but only when it
    /// actually passed its health check. Re-issuing the same pending deploy
    /// (resume after interruption) leaves last-known-good untouched.
    pub fn begin_deploy(&mut self, image: &ImageRef, version: Version) {
        let redeploy = self.image_ref.as_ref() == Some(image) && self.status == DeploymentStatus::Pending;

        if !redeploy && self.status.is_known_good() {
            if let Some(current) = self.image_ref.clone() {
                self.last_known_good = Some(current);
                self.last_known_good_version = self.deployed_version;
            }
        }

        self.image_ref = Some(image.clone());
        self.deployed_version = Some(version);
        self.status = DeploymentStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn mark_healthy(&mut self) {
        self.status = DeploymentStatus::Healthy;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.status = DeploymentStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Point the record at last-known-good ahead of a rollback deploy.
    ///
    /// Returns false, leaving the record untouched, when there is nothing to
    /// roll back to.
    pub fn begin_rollback(&mut self) -> bool {
        let Some(target) = self.last_known_good.clone() else {
            return false;
        };

        self.image_ref = Some(target);
        self.deployed_version = self.last_known_good_version;
        self.status = DeploymentStatus::Pending;
        self.updated_at = Utc::now();
        true
    }

    /// Apply a verified rollback to `image`
    pub fn mark_rolled_back(&mut self, image: ImageRef, version: Option<Version>) {
        self.image_ref = Some(image);
        self.deployed_version = version;
        self.status = DeploymentStatus::RolledBack;
        self.updated_at = Utc::now();
    }
}
