//! Capability interfaces for external collaborators
//!
//! Source control, container registry, deploy target, health endpoint and
//! credential store are reached only through these traits, so the release
//! and promotion logic can run against fakes.

pub mod deploy;
pub mod docker;
pub mod git;
pub mod github_secrets;
pub mod http;
pub mod process;

use crate::core::{Environment, ImageRef, Release, Version};
use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;

pub use deploy::CommandDeployTarget;
pub use docker::DockerRegistry;
pub use git::GitCli;
pub use github_secrets::GithubSecretStore;
pub use http::HttpHealthEndpoint;
pub use process::{CommandOutput, CommandRunner};

/// Error types for external tool and service calls
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} exited with code {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to decode output: {0}")]
    Decode(String),
}

/// Tag namespace and working tree of the repository being released
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Tags in the local repository
    async fn list_tags(&self) -> Result<Vec<String>, AdapterError>;

    /// Tags on a remote
    async fn remote_tags(&self, remote: &str) -> Result<Vec<String>, AdapterError>;

    /// True when nothing is modified, staged or untracked
    async fn is_working_tree_clean(&self) -> Result<bool, AdapterError>;

    /// Commit id of HEAD
    async fn head_commit(&self) -> Result<String, AdapterError>;

    /// Create an annotated tag. Fails with `AlreadyExists` on collision.
    async fn create_annotated_tag(&self, tag: &str, target: &str, message: &str) -> Result<(), AdapterError>;

    async fn push_tag(&self, remote: &str, tag: &str) -> Result<(), AdapterError>;

    async fn delete_local_tag(&self, tag: &str) -> Result<(), AdapterError>;
}

/// Builds release artifacts and pushes them to the container registry
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Build the image for a release, returning its version-addressed ref
    async fn build(&self, release: &Release) -> Result<ImageRef, AdapterError>;

    /// Push a built image; returns the ref deploys should use
    async fn push(&self, image: &ImageRef) -> Result<ImageRef, AdapterError>;

    /// Point a mutable alias tag at `image`
    async fn alias(&self, image: &ImageRef, alias: &str) -> Result<ImageRef, AdapterError>;

    /// Version-addressed ref a release is published under
    fn image_for(&self, version: &Version) -> ImageRef;
}

/// Fire-and-forget deploy invocation; health is judged separately
#[async_trait]
pub trait DeployTarget: Send + Sync {
    async fn deploy(&self, environment: Environment, image: &ImageRef) -> Result<(), AdapterError>;
}

/// Raw answer of a health endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status_code: u16,
    pub body: String,
}

/// GET-style access to a service health endpoint
#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<HealthResponse, AdapterError>;
}

/// Per-environment, write-only credential store
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn put(&self, environment: Environment, name: &str, value: &SecretString) -> Result<(), AdapterError>;
}
