//! Cutting releases: resolve the next version, gate it, publish the tag

pub mod gate;
pub mod publisher;
pub mod resolver;

pub use gate::{ApprovedNotes, ReleaseGate};
pub use publisher::TagPublisher;
pub use resolver::{Resolution, VersionResolver};

use crate::adapters::{AdapterError, SourceControl};
use crate::core::config::ReleaseConfig;
use crate::core::error::{GateError, PublishError, VersionError};
use crate::core::{Release, ReleaseContext, ReleaseRequest};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Any failure of a release attempt. Only `Publish` can follow a side effect,
/// and the publisher undoes its own local tag before reporting it.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Failed to read repository state: {0}")]
    Scm(#[from] AdapterError),
}

/// A successfully published release
#[derive(Debug, Clone)]
pub struct CutRelease {
    pub release: Release,

    /// Tag the bump was applied to, if one existed
    pub previous_tag: Option<String>,

    pub warnings: Vec<VersionError>,

    /// Notes were the generated placeholder
    pub generated_notes: bool,
}

/// Composes resolver, gate and publisher against one repository
pub struct ReleaseManager {
    scm: Arc<dyn SourceControl>,
    config: ReleaseConfig,
    resolver: VersionResolver,
    gate: ReleaseGate,
    publisher: TagPublisher,
}

impl ReleaseManager {
    pub fn new(scm: Arc<dyn SourceControl>, config: ReleaseConfig) -> Self {
        let publisher = TagPublisher::new(scm.clone(), config.remote.clone());
        Self {
            scm,
            config,
            resolver: VersionResolver::new(),
            gate: ReleaseGate::new(),
            publisher,
        }
    }

    /// Announce published releases on `sender`
    pub fn with_events(mut self, sender: mpsc::Sender<Release>) -> Self {
        self.publisher = self.publisher.with_events(sender);
        self
    }

    /// Local and remote tags together. An unreachable remote is tolerated:
    /// the push itself is the authoritative collision check.
    async fn tag_namespace(&self) -> Result<HashSet<String>, AdapterError> {
        let mut tags: HashSet<String> = self.scm.list_tags().await?.into_iter().collect();
        match self.scm.remote_tags(&self.config.remote).await {
            Ok(remote) => tags.extend(remote),
            Err(e) => warn!("Could not list tags on {}: {}", self.config.remote, e),
        }
        Ok(tags)
    }

    /// Resolve, validate and publish a release
    pub async fn cut(&self, request: &ReleaseRequest) -> Result<CutRelease, ReleaseError> {
        let tags = self.tag_namespace().await?;
        let previous_tag = self.resolver.latest(&tags).map(str::to_string);
        let resolution = self.resolver.resolve(previous_tag.as_deref(), &request.bump)?;

        let source_ref = self.scm.head_commit().await?;
        let context = ReleaseContext::new(resolution.version, source_ref)
            .with_working_tree_clean(self.scm.is_working_tree_clean().await?)
            .with_existing_tags(tags)
            .with_notes(request.notes.clone())
            .with_require_notes(self.config.require_notes);

        let notes = self.gate.validate(&context)?;
        let release = Release::new(resolution.version, context.source_ref, Some(notes.text));

        self.publisher.publish(&release).await?;
        info!(
            "Released {} (previous: {})",
            release.version,
            previous_tag.as_deref().unwrap_or("none")
        );

        Ok(CutRelease {
            release,
            previous_tag,
            warnings: resolution.warnings,
            generated_notes: notes.generated,
        })
    }
}
