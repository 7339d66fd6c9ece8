//! Tag publication - the commit point of a release

use crate::adapters::{AdapterError, SourceControl};
use crate::core::error::PublishError;
use crate::core::Release;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Creates the annotated tag, pushes it, and announces the release
pub struct TagPublisher {
    scm: Arc<dyn SourceControl>,
    remote: String,
    events: Option<mpsc::Sender<Release>>,
}

impl TagPublisher {
    pub fn new(scm: Arc<dyn SourceControl>, remote: impl Into<String>) -> Self {
        Self {
            scm,
            remote: remote.into(),
            events: None,
        }
    }

    /// Send every published release on `sender`
    pub fn with_events(mut self, sender: mpsc::Sender<Release>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Publish a release tag
    ///
    /// All-or-nothing: when the remote refuses the push, the local tag is
    /// deleted again before the error is returned.
    pub async fn publish(&self, release: &Release) -> Result<(), PublishError> {
        let tag = release.tag();

        match self
            .scm
            .create_annotated_tag(&tag, &release.source_ref, &release.tag_message())
            .await
        {
            Ok(()) => {}
            Err(AdapterError::AlreadyExists(_)) => return Err(PublishError::TagCollision(tag)),
            Err(e) => return Err(PublishError::Scm(e)),
        }
        info!("Created tag {} at {}", tag, release.source_ref);

        if let Err(push_err) = self.scm.push_tag(&self.remote, &tag).await {
            warn!("Push of {} to {} rejected: {}", tag, self.remote, push_err);
            if let Err(cleanup_err) = self.scm.delete_local_tag(&tag).await {
                error!("Failed to delete local tag {} after rejected push: {}", tag, cleanup_err);
            }
            return Err(PublishError::RemoteRejected {
                tag,
                reason: push_err.to_string(),
            });
        }
        info!("Published {} to {}", tag, self.remote);

        if let Some(sender) = &self.events {
            // The tag is durable at this point; a missing listener only
            // means nobody starts the test run automatically.
            if sender.send(release.clone()).await.is_err() {
                warn!("No pipeline listening for release {}", tag);
            }
        }

        Ok(())
    }
}
