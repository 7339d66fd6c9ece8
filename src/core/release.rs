//! Release records and operator release requests

use crate::core::{BumpClass, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published release. Created once per version, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: Version,

    /// Commit the tag is bound to
    pub source_ref: String,

    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Release {
    pub fn new(version: Version, source_ref: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            version,
            source_ref: source_ref.into(),
            notes,
            created_at: Utc::now(),
        }
    }

    /// Canonical tag name for this release
    pub fn tag(&self) -> String {
        self.version.tag()
    }

    /// Annotated tag message
    pub fn tag_message(&self) -> String {
        self.notes
            .clone()
            .unwrap_or_else(|| placeholder_notes(&self.version))
    }
}

/// Auto-generated notes used when none are supplied and none are required
pub fn placeholder_notes(version: &Version) -> String {
    format!("Release {}", version)
}

/// Cut-a-release trigger, fully populated up front
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub bump: BumpClass,

    #[serde(default)]
    pub notes: Option<String>,
}

impl ReleaseRequest {
    pub fn new(bump: BumpClass) -> Self {
        Self { bump, notes: None }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
