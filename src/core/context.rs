//! Release context - everything the gate needs, collected up front

use crate::core::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Snapshot of repository state and operator input for one release attempt
///
/// Built before validation so that the gate itself is a pure check with no
/// side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseContext {
    /// Version the release would be tagged with
    pub candidate: Version,

    /// No uncommitted modifications relative to HEAD
    pub working_tree_clean: bool,

    /// Every tag currently in the repository's namespace (local and remote)
    pub existing_tags: HashSet<String>,

    /// Commit the tag would be bound to
    pub source_ref: String,

    /// Notes supplied by the operator
    pub notes: Option<String>,

    /// Configuration demands non-empty notes
    pub require_notes: bool,
}

impl ReleaseContext {
    /// Create a context for a candidate with a clean tree and no tags
    pub fn new(candidate: Version, source_ref: impl Into<String>) -> Self {
        Self {
            candidate,
            working_tree_clean: true,
            existing_tags: HashSet::new(),
            source_ref: source_ref.into(),
            notes: None,
            require_notes: false,
        }
    }

    pub fn with_working_tree_clean(mut self, clean: bool) -> Self {
        self.working_tree_clean = clean;
        self
    }

    pub fn with_existing_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.existing_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_require_notes(mut self, required: bool) -> Self {
        self.require_notes = required;
        self
    }

    /// Canonical tag string of the candidate
    pub fn candidate_tag(&self) -> String {
        self.candidate.tag()
    }

    /// Supplied notes, if any are non-blank
    pub fn effective_notes(&self) -> Option<&str> {
        self.notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}
