//! Release preconditions

use crate::core::error::GateError;
use crate::core::{placeholder_notes, ReleaseContext};
use tracing::{debug, warn};

/// Notes accepted by the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovedNotes {
    pub text: String,

    /// True when no notes were supplied and the placeholder was used
    pub generated: bool,
}

/// Pure precondition check run before any tag is created
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseGate;

impl ReleaseGate {
    pub fn new() -> Self {
        Self
    }

    /// Validate a release context
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// clean working tree, tag collision, release notes policy.
    pub fn validate(&self, context: &ReleaseContext) -> Result<ApprovedNotes, GateError> {
        if !context.working_tree_clean {
            warn!("Refusing release {}: working tree is dirty", context.candidate);
            return Err(GateError::DirtyWorkingTree);
        }

        let tag = context.candidate_tag();
        if context.existing_tags.contains(&tag) {
            warn!("Refusing release {}: tag already exists", tag);
            return Err(GateError::TagCollision(tag));
        }

        let notes = match context.effective_notes() {
            Some(notes) => ApprovedNotes {
                text: notes.to_string(),
                generated: false,
            },
            None if context.require_notes => {
                warn!("Refusing release {}: release notes are required", tag);
                return Err(GateError::MissingReleaseNotesPolicy);
            }
            None => ApprovedNotes {
                text: placeholder_notes(&context.candidate),
                generated: true,
            },
        };

        debug!("Gate passed for {}", tag);
        Ok(notes)
    }
}
