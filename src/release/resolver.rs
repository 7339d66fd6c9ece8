//! Next-version resolution from tag history

use crate::core::error::VersionError;
use crate::core::{BumpClass, Version};
use tracing::{debug, warn};

/// Outcome of resolving the next version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Candidate version for the release
    pub version: Version,

    /// Version the bump was applied to
    pub baseline: Version,

    /// Non-fatal problems, e.g. a malformed latest tag replaced by the baseline
    pub warnings: Vec<VersionError>,
}

/// Computes candidate versions. Stateless: the same inputs always give the
/// same output, and nothing here looks at remote state.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionResolver;

impl VersionResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve the next version for `bump` on top of `latest_tag`
    ///
    /// A missing tag starts from `v0.0.0`. A malformed tag also starts from
    /// `v0.0.0`, with the parse failure reported as a warning.
    pub fn resolve(&self, latest_tag: Option<&str>, bump: &BumpClass) -> Result<Resolution, VersionError> {
        let mut warnings = Vec::new();

        let baseline = match latest_tag {
            None => Version::baseline(),
            Some(tag) => match Version::parse_tag(tag) {
                Ok(version) => version,
                Err(err) => {
                    warn!("{}; falling back to {}", err, Version::baseline());
                    warnings.push(err);
                    Version::baseline()
                }
            },
        };

        let version = baseline.bump(bump)?;
        debug!("Resolved {} + {} -> {}", baseline, bump, version);

        Ok(Resolution {
            version,
            baseline,
            warnings,
        })
    }

    /// Latest tag by version order, ignoring tags not in canonical form
    pub fn latest<'a, I>(&self, tags: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter()
            .filter_map(|tag| match Version::parse_tag(tag) {
                Ok(version) => Some((version, tag.as_str())),
                Err(_) => {
                    debug!("Ignoring non-release tag {}", tag);
                    None
                }
            })
            .max_by_key(|(version, _)| *version)
            .map(|(_, tag)| tag)
    }
}
