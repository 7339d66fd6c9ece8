//! Semantic version model and bump classes

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::core::error::VersionError;

static CANONICAL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?([0-9]+)\.([0-9]+)\.([0-9]+)$").expect("static regex is valid")
});

/// A release version `v<major>.<minor>.<patch>`
///
/// Ordering is lexicographic over (major, minor, patch), which the field
/// order of the derive gives us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Baseline used when no tag history exists
    pub const fn baseline() -> Self {
        Self::new(0, 0, 0)
    }

    /// Canonical tag string, e.g. `v1.2.3`
    pub fn tag(&self) -> String {
        self.to_string()
    }

    /// Parse a tag in canonical form. The leading `v` is optional on input.
    pub fn parse_tag(tag: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidTagFormat(tag.to_string());

        let caps = CANONICAL_TAG.captures(tag).ok_or_else(invalid)?;
        let component = |idx: usize| -> Result<u64, VersionError> {
            caps[idx].parse::<u64>().map_err(|_| invalid())
        };

        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }

    /// Apply a bump class to this version
    pub fn bump(&self, bump: &BumpClass) -> Result<Self, VersionError> {
        let overflow = || VersionError::ComponentOverflow(*self);
        match bump {
            BumpClass::Patch => {
                let patch = self.patch.checked_add(1).ok_or_else(overflow)?;
                Ok(Self::new(self.major, self.minor, patch))
            }
            BumpClass::Minor => {
                let minor = self.minor.checked_add(1).ok_or_else(overflow)?;
                Ok(Self::new(self.major, minor, 0))
            }
            BumpClass::Major => {
                let major = self.major.checked_add(1).ok_or_else(overflow)?;
                Ok(Self::new(major, 0, 0))
            }
            BumpClass::Custom(target) => {
                if target > self {
                    Ok(*target)
                } else {
                    Err(VersionError::VersionNotIncreasing {
                        requested: *target,
                        baseline: *self,
                    })
                }
            }
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_tag(s)
    }
}

// Versions travel as their canonical tag string in JSON and YAML.
impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.tag())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Version::parse_tag(&raw).map_err(serde::de::Error::custom)
    }
}

/// Category of version increment requested for a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpClass {
    Patch,
    Minor,
    Major,
    /// Explicit target; must be strictly greater than the baseline
    Custom(Version),
}

impl fmt::Display for BumpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BumpClass::Patch => write!(f, "patch"),
            BumpClass::Minor => write!(f, "minor"),
            BumpClass::Major => write!(f, "major"),
            BumpClass::Custom(v) => write!(f, "custom ({})", v),
        }
    }
}
