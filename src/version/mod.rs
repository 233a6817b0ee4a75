//! Application version numbers.
//!
//! Releases are tagged `vMAJOR.MINOR[.PATCH]`. A tag parses into a
//! [`Version`], an ordered numeric triple; anything else (prerelease
//! qualifiers, build metadata, four components, words) is rejected rather
//! than guessed at.
//!
//! - [`Version`] - the parsed triple, ordered field by field
//! - [`comparison`] - [`VersionComparator`] helpers used by the pipeline
//!
//! ```rust
//! use pdfren_updater::version::Version;
//!
//! let local = Version::parse("1.2").unwrap();
//! let remote = Version::parse("v1.3.0").unwrap();
//! assert!(remote > local);
//! assert_eq!(local.to_string(), "1.2.0");
//! ```

pub mod comparison;

pub use comparison::VersionComparator;

use crate::core::UpdateError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A release version `MAJOR.MINOR.PATCH`.
///
/// Ordering is lexicographic over `(major, minor, patch)`; it is delegated
/// to [`semver::Version`], which never carries prerelease or build data
/// here because [`Version::parse`] rejects them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    /// Builds a version from its three components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parses a release tag or version string.
    ///
    /// One optional leading `v` is stripped, then the rest must be two or
    /// three dot-separated non-negative integers. A missing patch is 0.
    ///
    /// # Errors
    ///
    /// [`UpdateError::VersionParse`] for an empty string, a non-numeric
    /// component, or fewer than two or more than three components.
    pub fn parse(tag: &str) -> Result<Self, UpdateError> {
        let fail = |reason: &str| UpdateError::VersionParse {
            input: tag.to_string(),
            reason: reason.to_string(),
        };

        let body = tag.trim();
        let body = body.strip_prefix('v').unwrap_or(body);
        if body.is_empty() {
            return Err(fail("empty version"));
        }

        let parts: Vec<&str> = body.split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(fail("expected MAJOR.MINOR or MAJOR.MINOR.PATCH"));
        }

        let mut numbers = [0u64; 3];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail(&format!("component '{part}' is not a number")));
            }
            *slot = part.parse().map_err(|_| fail(&format!("component '{part}' is too large")))?;
        }

        Ok(Self::new(numbers[0], numbers[1], numbers[2]))
    }

    /// Major component.
    pub const fn major(&self) -> u64 {
        self.0.major
    }

    /// Minor component.
    pub const fn minor(&self) -> u64 {
        self.0.minor
    }

    /// Patch component.
    pub const fn patch(&self) -> u64 {
        self.0.patch
    }

    /// The release tag for this version, `v` prefixed.
    pub fn tag(&self) -> String {
        format!("v{self}")
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
