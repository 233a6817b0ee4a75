//! Version comparison used to decide whether an update is available.
//!
//! [`VersionComparator::is_newer`] is the only question the pipeline asks:
//! is the registry's tag strictly greater than what is installed? Equal
//! versions and unparsable input on either side both answer `false`, so a
//! bad tag can never trigger a downgrade or an update loop.
//!
//! ```rust
//! use pdfren_updater::version::VersionComparator;
//! use std::cmp::Ordering;
//!
//! assert!(VersionComparator::is_newer("v1.3.0", "1.2.0"));
//! assert!(!VersionComparator::is_newer("v2.0.0", "2.0.0"));
//! assert!(!VersionComparator::is_newer("nightly", "1.0.0"));
//! assert_eq!(VersionComparator::compare_str("1.2", "1.2.0").unwrap(), Ordering::Equal);
//! ```

use super::Version;
use crate::core::UpdateError;
use std::cmp::Ordering;
use tracing::debug;

/// Version comparison helpers.
pub struct VersionComparator;

impl VersionComparator {
    /// Parses a tag; see [`Version::parse`].
    pub fn parse(tag: &str) -> Result<Version, UpdateError> {
        Version::parse(tag)
    }

    /// Orders two versions field by field.
    pub fn compare(a: &Version, b: &Version) -> Ordering {
        a.cmp(b)
    }

    /// Parses and orders two version strings.
    pub fn compare_str(a: &str, b: &str) -> Result<Ordering, UpdateError> {
        Ok(Self::compare(&Version::parse(a)?, &Version::parse(b)?))
    }

    /// Whether `remote` is strictly newer than `local`.
    ///
    /// Parse failures on either side are logged and treated as "no update".
    pub fn is_newer(remote: &str, local: &str) -> bool {
        match Self::compare_str(remote, local) {
            Ok(ordering) => ordering == Ordering::Greater,
            Err(e) => {
                debug!("Treating unparsable version as no update: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_newer() {
        assert!(VersionComparator::is_newer("v1.3.0", "1.2.0"));
        assert!(VersionComparator::is_newer("1.2.1", "v1.2"));
        assert!(!VersionComparator::is_newer("1.2.0", "1.3.0"));
        assert!(!VersionComparator::is_newer("2.0.0", "v2.0.0"));
    }

    #[test]
    fn test_is_newer_fails_safe() {
        assert!(!VersionComparator::is_newer("", "1.0.0"));
        assert!(!VersionComparator::is_newer("9.9.9", "garbage"));
        assert!(!VersionComparator::is_newer("v2.0.0-beta", "1.0.0"));
    }

    #[test]
    fn test_compare_is_a_total_order() {
        let versions: Vec<Version> = ["0.9", "1.0", "1.0.1", "1.2.0", "1.10", "2.0.0"]
            .iter()
            .map(|s| Version::parse(s).unwrap())
            .collect();

        for a in &versions {
            assert!(!VersionComparator::is_newer(&a.to_string(), &a.to_string()));
            for b in &versions {
                let ab = VersionComparator::compare(a, b);
                let ba = VersionComparator::compare(b, a);
                assert_eq!(ab, ba.reverse());
                for c in &versions {
                    if ab == Ordering::Less && VersionComparator::compare(b, c) == Ordering::Less {
                        assert_eq!(VersionComparator::compare(a, c), Ordering::Less);
                    }
                }
            }
        }
    }
}
