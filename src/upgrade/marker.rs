//! Version marker file.
//!
//! A one-line text file holding the installed version, kept beside the
//! update state. It is rewritten after every install and rollback, and
//! re-synchronised with the configured version when a pipeline starts.

use crate::utils::fs::safe_write;
use crate::version::Version;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Reads and writes the installed-version marker.
#[derive(Debug, Clone)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    /// Marker stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Location of the marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded version; `None` if the file is missing or unreadable.
    pub fn read(&self) -> Option<Version> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match Version::parse(text.trim()) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Ignoring unreadable version marker {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Atomically records `version`.
    pub fn write(&self, version: &Version) -> Result<()> {
        safe_write(&self.path, &format!("{version}\n"))
            .with_context(|| format!("Failed to write version marker {}", self.path.display()))?;
        debug!("Version marker set to {version}");
        Ok(())
    }

    /// Rewrites the marker if it does not already hold `version`.
    pub fn sync(&self, version: &Version) -> Result<()> {
        if self.read().as_ref() == Some(version) {
            return Ok(());
        }
        self.write(version)
    }
}
