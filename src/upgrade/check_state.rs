//! Persisted record of the last update check.
//!
//! Keeps the check interval meaningful across restarts of the host. The
//! record is optional: without a path it lives only in the pipeline's
//! memory.

use crate::utils::fs::safe_write;
use crate::version::Version;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Outcome of the most recent check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    /// When the check completed
    pub last_check: DateTime<Utc>,
    /// Newest version the registry reported, if the check reached it
    pub latest_version: Option<Version>,
    /// Installed version at the time of the check
    pub local_version: Version,
    /// Whether an update was available
    pub has_update: bool,
}

impl CheckRecord {
    /// Whether less than `interval` has passed since this check.
    pub fn is_fresh(&self, interval: std::time::Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(interval) {
            Ok(interval) => now.signed_duration_since(self.last_check) < interval,
            Err(_) => true,
        }
    }
}

/// JSON file holding a [`CheckRecord`].
#[derive(Debug, Clone)]
pub struct CheckStateStore {
    path: Option<PathBuf>,
}

impl CheckStateStore {
    /// Store at `path`; `None` disables persistence.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
        }
    }

    /// Loads the last record. Missing or corrupt files read as `None`.
    pub fn load(&self) -> Option<CheckRecord> {
        let path = self.path.as_ref()?;
        let text = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&text) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring corrupt check state {}: {e}", path.display());
                None
            }
        }
    }

    /// Atomically writes `record`. A no-op without a path.
    pub fn save(&self, record: &CheckRecord) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(record).context("Failed to serialize check state")?;
        safe_write(path, &json)
            .with_context(|| format!("Failed to write check state {}", path.display()))?;
        debug!("Recorded update check at {}", record.last_check);
        Ok(())
    }
}
