//! Test utilities for the updater
//!
//! Shared by unit tests and the integration suite (through the
//! `test-utils` feature):
//! - logging setup that plays well with the test harness
//! - fake executables carrying this platform's header
//! - staged downloads that pass validation
//! - swapper and restarter doubles for failure injection
//! - JSON bodies in the release registry's format

use crate::core::UpdateError;
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::fetcher::DownloadResult;
use crate::upgrade::install::{InstalledArtifact, Restarter, SwapContext, SwapOutcome, Swapper};
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::platform::executable_magic;
use crate::version::Version;
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; without either, tests
/// stay silent.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Bytes that pass the executable header check on this platform.
pub fn fake_executable(payload: &[u8]) -> Vec<u8> {
    let mut bytes = executable_magic().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Writes `bytes` into `dir` as a staged download for `version`.
pub fn stage_download(dir: &Path, bytes: &[u8], version: Version) -> DownloadResult {
    let local_path = dir.join(format!("tool-{version}-{}.download", uuid::Uuid::new_v4().simple()));
    std::fs::write(&local_path, bytes).unwrap_or_else(|e| panic!("failed to stage {}: {e}", local_path.display()));

    DownloadResult {
        local_path,
        size_bytes: bytes.len() as u64,
        checksum: ChecksumVerifier::sha256_hex(bytes),
        source_url: format!("https://example.com/download/v{version}/tool"),
        version,
        asset_name: "tool".to_string(),
    }
}

/// Settings pointing at a mock registry, with all state under `root`.
pub fn settings_for_server(api_base: &str, root: &Path, current_version: &str) -> UpdateSettings {
    UpdateSettings {
        api_base: api_base.to_string(),
        owner: "owner".to_string(),
        repo: "repo".to_string(),
        app_name: "tool".to_string(),
        max_retries: 1,
        auto_restart: false,
        ..UpdateSettings::for_install(current_version, root.join("app").join("tool"), root.join("state"))
    }
}

/// A release document as the registry would serve it.
pub fn release_json(tag: &str, assets: &[(&str, &str, u64)]) -> String {
    let assets: Vec<serde_json::Value> = assets
        .iter()
        .map(|(name, url, size)| {
            serde_json::json!({
                "name": name,
                "browser_download_url": url,
                "size": size,
                "content_type": "application/octet-stream",
            })
        })
        .collect();

    serde_json::json!({
        "tag_name": tag,
        "name": format!("Release {tag}"),
        "body": "Bug fixes",
        "published_at": "2024-05-01T10:00:00Z",
        "prerelease": false,
        "assets": assets,
    })
    .to_string()
}

/// Swapper that half-writes the target and then fails, like a disk that
/// filled up mid-copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSwapper;

impl Swapper for FailingSwapper {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn swap(&self, _staged: &Path, target: &Path, _ctx: &SwapContext) -> Result<SwapOutcome, UpdateError> {
        let _ = std::fs::write(target, b"\0\0\0partial");
        Err(UpdateError::install("No space left on device (os error 28)"))
    }
}

/// Restarter that records requests instead of exiting.
#[derive(Debug, Default)]
pub struct RecordingRestarter {
    calls: Mutex<Vec<Version>>,
}

impl RecordingRestarter {
    /// Versions restarted into, in order.
    pub fn restarts(&self) -> Vec<Version> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Restarter for RecordingRestarter {
    fn restart(&self, installed: &InstalledArtifact) -> Result<(), UpdateError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(installed.version.clone());
        }
        Ok(())
    }
}
