//! Artifact download into the staging directory.
//!
//! Bytes stream into `<app>-<version>-<uuid>.part`, hashed on the way in.
//! Only after the size and (when published) checksum match is the file
//! renamed to `.download` and handed out as a [`DownloadResult`]. Every
//! attempt gets a fresh uuid and a failed attempt deletes its `.part`
//! file, so nothing unverified ever reaches the installer.

use crate::constants::{CONNECT_TIMEOUT, PARTIAL_EXTENSION, PROGRESS_MIN_INTERVAL, STAGED_EXTENSION, user_agent};
use crate::core::UpdateError;
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::verification::normalize_checksum;
use crate::utils::backoff::exponential_backoff_with_delay;
use crate::version::Version;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Progress callback: `(downloaded_bytes, total_bytes)`, total 0 when unknown.
///
/// Invoked from the task running the download, at most once per
/// [`PROGRESS_MIN_INTERVAL`] plus once when the transfer completes.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// A verified artifact sitting in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Staged file, distinct from the install path
    pub local_path: PathBuf,
    /// Bytes written
    pub size_bytes: u64,
    /// SHA-256 of the staged bytes, lowercase hex
    pub checksum: String,
    /// Where the bytes came from
    pub source_url: String,
    /// Release version of the artifact
    pub version: Version,
    /// Release asset name
    pub asset_name: String,
}

/// What to download and what it is expected to look like.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Absolute http(s) URL of the artifact
    pub url: String,
    /// Directory receiving the staged file
    pub staging_dir: PathBuf,
    /// Release version of the artifact
    pub version: Version,
    /// Release asset name
    pub asset_name: String,
    /// Size advertised by the registry, if any
    pub expected_size: Option<u64>,
    /// Published SHA-256, if any
    pub expected_checksum: Option<String>,
}

/// Downloads artifacts with retries and verification.
pub struct ArtifactFetcher {
    client: reqwest::Client,
    app_name: String,
    attempts: u32,
}

impl ArtifactFetcher {
    /// Builds a fetcher whose transfers are bounded by the download timeout.
    pub fn new(settings: &UpdateSettings) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(settings.download_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UpdateError::network("build HTTP client", e))?;

        Ok(Self {
            client,
            app_name: settings.app_name.clone(),
            attempts: settings.max_retries.max(1),
        })
    }

    /// Downloads `request.url` into the staging directory.
    ///
    /// Transient transport failures are retried with exponential backoff up
    /// to the configured bound. Integrity failures are returned at once.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::Registry`] for a malformed URL or a non-transient
    ///   error status
    /// - [`UpdateError::Network`] once retries are exhausted
    /// - [`UpdateError::Integrity`] for an empty body, a size mismatch, a
    ///   checksum mismatch, or a staging file that cannot be written
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: Option<&ProgressFn>,
    ) -> Result<DownloadResult, UpdateError> {
        check_url(&request.url)?;
        fs::create_dir_all(&request.staging_dir)
            .await
            .map_err(|e| staging_error(&request.staging_dir, e))?;

        let mut attempt = 0;
        loop {
            let partial = self.partial_path(request);
            match self.fetch_once(request, &partial, on_progress).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    remove_quietly(&partial).await;
                    if !e.is_transient() || attempt + 1 >= self.attempts {
                        warn!("Download of {} failed: {e}", request.url);
                        return Err(e);
                    }
                    warn!(
                        "Download attempt {}/{} failed, retrying: {e}",
                        attempt + 1,
                        self.attempts
                    );
                    attempt = exponential_backoff_with_delay(attempt).await;
                }
            }
        }
    }

    /// Deletes old staged downloads, keeping the newest `keep`, and any
    /// leftover `.part` files. Returns how many files were removed.
    pub async fn cleanup_staging(&self, staging_dir: &Path, keep: usize) -> Result<usize, UpdateError> {
        if !staging_dir.exists() {
            return Ok(0);
        }

        let mut entries = fs::read_dir(staging_dir).await.map_err(|e| staging_error(staging_dir, e))?;
        let mut staged: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await.map_err(|e| staging_error(staging_dir, e))? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(PARTIAL_EXTENSION) => {
                    if fs::remove_file(&path).await.is_ok() {
                        removed += 1;
                    }
                }
                Some(STAGED_EXTENSION) => {
                    let modified = entry
                        .metadata()
                        .await
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    staged.push((modified, path));
                }
                _ => {}
            }
        }

        staged.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in staged.into_iter().skip(keep) {
            debug!("Removing old download {}", path.display());
            if fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Cleaned {removed} file(s) from {}", staging_dir.display());
        }
        Ok(removed)
    }

    /// Removes a staged download that will not be installed.
    pub async fn discard(&self, download: &DownloadResult) {
        remove_quietly(&download.local_path).await;
    }

    fn partial_path(&self, request: &FetchRequest) -> PathBuf {
        request.staging_dir.join(format!(
            "{}-{}-{}.{PARTIAL_EXTENSION}",
            self.app_name,
            request.version,
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn fetch_once(
        &self,
        request: &FetchRequest,
        partial: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<DownloadResult, UpdateError> {
        let operation = format!("download {}", request.asset_name);
        debug!("GET {} -> {}", request.url, partial.display());

        let mut response = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| UpdateError::network(&operation, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &operation));
        }

        let content_length = response.content_length();
        let total = content_length.or(request.expected_size).unwrap_or(0);

        let mut file = fs::File::create(partial).await.map_err(|e| staging_error(partial, e))?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut last_report: Option<Instant> = None;

        while let Some(chunk) = response.chunk().await.map_err(|e| UpdateError::network(&operation, e))? {
            file.write_all(&chunk).await.map_err(|e| staging_error(partial, e))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(progress) = on_progress {
                if last_report.is_none_or(|t| t.elapsed() >= PROGRESS_MIN_INTERVAL) {
                    progress(downloaded, total);
                    last_report = Some(Instant::now());
                }
            }
        }

        file.flush().await.map_err(|e| staging_error(partial, e))?;
        file.sync_all().await.map_err(|e| staging_error(partial, e))?;
        drop(file);

        if let Some(progress) = on_progress {
            progress(downloaded, if total > 0 { total } else { downloaded });
        }

        let checksum = hex::encode(hasher.finalize());
        verify_transfer(request, content_length, downloaded, &checksum)?;

        let staged = partial.with_extension(STAGED_EXTENSION);
        fs::rename(partial, &staged).await.map_err(|e| staging_error(&staged, e))?;

        info!(
            "Downloaded {} ({downloaded} bytes, sha256 {checksum}) to {}",
            request.asset_name,
            staged.display()
        );

        Ok(DownloadResult {
            local_path: staged,
            size_bytes: downloaded,
            checksum,
            source_url: request.url.clone(),
            version: request.version.clone(),
            asset_name: request.asset_name.clone(),
        })
    }
}

fn verify_transfer(
    request: &FetchRequest,
    content_length: Option<u64>,
    downloaded: u64,
    checksum: &str,
) -> Result<(), UpdateError> {
    let mismatch = |expected: String, actual: String| UpdateError::Integrity {
        artifact: request.asset_name.clone(),
        expected,
        actual,
    };

    if downloaded == 0 {
        return Err(mismatch("a non-empty artifact".into(), "0 bytes".into()));
    }
    if let Some(length) = content_length.filter(|l| *l != downloaded) {
        return Err(mismatch(format!("{length} bytes (Content-Length)"), format!("{downloaded} bytes")));
    }
    if let Some(size) = request.expected_size.filter(|s| *s > 0 && *s != downloaded) {
        return Err(mismatch(format!("{size} bytes (release asset)"), format!("{downloaded} bytes")));
    }
    match request.expected_checksum.as_deref().map(normalize_checksum) {
        Some(expected) if expected != checksum => {
            Err(mismatch(format!("sha256 {expected}"), format!("sha256 {checksum}")))
        }
        Some(_) => {
            debug!("Checksum of {} verified", request.asset_name);
            Ok(())
        }
        None => {
            debug!("No published checksum for {}, size check only", request.asset_name);
            Ok(())
        }
    }
}

fn check_url(url: &str) -> Result<(), UpdateError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        Ok(parsed) => Err(UpdateError::registry(format!(
            "download URL '{url}' uses unsupported scheme '{}'",
            parsed.scheme()
        ))),
        Err(e) => Err(UpdateError::registry(format!("invalid download URL '{url}': {e}"))),
    }
}

/// 5xx, 408 and 429 are worth another attempt; other statuses are final.
fn status_error(status: StatusCode, operation: &str) -> UpdateError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        UpdateError::network(operation, format!("HTTP {status}"))
    } else {
        UpdateError::Registry {
            reason: format!("{operation}: HTTP {status}"),
            status: Some(status.as_u16()),
        }
    }
}

fn staging_error(path: &Path, e: std::io::Error) -> UpdateError {
    UpdateError::Integrity {
        artifact: path.display().to_string(),
        expected: "a writable staging file".to_string(),
        actual: e.to_string(),
    }
}

async fn remove_quietly(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", path.display()),
    }
}
