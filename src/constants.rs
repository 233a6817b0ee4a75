//! Global constants used throughout the updater.
//!
//! Timeout durations, retry parameters, cadence limits and file naming
//! conventions shared by more than one module live here so the numbers
//! stay discoverable.

use std::time::Duration;

/// `Accept` header sent to the release registry (GitHub REST v3 media type).
pub const REGISTRY_ACCEPT: &str = "application/vnd.github.v3+json";

/// Default release registry API base.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// `User-Agent` sent with every registry and artifact request.
pub fn user_agent() -> String {
    format!("PDF-Rename-Tool-Updater/{}", env!("CARGO_PKG_VERSION"))
}

/// Timeout for a single registry round trip (30 seconds).
pub const REGISTRY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout shared by the registry and artifact clients.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a `latest` release answer may be served from memory (5 minutes).
pub const RELEASE_CACHE_TTL: Duration = Duration::from_secs(300);

/// Starting delay for exponential backoff between retry attempts.
pub const STARTING_BACKOFF_DELAY_MS: u64 = 200;

/// Maximum backoff delay between retry attempts.
pub const MAX_BACKOFF_DELAY_MS: u64 = 2_000;

/// Minimum spacing between two progress callbacks during a download.
pub const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Number of attempts made by [`crate::upgrade::backup::BackupStore::restore`]
/// before giving up on a locked install path.
pub const RESTORE_ATTEMPTS: u32 = 3;

/// File name prefix of every backup in the backup directory.
pub const BACKUP_PREFIX: &str = "backup_";

/// Timestamp layout embedded in backup file names.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";

/// Extension of a staged download while bytes are still arriving.
pub const PARTIAL_EXTENSION: &str = "part";

/// Extension of a staged download that passed verification.
pub const STAGED_EXTENSION: &str = "download";

/// Release asset names that carry checksums rather than the application.
pub const CHECKSUM_ASSET_NAMES: &[&str] = &["SHA256SUMS", "sha256sums.txt", "checksums.txt"];

/// Suffix of a per-asset checksum file (`<asset>.sha256`).
pub const CHECKSUM_ASSET_SUFFIX: &str = ".sha256";
