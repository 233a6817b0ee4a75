//! Self-update engine.
//!
//! Checks a GitHub-style release registry for a newer build, downloads and
//! verifies it, snapshots the installed executable and swaps the new one
//! in. Any failure after swapping has begun restores the snapshot.
//!
//! # Architecture Overview
//!
//! - **[`UpdatePipeline`]**: the facade the host application uses. Owns the
//!   session state and enforces one update at a time.
//! - **[`ReleaseClient`]**: queries the registry, with retries and a short
//!   in-memory cache for "latest".
//! - **[`ArtifactFetcher`]**: streams an asset into the staging directory,
//!   hashing as it goes, and rejects short or corrupted transfers.
//! - **[`BackupStore`]**: timestamped copies of the installed executable,
//!   with retention and restore.
//! - **[`InstallExecutor`]**: validates a download and swaps it in through a
//!   platform [`Swapper`], then hands over to a [`Restarter`].
//!
//! # Update Process Flow
//!
//! ```text
//! 1. Check
//!    ├── Skip if the last check is within the interval
//!    └── Compare the registry's latest tag with the installed version
//!
//! 2. Download
//!    ├── Resolve the release asset (fresh registry query)
//!    ├── Stream to <staging>/<app>-<version>-<id>.part
//!    └── Verify size and checksum, then rename to .download
//!
//! 3. Install
//!    ├── Snapshot the install path (abort on failure)
//!    ├── Validate the staged file (size, checksum, executable header)
//!    ├── Swap it in (restore the snapshot on failure)
//!    └── Prune old backups and clear staging
//!
//! 4. Restart
//!    └── Relaunch, or run the deferred-swap helper on Windows
//! ```
//!
//! # Examples
//!
//! ```rust,no_run
//! use pdfren_updater::upgrade::{UpdatePipeline, UpdateSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = UpdateSettings::for_install(
//!     "1.2.0",
//!     "/opt/pdfren/PDF_Rename_Operation",
//!     "/var/lib/pdfren",
//! );
//! let pipeline = UpdatePipeline::new(settings)?;
//!
//! let check = pipeline.check_for_updates(false).await;
//! if check.has_update {
//!     let download = pipeline.download_update(check.remote_version.as_ref(), None).await?;
//!     pipeline.install_update(download).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod check_state;
pub mod config;
pub mod fetcher;
pub mod install;
pub mod marker;
pub mod pipeline;
pub mod release;
pub mod verification;

pub use backup::{Backup, BackupStore};
pub use config::UpdateSettings;
pub use fetcher::{ArtifactFetcher, DownloadResult, FetchRequest, ProgressFn};
pub use install::{InstallExecutor, InstalledArtifact, Restarter, SwapOutcome, Swapper};
pub use pipeline::{
    CheckOutcome, InstallReport, InstallState, Outcome, Phase, StatusReport, UpdatePipeline,
    UpdateSession,
};
pub use release::{Asset, ReleaseClient, ReleaseInfo};
pub use verification::ChecksumVerifier;
