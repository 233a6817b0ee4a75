//! pdfren-updater - self-update engine for the PDF rename tool
//!
//! Keeps an installed executable current from a GitHub-style release
//! registry. One update moves through check, download, backup, install and
//! restart; a failure once the install path is being modified restores the
//! previous version from a backup.
//!
//! # Architecture Overview
//!
//! The engine is a set of small components behind one facade:
//!
//! - version comparison decides whether a release is newer
//! - the release client queries the registry and picks the asset
//! - the fetcher streams the asset into a staging directory and verifies it
//! - the backup store keeps timestamped copies of the installed executable
//! - the install executor validates the download and swaps it in
//! - [`upgrade::UpdatePipeline`] sequences all of the above and allows one
//!   session at a time
//!
//! The engine takes a plain [`upgrade::UpdateSettings`] value and never
//! reads the environment. The [`config`] and [`cli`] modules are the host
//! side: they load settings from a TOML file and drive the pipeline from
//! the command line.
//!
//! # Core Modules
//!
//! - [`version`] - version parsing and ordering
//! - [`upgrade`] - release client, fetcher, backups, install, pipeline
//! - [`core`] - error kinds and user-facing messages
//! - [`config`] - settings file location, loading and saving
//! - [`cli`] - the `pdfren-update` command line
//! - [`utils`] - backoff, atomic file writes, platform facts, progress bars
//! - [`constants`] - timeouts, retry bounds, file naming
//!
//! # Example
//!
//! ```rust,no_run
//! use pdfren_updater::upgrade::{UpdatePipeline, UpdateSettings};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = UpdateSettings::for_install("1.2.0", "/opt/pdfren/tool", "/var/lib/pdfren");
//! let pipeline = UpdatePipeline::new(settings)?;
//!
//! let check = pipeline.check_for_updates(false).await;
//! println!("{}", check.to_outcome().message);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;
pub mod version;

// Test utilities (available in tests and when the test-utils feature is enabled)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
