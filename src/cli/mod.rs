//! Command-line interface for the updater.
//!
//! Each subcommand lives in its own module and talks to the engine only
//! through [`UpdatePipeline`]:
//!
//! - `check` - ask the registry whether a newer release exists
//! - `download` - stage a release without installing it
//! - `upgrade` - check, download and install in one go
//! - `rollback` - restore the newest backup
//! - `status` - show the session and the last check
//! - `backups` - list stored backups
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: no logging
//! - `--config` / `-c`: settings file to use
//! - `--no-progress`: hide progress bars (also `PDFREN_NO_PROGRESS`)
//!
//! Without `--verbose` or `--quiet`, `RUST_LOG` decides, defaulting to
//! `info`.

mod backups;
mod check;
mod download;
mod rollback;
mod status;
mod upgrade;

use crate::config::{HostDirs, SettingsFile};
use crate::upgrade::{UpdatePipeline, UpdateSettings};
use crate::utils::progress::disable_progress;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Options shared by every command, derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter directive; `None` disables logging
    pub log_level: Option<String>,
    /// Hide progress bars
    pub no_progress: bool,
    /// Explicit settings file
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Installs the tracing subscriber for this run.
    ///
    /// Safe to call more than once; later calls are ignored.
    pub fn init_logging(&self) {
        let Some(level) = &self.log_level else {
            return;
        };
        let filter = if level == "info" {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        } else {
            EnvFilter::new(level)
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Applies process-wide switches such as `--no-progress`.
    pub fn apply(&self) {
        if self.no_progress {
            disable_progress();
        }
    }

    /// Loads the settings file, lets `adjust` override values for this
    /// run, and builds a pipeline.
    pub async fn open(&self, adjust: impl FnOnce(&mut UpdateSettings)) -> Result<CommandContext> {
        let settings_file = SettingsFile::locate(self.config_path.as_deref())?;
        let mut settings = settings_file.load(&HostDirs::detect()?).await?;
        adjust(&mut settings);
        debug!(
            "Using settings from {} (install path {})",
            settings_file.path().display(),
            settings.install_path.display()
        );
        let pipeline = UpdatePipeline::new(settings)?;
        Ok(CommandContext {
            pipeline,
            settings_file,
        })
    }
}

/// What a command needs to run.
pub struct CommandContext {
    /// The update engine
    pub pipeline: UpdatePipeline,
    /// Where the settings came from; updated after installs and rollbacks
    pub settings_file: SettingsFile,
}

/// Self-updater for the PDF rename tool.
#[derive(Parser)]
#[command(
    name = "pdfren-update",
    about = "Check for, download and install updates of the PDF rename tool",
    version,
    long_about = "Checks the release registry for a newer build, downloads and verifies it, \
                  backs up the installed executable and swaps the new one in. A failed install \
                  restores the previous version."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Settings file (default: platform config dir, or PDFREN_UPDATE_CONFIG)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a newer release exists
    Check(check::CheckCommand),

    /// Download and verify a release without installing it
    Download(download::DownloadCommand),

    /// Download and install a release
    Upgrade(upgrade::UpgradeCommand),

    /// Restore the most recent backup
    Rollback(rollback::RollbackCommand),

    /// Show update status
    Status(status::StatusCommand),

    /// List stored backups
    Backups(backups::BackupsCommand),
}

impl Cli {
    /// Runs the selected command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Derives the shared options from the global flags.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Runs the selected command with explicit options.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();
        config.apply();
        let (no_restart, wait_pid) = match &self.command {
            Commands::Upgrade(cmd) => (cmd.no_restart, cmd.wait_pid),
            _ => (false, None),
        };
        let ctx = config
            .open(|settings| {
                if no_restart {
                    settings.auto_restart = false;
                }
                if wait_pid.is_some() {
                    settings.wait_for_pid = wait_pid;
                }
            })
            .await?;

        match self.command {
            Commands::Check(cmd) => cmd.execute(&ctx).await,
            Commands::Download(cmd) => cmd.execute(&ctx).await,
            Commands::Upgrade(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
            Commands::Status(cmd) => cmd.execute(&ctx).await,
            Commands::Backups(cmd) => cmd.execute(&ctx).await,
        }
    }
}
