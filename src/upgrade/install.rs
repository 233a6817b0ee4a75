//! Replacing the installed artifact.
//!
//! An install moves through `Validated → Swapping → Installed →
//! RestartRequested`, and the types enforce the order:
//!
//! - [`InstallExecutor::validate`] is the only way to get a
//!   [`ValidatedArtifact`]
//! - [`InstallExecutor::install`] consumes one and yields an
//!   [`InstalledArtifact`]
//! - [`InstallExecutor::request_restart`] only accepts an
//!   [`InstalledArtifact`]
//!
//! The swap itself is delegated to a [`Swapper`] chosen once per platform
//! by [`platform_swapper`]:
//!
//! - [`DirectRename`] renames the new file over the install path. Used where
//!   a running executable may be replaced.
//! - [`DeferredSwap`] leaves the new file beside the install path and writes
//!   a helper script that finishes the move after this process exits. Used
//!   on Windows, where a running executable is locked.
//!
//! In both cases the new bytes are first copied to a hidden sibling of the
//! install path, so the final step is a same-directory rename and never a
//! copy over the live file.

use crate::core::UpdateError;
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::fetcher::DownloadResult;
use crate::upgrade::marker::VersionMarker;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::fs::{durable_copy, temp_sibling};
use crate::utils::platform::has_executable_magic;
use crate::version::Version;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A staged download that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedArtifact {
    download: DownloadResult,
}

impl ValidatedArtifact {
    /// The validated download.
    pub fn download(&self) -> &DownloadResult {
        &self.download
    }
}

/// How a swap completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The install path already holds the new artifact.
    Replaced,
    /// The helper at `helper` completes the swap once this process exits.
    Deferred {
        /// Helper script to launch on restart
        helper: PathBuf,
    },
}

/// An artifact that has been swapped in (or scheduled to be).
#[derive(Debug, Clone)]
pub struct InstalledArtifact {
    /// Version now installed
    pub version: Version,
    /// The install path
    pub target: PathBuf,
    /// How the swap completed
    pub outcome: SwapOutcome,
}

/// Facts a swapper needs beyond the two paths.
#[derive(Debug, Clone)]
pub struct SwapContext {
    /// Version being installed
    pub version: Version,
    /// Marker file to update once the swap completes
    pub marker_path: PathBuf,
    /// Process that must exit before a deferred swap may proceed
    pub pid: u32,
    /// Start the application again after a deferred swap
    pub relaunch: bool,
}

/// Replaces the install path with a staged sibling.
pub trait Swapper: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Moves `staged` (a sibling of `target`) into place.
    ///
    /// On error the install path may be damaged; the caller restores it.
    fn swap(&self, staged: &Path, target: &Path, ctx: &SwapContext) -> Result<SwapOutcome, UpdateError>;
}

/// Same-directory rename of the staged file onto the install path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRename;

impl Swapper for DirectRename {
    fn name(&self) -> &'static str {
        "direct-rename"
    }

    fn swap(&self, staged: &Path, target: &Path, _ctx: &SwapContext) -> Result<SwapOutcome, UpdateError> {
        fs::rename(staged, target).map_err(|e| {
            UpdateError::install(format!(
                "rename {} -> {} failed: {e}",
                staged.display(),
                target.display()
            ))
        })?;
        Ok(SwapOutcome::Replaced)
    }
}

/// Schedules the swap for after a process exits.
///
/// The helper waits for [`SwapContext::pid`], then retries the move for
/// about ten seconds before giving up. When the updater runs in its own
/// process, that PID must be the application's
/// ([`UpdateSettings::wait_for_pid`]), or a still-running application keeps
/// the install path locked past the retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredSwap;

impl Swapper for DeferredSwap {
    fn name(&self) -> &'static str {
        "deferred-swap"
    }

    fn swap(&self, staged: &Path, target: &Path, ctx: &SwapContext) -> Result<SwapOutcome, UpdateError> {
        let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let (extension, script) = if cfg!(windows) {
            ("cmd", render_cmd_helper(staged, target, ctx))
        } else {
            ("sh", render_sh_helper(staged, target, ctx))
        };
        let helper = dir.join(format!(".update-{}.{extension}", uuid::Uuid::new_v4().simple()));

        write_helper(&helper, &script).map_err(|e| {
            let _ = fs::remove_file(&helper);
            UpdateError::install(format!("cannot write update helper {}: {e}", helper.display()))
        })?;

        info!("Swap of {} deferred to {}", target.display(), helper.display());
        Ok(SwapOutcome::Deferred {
            helper,
        })
    }
}

/// The swapper suited to this platform.
pub fn platform_swapper() -> Arc<dyn Swapper> {
    if cfg!(windows) {
        Arc::new(DeferredSwap)
    } else {
        Arc::new(DirectRename)
    }
}

/// Ends the current process so a new version can take over.
pub trait Restarter: Send + Sync {
    /// Restart into `installed`. A real implementation does not return on
    /// success.
    fn restart(&self, installed: &InstalledArtifact) -> Result<(), UpdateError>;
}

/// Launches the helper or the new binary, then exits this process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRestarter {
    relaunch: bool,
}

impl ProcessRestarter {
    /// `relaunch` starts the installed application again after a direct
    /// swap; a deferred swap's helper relaunches on its own.
    pub const fn new(relaunch: bool) -> Self {
        Self {
            relaunch,
        }
    }
}

impl Restarter for ProcessRestarter {
    fn restart(&self, installed: &InstalledArtifact) -> Result<(), UpdateError> {
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();

        let spawned = match &installed.outcome {
            SwapOutcome::Deferred { helper } => {
                let mut command = if cfg!(windows) {
                    let mut c = Command::new("cmd");
                    c.arg("/C").arg(helper);
                    c
                } else {
                    let mut c = Command::new("sh");
                    c.arg(helper);
                    c
                };
                Some(command.spawn())
            }
            SwapOutcome::Replaced if self.relaunch => Some(Command::new(&installed.target).spawn()),
            SwapOutcome::Replaced => None,
        };

        if let Some(Err(e)) = spawned {
            error!("Failed to launch after update: {e}");
            return Err(UpdateError::install(format!("restart failed: {e}")));
        }

        info!("Exiting to complete update to {}", installed.version);
        std::process::exit(0)
    }
}

/// Validates, swaps and restarts.
pub struct InstallExecutor {
    swapper: Arc<dyn Swapper>,
    restarter: Arc<dyn Restarter>,
    validate_header: bool,
    marker: VersionMarker,
    relaunch: bool,
    wait_for_pid: Option<u32>,
}

impl InstallExecutor {
    /// Executor with the platform swapper and a process restarter.
    pub fn new(settings: &UpdateSettings) -> Self {
        Self {
            swapper: platform_swapper(),
            restarter: Arc::new(ProcessRestarter::new(settings.relaunch)),
            validate_header: settings.validate_executable,
            marker: VersionMarker::new(&settings.marker_path),
            relaunch: settings.relaunch,
            wait_for_pid: settings.wait_for_pid,
        }
    }

    /// Replaces the swapper.
    #[must_use]
    pub fn with_swapper(mut self, swapper: Arc<dyn Swapper>) -> Self {
        self.swapper = swapper;
        self
    }

    /// Replaces the restarter.
    #[must_use]
    pub fn with_restarter(mut self, restarter: Arc<dyn Restarter>) -> Self {
        self.restarter = restarter;
        self
    }

    /// Name of the active swapper.
    pub fn swapper_name(&self) -> &'static str {
        self.swapper.name()
    }

    /// Re-checks a staged download before anything live is touched.
    ///
    /// The file must exist, match the recorded size and checksum, and (when
    /// enabled) start with this platform's executable header.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Install`] naming the failed check.
    pub fn validate(&self, download: &DownloadResult) -> Result<ValidatedArtifact, UpdateError> {
        let path = &download.local_path;
        let bytes = fs::read(path)
            .map_err(|e| UpdateError::install(format!("staged artifact {} unreadable: {e}", path.display())))?;

        if bytes.len() as u64 != download.size_bytes {
            return Err(UpdateError::install(format!(
                "staged artifact is {} bytes, expected {}",
                bytes.len(),
                download.size_bytes
            )));
        }

        let checksum = ChecksumVerifier::sha256_hex(&bytes);
        if checksum != download.checksum {
            return Err(UpdateError::install(format!(
                "staged artifact checksum {checksum} does not match {}",
                download.checksum
            )));
        }

        if self.validate_header && !has_executable_magic(&bytes) {
            return Err(UpdateError::install(format!(
                "{} is not an executable for this platform",
                download.asset_name
            )));
        }

        debug!("Validated {} ({} bytes)", path.display(), download.size_bytes);
        Ok(ValidatedArtifact {
            download: download.clone(),
        })
    }

    /// Whether `download` would pass [`validate`](Self::validate).
    pub fn is_valid(&self, download: &DownloadResult) -> bool {
        match self.validate(download) {
            Ok(_) => true,
            Err(e) => {
                warn!("Validation failed: {e}");
                false
            }
        }
    }

    /// Swaps the validated artifact into `target`.
    ///
    /// Blocking; run it off the async executor. Any error means swapping
    /// had begun and `target` may be damaged, so the caller restores it.
    pub fn install(&self, artifact: ValidatedArtifact, target: &Path) -> Result<InstalledArtifact, UpdateError> {
        let download = artifact.download;

        info!(
            "Installing {} over {} using {}",
            download.version,
            target.display(),
            self.swapper.name()
        );

        let staged = temp_sibling(target, "new");
        if let Err(e) = stage_beside(&download.local_path, &staged, target) {
            let _ = fs::remove_file(&staged);
            return Err(UpdateError::install(format!(
                "cannot stage new artifact at {}: {e}",
                staged.display()
            )));
        }

        let ctx = SwapContext {
            version: download.version.clone(),
            marker_path: self.marker.path().to_path_buf(),
            pid: self.wait_for_pid.unwrap_or_else(std::process::id),
            relaunch: self.relaunch,
        };

        let outcome = match self.swapper.swap(&staged, target, &ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = fs::remove_file(&staged);
                return Err(e);
            }
        };

        if outcome == SwapOutcome::Replaced {
            let installed = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
            if installed != download.size_bytes {
                return Err(UpdateError::install(format!(
                    "install path holds {installed} bytes after swap, expected {}",
                    download.size_bytes
                )));
            }
            if let Err(e) = self.marker.write(&download.version) {
                warn!("{e:#}");
            }
        }

        info!("Installed version {}", download.version);
        Ok(InstalledArtifact {
            version: download.version,
            target: target.to_path_buf(),
            outcome,
        })
    }

    /// Hands over to the restarter. Last step of a successful update.
    pub fn request_restart(&self, installed: InstalledArtifact) -> Result<(), UpdateError> {
        info!("Restart requested for version {}", installed.version);
        self.restarter.restart(&installed)
    }
}

/// Copies the download next to `target` and gives it the right mode.
fn stage_beside(download: &Path, staged: &Path, target: &Path) -> std::io::Result<()> {
    durable_copy(download, staged)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = match fs::metadata(target) {
            Ok(m) => m.permissions(),
            Err(_) => fs::Permissions::from_mode(0o755),
        };
        fs::set_permissions(staged, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = target;

    Ok(())
}

fn write_helper(path: &Path, script: &str) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(script.as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Quotes a path for a POSIX shell.
fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// Helper script for `sh`.
pub(crate) fn render_sh_helper(staged: &Path, target: &Path, ctx: &SwapContext) -> String {
    let relaunch = if ctx.relaunch {
        format!("  nohup {} >/dev/null 2>&1 &\n", sh_quote(target))
    } else {
        String::new()
    };

    format!(
        "#!/bin/sh\n\
         while kill -0 {pid} 2>/dev/null; do sleep 1; done\n\
         attempts=0\n\
         until mv -f {staged} {target}; do\n\
         \x20 attempts=$((attempts + 1))\n\
         \x20 if [ \"$attempts\" -ge 10 ]; then rm -f \"$0\"; exit 1; fi\n\
         \x20 sleep 1\n\
         done\n\
         printf '%s\\n' '{version}' > {marker}\n\
         {relaunch}\
         rm -f \"$0\"\n",
        pid = ctx.pid,
        staged = sh_quote(staged),
        target = sh_quote(target),
        version = ctx.version,
        marker = sh_quote(&ctx.marker_path),
    )
}

/// Helper script for `cmd.exe`.
pub(crate) fn render_cmd_helper(staged: &Path, target: &Path, ctx: &SwapContext) -> String {
    let relaunch = if ctx.relaunch {
        format!("start \"\" \"{}\"\r\n", target.display())
    } else {
        String::new()
    };

    format!(
        "@echo off\r\n\
         setlocal EnableDelayedExpansion\r\n\
         :wait\r\n\
         tasklist /FI \"PID eq {pid}\" 2>NUL | find \"{pid}\" >NUL\r\n\
         if not errorlevel 1 (\r\n\
         \x20 timeout /t 1 /nobreak >NUL\r\n\
         \x20 goto wait\r\n\
         )\r\n\
         set attempts=0\r\n\
         :move\r\n\
         move /Y \"{staged}\" \"{target}\" >NUL 2>&1\r\n\
         if errorlevel 1 (\r\n\
         \x20 set /a attempts+=1\r\n\
         \x20 if !attempts! GEQ 10 goto done\r\n\
         \x20 timeout /t 1 /nobreak >NUL\r\n\
         \x20 goto move\r\n\
         )\r\n\
         >\"{marker}\" echo {version}\r\n\
         {relaunch}\
         :done\r\n\
         (goto) 2>nul & del \"%~f0\"\r\n",
        pid = ctx.pid,
        staged = staged.display(),
        target = target.display(),
        version = ctx.version,
        marker = ctx.marker_path.display(),
    )
}
