//! Backups of the installed artifact.
//!
//! Each snapshot is a full copy stored as
//! `backup_<YYYYmmdd_HHMMSS_micros>_v<version>[.ext]` in the backup
//! directory, so listing the directory is enough to recover creation time
//! and source version. A snapshot is copied to a hidden temporary name,
//! flushed, renamed into place and size-checked before it is reported;
//! until then the caller must not touch the install path.
//!
//! Restores write a sibling of the install path and rename it over the
//! target, so the install path is either the old bytes or the restored
//! ones. A missing or damaged install path is restored like any other.

use crate::constants::{BACKUP_PREFIX, RESTORE_ATTEMPTS};
use crate::core::UpdateError;
use crate::utils::backoff::exponential_backoff_with_delay;
use crate::utils::fs::temp_sibling;
use crate::version::Version;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// One stored copy of a previous installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Location of the copy
    pub path: PathBuf,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
    /// Version that was installed when the snapshot was taken
    pub source_version: Version,
    /// Size of the copy in bytes
    pub size_bytes: u64,
}

/// Directory of timestamped backups.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// A store rooted at `dir`. The directory is created on first snapshot.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
        }
    }

    /// The backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copies `artifact` into the store and flushes it to disk.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Backup`] if the artifact is missing, the copy fails,
    /// or the stored copy differs in size from the source. No partial
    /// backup is left behind.
    pub async fn snapshot(&self, artifact: &Path, version: &Version) -> Result<Backup, UpdateError> {
        let fail = |reason: String| UpdateError::backup("snapshot", reason);

        let source = fs::metadata(artifact)
            .await
            .map_err(|e| fail(format!("cannot read {}: {e}", artifact.display())))?;
        if !source.is_file() {
            return Err(fail(format!("{} is not a file", artifact.display())));
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| fail(format!("cannot create {}: {e}", self.dir.display())))?;

        let (created_at, path) = self.next_backup_path(artifact, version).await;
        let temp = temp_sibling(&path, "tmp");

        info!("Backing up {} to {}", artifact.display(), path.display());
        if let Err(e) = copy_flushed(artifact, &temp).await {
            remove_quietly(&temp).await;
            return Err(fail(format!("copy to {} failed: {e}", temp.display())));
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            remove_quietly(&temp).await;
            return Err(fail(format!("rename to {} failed: {e}", path.display())));
        }

        let stored = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if stored != source.len() {
            remove_quietly(&path).await;
            return Err(fail(format!(
                "backup holds {stored} bytes, expected {}",
                source.len()
            )));
        }

        debug!("Backup of {} bytes written", stored);
        Ok(Backup {
            path,
            created_at,
            source_version: version.clone(),
            size_bytes: stored,
        })
    }

    /// Puts `backup` back at `target`.
    ///
    /// Retries a few times with backoff because the target may be briefly
    /// locked by a process that is shutting down.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Backup`] when the backup is unusable or every attempt
    /// failed.
    pub async fn restore(&self, backup: &Backup, target: &Path) -> Result<(), UpdateError> {
        if !self.verify(backup).await {
            return Err(UpdateError::backup(
                "restore",
                format!("backup {} is missing or empty", backup.path.display()),
            ));
        }

        warn!("Restoring {} from {}", target.display(), backup.path.display());

        let mut attempt = 0;
        loop {
            match attempt_restore(&backup.path, target).await {
                Ok(()) => {
                    info!("Restored version {} to {}", backup.source_version, target.display());
                    return Ok(());
                }
                Err(e) if attempt + 1 < RESTORE_ATTEMPTS => {
                    warn!("Restore attempt {} failed: {e}. Retrying...", attempt + 1);
                    attempt = exponential_backoff_with_delay(attempt).await;
                }
                Err(e) => {
                    return Err(UpdateError::backup(
                        "restore",
                        format!("failed after {RESTORE_ATTEMPTS} attempts: {e}"),
                    ));
                }
            }
        }
    }

    /// Every backup in the store, newest first.
    ///
    /// Files that don't follow the backup naming scheme are ignored.
    pub async fn list(&self) -> Result<Vec<Backup>, UpdateError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let read_err = |e: std::io::Error| UpdateError::backup("list", format!("{}: {e}", self.dir.display()));
        let mut entries = fs::read_dir(&self.dir).await.map_err(read_err)?;
        let mut backups = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((created_at, source_version)) = parse_backup_name(&name) else {
                continue;
            };
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_file() {
                backups.push(Backup {
                    path: entry.path(),
                    created_at,
                    source_version,
                    size_bytes: metadata.len(),
                });
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// The newest backup.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NotFound`] when the store is empty.
    pub async fn latest(&self) -> Result<Backup, UpdateError> {
        self.list().await?.into_iter().next().ok_or_else(|| UpdateError::not_found("backup"))
    }

    /// Whether `backup` still exists as a non-empty file.
    pub async fn verify(&self, backup: &Backup) -> bool {
        match fs::metadata(&backup.path).await {
            Ok(m) => m.is_file() && m.len() > 0,
            Err(_) => false,
        }
    }

    /// Deletes all but the newest `keep` backups. Returns how many were
    /// deleted.
    ///
    /// Nothing is deleted unless the newest backup verifies, and at least
    /// one backup is always kept.
    pub async fn prune(&self, keep: usize) -> Result<usize, UpdateError> {
        let backups = self.list().await?;
        let Some(newest) = backups.first() else {
            return Ok(0);
        };
        if !self.verify(newest).await {
            return Err(UpdateError::backup(
                "prune",
                format!("newest backup {} failed verification", newest.path.display()),
            ));
        }

        let mut removed = 0;
        for old in backups.iter().skip(keep.max(1)) {
            match fs::remove_file(&old.path).await {
                Ok(()) => {
                    debug!("Pruned backup {}", old.path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to prune backup {}: {e}", old.path.display()),
            }
        }

        if removed > 0 {
            info!("Pruned {removed} old backup(s), {} kept", backups.len() - removed);
        }
        Ok(removed)
    }

    async fn next_backup_path(&self, artifact: &Path, version: &Version) -> (DateTime<Utc>, PathBuf) {
        let extension = artifact
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        // Timestamps order the store, so no two backups may share one.
        let taken = self.list().await.unwrap_or_default();
        loop {
            let now = Utc::now();
            let now = now.with_nanosecond(now.nanosecond() / 1_000 * 1_000).unwrap_or(now);
            if taken.iter().all(|b| b.created_at != now) {
                return (now, self.dir.join(backup_file_name(now, version, &extension)));
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

fn backup_file_name(created_at: DateTime<Utc>, version: &Version, extension: &str) -> String {
    format!(
        "{BACKUP_PREFIX}{}_v{version}{extension}",
        created_at.format(crate::constants::BACKUP_TIMESTAMP_FORMAT)
    )
}

/// Recovers `(created_at, version)` from a backup file name.
fn parse_backup_name(name: &str) -> Option<(DateTime<Utc>, Version)> {
    let rest = name.strip_prefix(BACKUP_PREFIX)?;
    // YYYYmmdd_HHMMSS_ffffff
    let (stamp, rest) = (rest.get(..22)?, rest.get(22..)?);
    let version_text = rest.strip_prefix("_v")?;

    let seconds = NaiveDateTime::parse_from_str(stamp.get(..15)?, "%Y%m%d_%H%M%S").ok()?;
    let micros: u32 = stamp.get(16..)?.parse().ok()?;
    let created_at = seconds.with_nanosecond(micros.checked_mul(1_000)?)?.and_utc();

    // Names always carry MAJOR.MINOR.PATCH; anything after is the extension.
    let mut parts = version_text.splitn(4, '.');
    let (major, minor, patch) = (parts.next()?, parts.next()?, parts.next()?);
    let version = Version::parse(&format!("{major}.{minor}.{patch}")).ok()?;

    Some((created_at, version))
}

async fn copy_flushed(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to).await?;

    #[cfg(unix)]
    {
        let permissions = fs::metadata(from).await?.permissions();
        fs::set_permissions(to, permissions).await?;
    }

    fs::OpenOptions::new().write(true).open(to).await?.sync_all().await
}

async fn attempt_restore(backup: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let staged = temp_sibling(target, "restore");
    if let Err(e) = copy_flushed(backup, &staged).await {
        remove_quietly(&staged).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&staged, target).await {
        remove_quietly(&staged).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}
