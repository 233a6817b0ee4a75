//! The update pipeline facade.
//!
//! [`UpdatePipeline`] is the single stateful API the host talks to. It owns
//! one [`UpdateSession`] and drives it through
//!
//! ```text
//! Idle → Checking → NoUpdate → Idle
//!                 → UpdateAvailable → Downloading → Downloaded
//!                   → BackingUp → Installing → Restarting | RollingBack → Failed
//! ```
//!
//! Downloads, installs and rollbacks hold an exclusive session guard; a
//! second one started while the first runs gets [`UpdateError::SessionBusy`].
//! An install runs on its own task, so once swapping has begun it reaches
//! `Installed` or a rolled-back `Failed` even if the caller stops waiting.

use crate::core::{RestoreStatus, UpdateError};
use crate::upgrade::backup::{Backup, BackupStore};
use crate::upgrade::check_state::{CheckRecord, CheckStateStore};
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::fetcher::{ArtifactFetcher, DownloadResult, FetchRequest, ProgressFn};
use crate::upgrade::install::{InstallExecutor, SwapOutcome};
use crate::upgrade::marker::VersionMarker;
use crate::upgrade::release::ReleaseClient;
use crate::version::{Version, VersionComparator};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Where the session is in the update sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Nothing in progress
    Idle,
    /// Querying the registry
    Checking,
    /// The installed version is current
    NoUpdate,
    /// A newer release exists
    UpdateAvailable,
    /// Transferring the artifact
    Downloading,
    /// A verified artifact is staged
    Downloaded,
    /// Snapshotting the installation
    BackingUp,
    /// Validating and swapping
    Installing,
    /// Handing over to the new version
    Restarting,
    /// Restoring the previous installation
    RollingBack,
    /// The last operation failed
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What is known about the install path after the last install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallState {
    /// Untouched by this session
    Unchanged,
    /// The new version is in place (or scheduled to be)
    Installed,
    /// A backup was restored
    RolledBack,
    /// Restoring failed; contents unknown
    Indeterminate,
}

/// Transient state of one check-to-install cycle.
#[derive(Debug, Clone)]
pub struct UpdateSession {
    /// Current phase
    pub phase: Phase,
    /// Newest version the registry reported
    pub remote_version: Option<Version>,
    /// Installed version
    pub local_version: Version,
    /// Verified download awaiting install
    pub staging_download: Option<DownloadResult>,
    /// Snapshot taken for the current install
    pub backup: Option<Backup>,
    /// Most recent failure
    pub last_error: Option<UpdateError>,
    /// State of the install path
    pub install_state: InstallState,
}

/// Answer of [`UpdatePipeline::check_for_updates`].
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// A newer release exists
    pub has_update: bool,
    /// Version the registry reported, when it was reached
    pub remote_version: Option<Version>,
    /// Installed version
    pub local_version: Version,
    /// Why the check failed, if it did
    pub error: Option<UpdateError>,
}

impl CheckOutcome {
    /// Plain-language summary for the host.
    pub fn to_outcome(&self) -> Outcome {
        match (&self.error, &self.remote_version) {
            (Some(e), _) => Outcome::failure(e),
            (None, Some(remote)) if self.has_update => Outcome {
                success: true,
                message: format!("Update available: {} -> {remote}", self.local_version),
            },
            (None, Some(_)) => Outcome {
                success: true,
                message: format!("Version {} is up to date", self.local_version),
            },
            (None, None) => Outcome {
                success: true,
                message: format!("Version {} (checked recently)", self.local_version),
            },
        }
    }
}

/// Result of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Version installed
    pub version: Version,
    /// How the swap completed
    pub outcome: SwapOutcome,
    /// Snapshot taken before the swap
    pub backup: Backup,
    /// Whether the restarter was invoked and returned cleanly
    pub restarted: bool,
}

/// Success flag plus a message the host can display as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    /// Whether the operation succeeded
    pub success: bool,
    /// Human-readable result
    pub message: String,
}

impl Outcome {
    /// A failed outcome carrying the error's plain-language message.
    pub fn failure(error: &UpdateError) -> Self {
        Self {
            success: false,
            message: error.user_message(),
        }
    }

    /// Converts a result, describing success with `describe`.
    pub fn from_result<T>(result: &Result<T, UpdateError>, describe: impl FnOnce(&T) -> String) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                message: describe(value),
            },
            Err(e) => Self::failure(e),
        }
    }
}

/// Read-only view of the pipeline for display.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Current phase
    pub phase: Phase,
    /// Installed version
    pub local_version: Version,
    /// Newest version the registry reported
    pub remote_version: Option<Version>,
    /// State of the install path
    pub install_state: InstallState,
    /// Plain-language message of the last failure
    pub last_error: Option<String>,
    /// When the registry was last checked
    pub last_check: Option<DateTime<Utc>>,
    /// Staged download awaiting install
    pub staged_download: Option<std::path::PathBuf>,
    /// Whether a download, install or rollback is running
    pub busy: bool,
}

struct CheckMemo {
    record: CheckRecord,
    outcome: Option<CheckOutcome>,
}

struct PipelineInner {
    settings: UpdateSettings,
    releases: ReleaseClient,
    fetcher: ArtifactFetcher,
    backups: BackupStore,
    executor: Arc<InstallExecutor>,
    marker: VersionMarker,
    check_state: CheckStateStore,
    session: Mutex<UpdateSession>,
    last_check: Mutex<Option<CheckMemo>>,
    busy: AtomicBool,
}

/// Releases the session when dropped.
struct SessionGuard {
    inner: Arc<PipelineInner>,
}

impl SessionGuard {
    fn acquire(inner: &Arc<PipelineInner>) -> Result<Self, UpdateError> {
        inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UpdateError::SessionBusy)?;
        Ok(Self {
            inner: Arc::clone(inner),
        })
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::Release);
    }
}

/// Orchestrates check, download, backup, install and rollback.
#[derive(Clone)]
pub struct UpdatePipeline {
    inner: Arc<PipelineInner>,
}

impl UpdatePipeline {
    /// Builds a pipeline with the platform install executor.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] for invalid settings.
    pub fn new(settings: UpdateSettings) -> Result<Self, UpdateError> {
        let executor = InstallExecutor::new(&settings);
        Self::with_executor(settings, executor)
    }

    /// Builds a pipeline around a custom install executor.
    pub fn with_executor(settings: UpdateSettings, executor: InstallExecutor) -> Result<Self, UpdateError> {
        settings.validate()?;
        let local_version = settings.local_version()?;

        let marker = VersionMarker::new(&settings.marker_path);
        if let Err(e) = marker.sync(&local_version) {
            warn!("{e:#}");
        }

        let check_state = CheckStateStore::new(settings.check_state_path.clone());
        let last_check = check_state.load().map(|record| CheckMemo {
            record,
            outcome: None,
        });

        let inner = PipelineInner {
            releases: ReleaseClient::new(&settings)?,
            fetcher: ArtifactFetcher::new(&settings)?,
            backups: BackupStore::new(&settings.backup_dir),
            executor: Arc::new(executor),
            marker,
            check_state,
            session: Mutex::new(UpdateSession {
                phase: Phase::Idle,
                remote_version: None,
                local_version,
                staging_download: None,
                backup: None,
                last_error: None,
                install_state: InstallState::Unchanged,
            }),
            last_check: Mutex::new(last_check),
            busy: AtomicBool::new(false),
            settings,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The settings this pipeline was built with.
    pub fn settings(&self) -> &UpdateSettings {
        &self.inner.settings
    }

    /// The release client, for diagnostics such as `check_connection`.
    pub fn releases(&self) -> &ReleaseClient {
        &self.inner.releases
    }

    /// The backup store.
    pub fn backups(&self) -> &BackupStore {
        &self.inner.backups
    }

    /// Asks the registry whether a newer release exists.
    ///
    /// Unless `force` is set, a check within the configured interval of the
    /// previous one does not touch the network: it repeats the previous
    /// answer, or reports no update when only a persisted timestamp is
    /// known. A forced check also skips the release client's cache.
    /// Registry failures are reported in [`CheckOutcome::error`]; the check
    /// time is recorded either way.
    pub async fn check_for_updates(&self, force: bool) -> CheckOutcome {
        let inner = &self.inner;
        let local_version = inner.session().local_version.clone();

        if !force {
            if let Some(cached) = inner.recent_check(&local_version) {
                debug!("Skipping update check, last check is within the interval");
                return cached;
            }
        }

        inner.set_phase_if_idle(Phase::Checking);
        info!("Checking {} for updates (installed {local_version})", inner.releases.repository());

        let latest = if force {
            inner.releases.get_latest_fresh().await
        } else {
            inner.releases.get_latest().await
        };
        let outcome = match latest.and_then(|r| r.version()) {
            Ok(remote) => {
                let has_update = VersionComparator::compare(&remote, &local_version).is_gt();
                if has_update {
                    info!("Update available: {local_version} -> {remote}");
                } else {
                    info!("Version {local_version} is up to date (latest {remote})");
                }
                CheckOutcome {
                    has_update,
                    remote_version: Some(remote),
                    local_version,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Update check failed: {e}");
                CheckOutcome {
                    has_update: false,
                    remote_version: None,
                    local_version,
                    error: Some(e),
                }
            }
        };

        inner.record_check(&outcome);
        outcome
    }

    /// Downloads `version` (or the newest known release) into staging.
    ///
    /// The asset is resolved with a fresh registry query, never a cached
    /// one. The install path is not touched.
    pub async fn download_update(
        &self,
        version: Option<&Version>,
        on_progress: Option<&ProgressFn>,
    ) -> Result<DownloadResult, UpdateError> {
        let _guard = SessionGuard::acquire(&self.inner)?;
        let inner = &self.inner;
        {
            let mut session = inner.session();
            session.last_error = None;
            session.install_state = InstallState::Unchanged;
        }

        let result = inner.download(version, on_progress).await;
        let mut session = inner.session();
        match &result {
            Ok(download) => {
                session.phase = Phase::Downloaded;
                session.remote_version = Some(download.version.clone());
                session.staging_download = Some(download.clone());
            }
            Err(e) => {
                session.phase = Phase::Failed;
                session.last_error = Some(e.clone());
            }
        }
        result
    }

    /// Backs up the installation, then validates and swaps in `download`.
    ///
    /// A failed snapshot aborts before anything changes. A failure once
    /// swapping has begun restores the snapshot; if that also fails the
    /// error is [`UpdateError::Rollback`] and the install state is
    /// [`InstallState::Indeterminate`]. On success the restarter is invoked
    /// when `auto_restart` is set.
    pub async fn install_update(&self, download: DownloadResult) -> Result<InstallReport, UpdateError> {
        let guard = SessionGuard::acquire(&self.inner)?;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _guard = guard;
            inner.install(download).await
        })
        .await
        .map_err(|e| UpdateError::install(format!("install task ended unexpectedly: {e}")))?
    }

    /// Restores the newest backup without downloading anything.
    pub async fn rollback(&self) -> Result<Backup, UpdateError> {
        let _guard = SessionGuard::acquire(&self.inner)?;
        let inner = &self.inner;
        inner.set_phase(Phase::RollingBack);

        let result: Result<Backup, UpdateError> = async {
            let backup = inner.backups.latest().await?;
            inner.backups.restore(&backup, &inner.settings.install_path).await?;
            Ok(backup)
        }
        .await;

        let mut session = inner.session();
        match &result {
            Ok(backup) => {
                info!("Rolled back to version {}", backup.source_version);
                if let Err(e) = inner.marker.write(&backup.source_version) {
                    warn!("{e:#}");
                }
                session.phase = Phase::Idle;
                session.local_version = backup.source_version.clone();
                session.install_state = InstallState::RolledBack;
                session.last_error = None;
            }
            Err(e) => {
                error!("Rollback failed: {e}");
                session.phase = Phase::Failed;
                session.last_error = Some(e.clone());
            }
        }
        drop(session);
        inner.forget_check_answer();
        result
    }

    /// A copy of the current session.
    pub fn session(&self) -> UpdateSession {
        self.inner.session().clone()
    }

    /// A display-ready summary of the pipeline.
    pub fn status(&self) -> StatusReport {
        let session = self.inner.session().clone();
        let last_check = self
            .inner
            .last_check
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|m| m.record.last_check);

        StatusReport {
            phase: session.phase,
            local_version: session.local_version,
            remote_version: session.remote_version,
            install_state: session.install_state,
            last_error: session.last_error.map(|e| e.user_message()),
            last_check,
            staged_download: session.staging_download.map(|d| d.local_path),
            busy: self.inner.busy.load(Ordering::Acquire),
        }
    }
}

impl PipelineInner {
    fn session(&self) -> MutexGuard<'_, UpdateSession> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        let mut session = self.session();
        debug!("Update phase {} -> {phase}", session.phase);
        session.phase = phase;
    }

    /// Checks never disturb a running download or install.
    fn set_phase_if_idle(&self, phase: Phase) {
        if !self.busy.load(Ordering::Acquire) {
            self.set_phase(phase);
        }
    }

    fn recent_check(&self, local_version: &Version) -> Option<CheckOutcome> {
        let memo = self.last_check.lock().unwrap_or_else(|p| p.into_inner());
        let memo = memo.as_ref()?;
        if !memo.record.is_fresh(self.settings.check_interval(), Utc::now()) {
            return None;
        }
        Some(memo.outcome.clone().unwrap_or_else(|| CheckOutcome {
            has_update: false,
            remote_version: None,
            local_version: local_version.clone(),
            error: None,
        }))
    }

    fn record_check(&self, outcome: &CheckOutcome) {
        let record = CheckRecord {
            last_check: Utc::now(),
            latest_version: outcome.remote_version.clone(),
            local_version: outcome.local_version.clone(),
            has_update: outcome.has_update,
        };
        if let Err(e) = self.check_state.save(&record) {
            warn!("{e:#}");
        }
        *self.last_check.lock().unwrap_or_else(|p| p.into_inner()) = Some(CheckMemo {
            record,
            outcome: Some(outcome.clone()),
        });

        if !self.busy.load(Ordering::Acquire) {
            let phase = match &outcome.error {
                Some(_) => Phase::Idle,
                None if outcome.has_update => Phase::UpdateAvailable,
                None => Phase::NoUpdate,
            };
            {
                let mut session = self.session();
                session.remote_version = outcome.remote_version.clone();
                if let Some(e) = &outcome.error {
                    session.last_error = Some(e.clone());
                }
            }
            self.set_phase(phase);
            // Nothing to do after a current check; the session is ready again.
            if phase == Phase::NoUpdate {
                self.set_phase(Phase::Idle);
            }
        }
    }

    /// The installed version changed, so a remembered answer is stale. The
    /// timestamp stays so the interval still applies.
    fn forget_check_answer(&self) {
        if let Some(memo) = self.last_check.lock().unwrap_or_else(|p| p.into_inner()).as_mut() {
            memo.outcome = None;
        }
    }

    async fn download(
        &self,
        version: Option<&Version>,
        on_progress: Option<&ProgressFn>,
    ) -> Result<DownloadResult, UpdateError> {
        self.set_phase(Phase::Downloading);

        let known = version.cloned().or_else(|| self.session().remote_version.clone());
        let version = match known {
            Some(v) => v,
            None => self.releases.get_latest_fresh().await?.version()?,
        };

        let release = self.releases.get_by_tag(&version.tag()).await?;
        let asset = self.releases.select_download_asset(&release)?;
        let expected_checksum = self.releases.expected_checksum(&release, &asset).await;
        info!("Downloading {} {} ({} bytes)", asset.name, version, asset.size);

        let request = FetchRequest {
            url: asset.download_url.clone(),
            staging_dir: self.settings.staging_dir.clone(),
            version,
            asset_name: asset.name.clone(),
            expected_size: (asset.size > 0).then_some(asset.size),
            expected_checksum,
        };
        self.fetcher.fetch(&request, on_progress).await
    }

    async fn install(&self, download: DownloadResult) -> Result<InstallReport, UpdateError> {
        let install_path = self.settings.install_path.clone();
        let local_version = {
            let mut session = self.session();
            session.last_error = None;
            session.install_state = InstallState::Unchanged;
            session.local_version.clone()
        };

        self.set_phase(Phase::BackingUp);
        let backup = match self.backups.snapshot(&install_path, &local_version).await {
            Ok(backup) => backup,
            Err(e) => return Err(self.fail(e, InstallState::Unchanged)),
        };
        self.session().backup = Some(backup.clone());

        self.set_phase(Phase::Installing);
        debug!("Installing through {} swap", self.executor.swapper_name());
        let executor = Arc::clone(&self.executor);
        let target = install_path.clone();
        let staged = download.clone();
        let swap = tokio::task::spawn_blocking(move || {
            let validated = executor.validate(&staged).map_err(|e| (e, false))?;
            executor.install(validated, &target).map_err(|e| (e, true))
        })
        .await
        .unwrap_or_else(|e| Err((UpdateError::install(format!("install worker failed: {e}")), true)));

        let installed = match swap {
            Ok(installed) => installed,
            Err((e, false)) => {
                self.fetcher.discard(&download).await;
                return Err(self.fail(e, InstallState::Unchanged));
            }
            Err((e, true)) => return Err(self.roll_back_after(e, &backup).await),
        };

        {
            let mut session = self.session();
            session.install_state = InstallState::Installed;
            session.local_version = installed.version.clone();
            session.staging_download = None;
        }
        self.forget_check_answer();

        if let Err(e) = self.backups.prune(self.settings.max_backups).await {
            warn!("Backup pruning skipped: {e}");
        }
        if let Err(e) = self.fetcher.cleanup_staging(&self.settings.staging_dir, 0).await {
            warn!("Staging cleanup skipped: {e}");
        }

        let mut report = InstallReport {
            version: installed.version.clone(),
            outcome: installed.outcome.clone(),
            backup,
            restarted: false,
        };

        if self.settings.auto_restart {
            self.set_phase(Phase::Restarting);
            match self.executor.request_restart(installed) {
                Ok(()) => report.restarted = true,
                Err(e) => {
                    error!("Update installed but restart failed: {e}");
                    self.session().last_error = Some(e);
                }
            }
        } else {
            self.set_phase(Phase::Idle);
        }

        Ok(report)
    }

    async fn roll_back_after(&self, original: UpdateError, backup: &Backup) -> UpdateError {
        error!("Install failed, rolling back: {original}");
        self.set_phase(Phase::RollingBack);

        match self.backups.restore(backup, &self.settings.install_path).await {
            Ok(()) => {
                let reason = match original {
                    UpdateError::Install { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.fail(
                    UpdateError::Install {
                        reason,
                        restore: RestoreStatus::Restored,
                    },
                    InstallState::RolledBack,
                )
            }
            Err(rollback) => {
                error!("Rollback failed, installation state is indeterminate: {rollback}");
                self.fail(
                    UpdateError::Rollback {
                        original: Box::new(original),
                        rollback: Box::new(rollback),
                    },
                    InstallState::Indeterminate,
                )
            }
        }
    }

    fn fail(&self, error: UpdateError, state: InstallState) -> UpdateError {
        let mut session = self.session();
        session.phase = Phase::Failed;
        session.install_state = state;
        session.last_error = Some(error.clone());
        error
    }
}
