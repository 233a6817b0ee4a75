use crate::support::{files_in, serve_release};
use mockito::Server;
use pdfren_updater::core::{RestoreStatus, UpdateError};
use pdfren_updater::test_utils::{
    FailingSwapper, RecordingRestarter, fake_executable, init_test_logging, release_json,
    settings_for_server, stage_download,
};
use pdfren_updater::upgrade::install::{DirectRename, SwapContext, Swapper};
use pdfren_updater::upgrade::{
    InstallExecutor, InstallState, Outcome, Phase, SwapOutcome, UpdatePipeline, UpdateSettings,
};
use pdfren_updater::version::Version;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn install_original(settings: &UpdateSettings, bytes: &[u8]) {
    std::fs::create_dir_all(settings.install_path.parent().unwrap()).unwrap();
    std::fs::write(&settings.install_path, bytes).unwrap();
}

fn pipeline_with(
    settings: UpdateSettings,
    swapper: Arc<dyn Swapper>,
    restarter: Arc<RecordingRestarter>,
) -> UpdatePipeline {
    let executor = InstallExecutor::new(&settings).with_swapper(swapper).with_restarter(restarter);
    UpdatePipeline::with_executor(settings, executor).unwrap()
}

/// Sleeps before renaming so an install stays in flight for a while.
struct SlowSwapper;

impl Swapper for SlowSwapper {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn swap(&self, staged: &Path, target: &Path, ctx: &SwapContext) -> Result<SwapOutcome, UpdateError> {
        std::thread::sleep(Duration::from_millis(200));
        DirectRename.swap(staged, target, ctx)
    }
}

#[tokio::test]
async fn test_check_reports_newer_release() {
    init_test_logging(None);
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("v1.3.0", &[("tool", "https://example.com/tool", 10)]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let check = pipeline.check_for_updates(false).await;
    assert!(check.has_update);
    assert_eq!(check.remote_version, Some(Version::new(1, 3, 0)));
    assert_eq!(check.local_version, Version::new(1, 2, 0));
    assert!(check.error.is_none());
    assert_eq!(pipeline.session().phase, Phase::UpdateAvailable);
}

#[tokio::test]
async fn test_check_same_version_is_not_an_update() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("v2.0.0", &[("tool", "https://example.com/tool", 10)]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "2.0.0")).unwrap();

    let check = pipeline.check_for_updates(false).await;
    assert!(!check.has_update);
    assert_eq!(check.remote_version, Some(Version::new(2, 0, 0)));
    assert!(check.error.is_none());
    let session = pipeline.session();
    assert_eq!(session.phase, Phase::Idle);
    assert_eq!(session.remote_version, Some(Version::new(2, 0, 0)));
}

#[tokio::test]
async fn test_unforced_checks_within_interval_hit_registry_once() {
    let mut server = Server::new_async().await;
    let latest = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("v1.3.0", &[("tool", "https://example.com/tool", 10)]))
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let settings = settings_for_server(&server.url(), temp.path(), "1.2.0");
    let pipeline = UpdatePipeline::new(settings.clone()).unwrap();

    let first = pipeline.check_for_updates(false).await;
    let second = pipeline.check_for_updates(false).await;
    assert_eq!(first.has_update, second.has_update);
    assert_eq!(first.remote_version, second.remote_version);
    assert_eq!(first.local_version, second.local_version);

    // A new pipeline sees the persisted timestamp and stays offline too.
    let restarted = UpdatePipeline::new(settings).unwrap();
    let third = restarted.check_for_updates(false).await;
    assert!(!third.has_update);
    assert!(third.error.is_none());

    latest.assert_async().await;
}

#[tokio::test]
async fn test_forced_check_ignores_interval() {
    let mut server = Server::new_async().await;
    let latest = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("v1.3.0", &[("tool", "https://example.com/tool", 10)]))
        .expect(2)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let settings = settings_for_server(&server.url(), temp.path(), "1.2.0");

    let pipeline = UpdatePipeline::new(settings).unwrap();
    pipeline.check_for_updates(false).await;
    let forced = pipeline.check_for_updates(true).await;
    assert!(forced.has_update);

    latest.assert_async().await;
}

#[tokio::test]
async fn test_download_checksum_mismatch_leaves_nothing_staged() {
    let mut server = Server::new_async().await;
    let body = fake_executable(b"new build");
    let tool_url = format!("{}/dl/tool", server.url());
    let sums_url = format!("{}/dl/tool.sha256", server.url());
    let _release = server
        .mock("GET", "/repos/owner/repo/releases/tags/v1.3.0")
        .with_status(200)
        .with_body(release_json(
            "v1.3.0",
            &[("tool", &tool_url, body.len() as u64), ("tool.sha256", &sums_url, 72)],
        ))
        .create_async()
        .await;
    let _sums = server
        .mock("GET", "/dl/tool.sha256")
        .with_status(200)
        .with_body(format!("{}  tool\n", "0".repeat(64)))
        .create_async()
        .await;
    let _file = server.mock("GET", "/dl/tool").with_status(200).with_body(&body).create_async().await;

    let temp = TempDir::new().unwrap();
    let settings = settings_for_server(&server.url(), temp.path(), "1.2.0");
    let staging = settings.staging_dir.clone();
    let pipeline = UpdatePipeline::new(settings).unwrap();

    let err = pipeline.download_update(Some(&Version::new(1, 3, 0)), None).await.unwrap_err();
    assert!(matches!(err, UpdateError::Integrity { .. }), "got {err:?}");
    assert!(files_in(&staging).is_empty(), "staging holds {:?}", files_in(&staging));
    assert_eq!(pipeline.session().phase, Phase::Failed);
}

#[tokio::test]
async fn test_download_reports_progress() {
    let mut server = Server::new_async().await;
    let body = fake_executable(&vec![7u8; 64 * 1024]);
    let _mocks = serve_release(&mut server, "v1.3.0", &body).await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let last = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&last);
    let progress = move |received: u64, _total: u64| seen.store(received, Ordering::SeqCst);

    let download = pipeline.download_update(Some(&Version::new(1, 3, 0)), Some(&progress)).await.unwrap();
    assert_eq!(download.size_bytes, body.len() as u64);
    assert_eq!(last.load(Ordering::SeqCst), body.len() as u64);
    assert_eq!(std::fs::read(&download.local_path).unwrap(), body);
    assert!(download.local_path.to_string_lossy().ends_with(".download"));
}

#[tokio::test]
async fn test_full_update_replaces_install_and_restarts() {
    let mut server = Server::new_async().await;
    let body = fake_executable(b"version 1.3.0");
    let _mocks = serve_release(&mut server, "v1.3.0", &body).await;

    let temp = TempDir::new().unwrap();
    let mut settings = settings_for_server(&server.url(), temp.path(), "1.2.0");
    settings.auto_restart = true;
    install_original(&settings, &fake_executable(b"version 1.2.0"));
    let install_path = settings.install_path.clone();
    let marker = settings.marker_path.clone();
    let restarter = Arc::new(RecordingRestarter::default());
    let pipeline = pipeline_with(settings, Arc::new(DirectRename), Arc::clone(&restarter));

    let check = pipeline.check_for_updates(true).await;
    assert!(check.has_update);
    let download = pipeline.download_update(check.remote_version.as_ref(), None).await.unwrap();
    let report = pipeline.install_update(download).await.unwrap();

    assert_eq!(report.version, Version::new(1, 3, 0));
    assert_eq!(report.outcome, SwapOutcome::Replaced);
    assert!(report.restarted);
    assert_eq!(report.backup.source_version, Version::new(1, 2, 0));
    assert_eq!(std::fs::read(&install_path).unwrap(), body);
    assert_eq!(std::fs::read_to_string(marker).unwrap().trim(), "1.3.0");
    assert_eq!(restarter.restarts(), vec![Version::new(1, 3, 0)]);

    let session = pipeline.session();
    assert_eq!(session.local_version, Version::new(1, 3, 0));
    assert_eq!(session.install_state, InstallState::Installed);
    assert_eq!(session.phase, Phase::Restarting);
}

#[tokio::test]
async fn test_failed_swap_restores_original_bytes() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.2.0");
    let original = fake_executable(b"version 1.2.0");
    install_original(&settings, &original);
    let install_path = settings.install_path.clone();
    let restarter = Arc::new(RecordingRestarter::default());
    let pipeline = pipeline_with(settings, Arc::new(FailingSwapper), Arc::clone(&restarter));

    let download = stage_download(temp.path(), &fake_executable(b"version 1.3.0"), Version::new(1, 3, 0));
    let err = pipeline.install_update(download).await.unwrap_err();

    assert!(
        matches!(&err, UpdateError::Install { restore: RestoreStatus::Restored, reason } if reason.contains("No space left")),
        "got {err:?}"
    );
    assert_eq!(std::fs::read(&install_path).unwrap(), original);
    assert!(restarter.restarts().is_empty());

    let status = pipeline.status();
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.install_state, InstallState::RolledBack);
    assert_eq!(status.local_version, Version::new(1, 2, 0));
    let message = status.last_error.unwrap();
    assert!(message.contains("previous version was restored"), "{message}");
    assert!(message.contains("No space left"), "{message}");
    assert!(Outcome::failure(&err).message.contains("No space left"));
}

#[tokio::test]
async fn test_retention_keeps_newest_backups() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.0.0");
    install_original(&settings, &fake_executable(b"1.0.0"));
    let backup_dir = settings.backup_dir.clone();
    let pipeline = pipeline_with(settings, Arc::new(DirectRename), Arc::new(RecordingRestarter::default()));

    for minor in 1..=5 {
        let version = Version::new(1, minor, 0);
        let download = stage_download(temp.path(), &fake_executable(version.to_string().as_bytes()), version);
        pipeline.install_update(download).await.unwrap();
    }

    let backups = pipeline.backups().list().await.unwrap();
    let versions: Vec<String> = backups.iter().map(|b| b.source_version.to_string()).collect();
    assert_eq!(versions, vec!["1.4.0", "1.3.0", "1.2.0"]);
    assert_eq!(files_in(&backup_dir).len(), 3);
    assert_eq!(pipeline.session().local_version, Version::new(1, 5, 0));
}

#[tokio::test]
async fn test_concurrent_install_is_rejected() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.0.0");
    install_original(&settings, &fake_executable(b"1.0.0"));
    let pipeline = pipeline_with(settings, Arc::new(SlowSwapper), Arc::new(RecordingRestarter::default()));

    let first = stage_download(temp.path(), &fake_executable(b"1.1.0"), Version::new(1, 1, 0));
    let second = stage_download(temp.path(), &fake_executable(b"1.2.0"), Version::new(1, 2, 0));

    let (a, b) = tokio::join!(pipeline.install_update(first), pipeline.install_update(second));
    assert_eq!(a.unwrap().version, Version::new(1, 1, 0));
    assert!(matches!(b, Err(UpdateError::SessionBusy)));

    // The session is free again once the first install finished.
    assert!(!pipeline.status().busy);
    assert!(matches!(pipeline.rollback().await, Ok(_)));
}

#[tokio::test]
async fn test_download_during_install_is_rejected() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.0.0");
    install_original(&settings, &fake_executable(b"1.0.0"));
    let pipeline = pipeline_with(settings, Arc::new(SlowSwapper), Arc::new(RecordingRestarter::default()));

    let download = stage_download(temp.path(), &fake_executable(b"1.1.0"), Version::new(1, 1, 0));
    let installing = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.install_update(download).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !pipeline.status().busy {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = pipeline.download_update(Some(&Version::new(1, 1, 0)), None).await.unwrap_err();
    assert!(matches!(err, UpdateError::SessionBusy));

    installing.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rollback_restores_previous_version() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.2.0");
    let original = fake_executable(b"version 1.2.0");
    install_original(&settings, &original);
    let install_path = settings.install_path.clone();
    let marker = settings.marker_path.clone();
    let pipeline = pipeline_with(settings, Arc::new(DirectRename), Arc::new(RecordingRestarter::default()));

    let download = stage_download(temp.path(), &fake_executable(b"version 1.3.0"), Version::new(1, 3, 0));
    pipeline.install_update(download).await.unwrap();
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "1.3.0");

    let backup = pipeline.rollback().await.unwrap();
    assert_eq!(backup.source_version, Version::new(1, 2, 0));
    assert_eq!(std::fs::read(&install_path).unwrap(), original);
    assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "1.2.0");

    let session = pipeline.session();
    assert_eq!(session.local_version, Version::new(1, 2, 0));
    assert_eq!(session.install_state, InstallState::RolledBack);
}

#[tokio::test]
async fn test_rollback_without_backups_is_not_found() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.2.0");
    let pipeline = UpdatePipeline::new(settings).unwrap();

    let err = pipeline.rollback().await.unwrap_err();
    assert!(matches!(err, UpdateError::NotFound { .. }));
    assert_eq!(pipeline.session().phase, Phase::Failed);
}

#[tokio::test]
async fn test_invalid_settings_are_rejected() {
    let temp = TempDir::new().unwrap();
    let mut settings = settings_for_server("https://example.invalid", temp.path(), "1.2.0");
    settings.max_backups = 0;
    settings.owner = String::new();

    let err = UpdatePipeline::new(settings).err().unwrap();
    let UpdateError::Config { reason } = err else {
        panic!("expected a config error");
    };
    assert!(reason.contains("max_backups"));
    assert!(reason.contains("owner"));
}

#[tokio::test]
async fn test_marker_synced_at_startup() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.2");
    let marker = settings.marker_path.clone();

    let _pipeline = UpdatePipeline::new(settings).unwrap();
    assert_eq!(std::fs::read_to_string(marker).unwrap(), "1.2.0\n");
}

#[tokio::test]
async fn test_validation_failure_never_touches_install_path() {
    let temp = TempDir::new().unwrap();
    let settings = settings_for_server("https://example.invalid", temp.path(), "1.2.0");
    let original = fake_executable(b"version 1.2.0");
    install_original(&settings, &original);
    let install_path = settings.install_path.clone();

    let swaps = Arc::new(Mutex::new(0usize));
    struct CountingSwapper(Arc<Mutex<usize>>);
    impl Swapper for CountingSwapper {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn swap(&self, staged: &Path, target: &Path, ctx: &SwapContext) -> Result<SwapOutcome, UpdateError> {
            *self.0.lock().unwrap() += 1;
            DirectRename.swap(staged, target, ctx)
        }
    }
    let pipeline = pipeline_with(
        settings,
        Arc::new(CountingSwapper(Arc::clone(&swaps))),
        Arc::new(RecordingRestarter::default()),
    );

    let mut download = stage_download(temp.path(), &fake_executable(b"version 1.3.0"), Version::new(1, 3, 0));
    download.checksum = "0".repeat(64);
    let err = pipeline.install_update(download).await.unwrap_err();

    assert!(matches!(err, UpdateError::Install { restore: RestoreStatus::NotNeeded, .. }));
    assert_eq!(*swaps.lock().unwrap(), 0);
    assert_eq!(std::fs::read(install_path).unwrap(), original);
}
