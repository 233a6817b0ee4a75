use mockito::{Matcher, Server};
use pdfren_updater::core::{UpdateError, user_friendly_error};
use pdfren_updater::test_utils::{release_json, settings_for_server};
use pdfren_updater::upgrade::{Phase, UpdatePipeline};
use pdfren_updater::version::Version;
use tempfile::TempDir;

#[tokio::test]
async fn test_rate_limit_is_reported_in_plain_language() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_body(r#"{"message":"API rate limit exceeded"}"#)
        .expect(1)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let mut settings = settings_for_server(&server.url(), temp.path(), "1.2.0");
    settings.max_retries = 3;
    let pipeline = UpdatePipeline::new(settings).unwrap();

    let check = pipeline.check_for_updates(true).await;
    let error = check.error.expect("check should fail");
    assert!(matches!(error, UpdateError::Registry { status: Some(403), .. }));
    assert!(error.user_message().contains("rate limiting"));

    let ctx = user_friendly_error(error.into());
    assert!(ctx.suggestion.unwrap().contains("GITHUB_TOKEN"));
}

#[tokio::test]
async fn test_missing_repository_is_not_found_message() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(404)
        .with_body(r#"{"message":"Not Found"}"#)
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let check = pipeline.check_for_updates(true).await;
    assert!(!check.has_update);
    let outcome = check.to_outcome();
    assert!(!outcome.success);
    assert!(outcome.message.contains("does not exist"));
    assert_eq!(pipeline.session().phase, Phase::Idle);
}

#[tokio::test]
async fn test_token_is_sent_as_bearer() {
    let mut server = Server::new_async().await;
    let latest = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .match_header("authorization", "Bearer ghp_test")
        .match_header("accept", "application/vnd.github.v3+json")
        .match_header("user-agent", Matcher::Regex("^PDF-Rename-Tool-Updater/".into()))
        .with_status(200)
        .with_body(release_json("v1.2.0", &[]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let mut settings = settings_for_server(&server.url(), temp.path(), "1.2.0");
    settings.auth_token = Some("ghp_test".into());
    let pipeline = UpdatePipeline::new(settings).unwrap();

    let check = pipeline.check_for_updates(true).await;
    assert!(check.error.is_none());
    latest.assert_async().await;
}

#[tokio::test]
async fn test_release_without_assets_cannot_be_downloaded() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/tags/v1.3.0")
        .with_status(200)
        .with_body(release_json("v1.3.0", &[]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let err = pipeline.download_update(Some(&Version::new(1, 3, 0)), None).await.unwrap_err();
    assert!(matches!(err, UpdateError::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_unparseable_remote_tag_is_version_error() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("nightly", &[]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let check = pipeline.check_for_updates(true).await;
    assert!(!check.has_update);
    assert!(matches!(check.error, Some(UpdateError::VersionParse { .. })));
}

#[tokio::test]
async fn test_check_connection_describes_release() {
    let mut server = Server::new_async().await;
    let _m = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(release_json("v1.3.0", &[("tool", "https://example.com/tool", 3)]))
        .create_async()
        .await;

    let temp = TempDir::new().unwrap();
    let pipeline = UpdatePipeline::new(settings_for_server(&server.url(), temp.path(), "1.2.0")).unwrap();

    let line = pipeline.releases().check_connection().await.unwrap();
    assert!(line.contains("owner/repo"));
    assert!(line.contains("v1.3.0"));
    assert!(line.contains("asset tool"));
}
