//! Shared fixtures for the integration suite.

use mockito::{Mock, ServerGuard};
use pdfren_updater::test_utils::release_json;

/// Serves `tag` as the latest release with one `tool` asset of `body`.
///
/// Registers `/releases/latest`, `/releases/tags/<tag>` and the asset URL.
pub async fn serve_release(server: &mut ServerGuard, tag: &str, body: &[u8]) -> Vec<Mock> {
    let url = format!("{}/dl/{tag}/tool", server.url());
    let json = release_json(tag, &[("tool", &url, body.len() as u64)]);

    let latest = server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(&json)
        .create_async()
        .await;
    let by_tag = server
        .mock("GET", format!("/repos/owner/repo/releases/tags/{tag}").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(&json)
        .create_async()
        .await;
    let asset = server
        .mock("GET", format!("/dl/{tag}/tool").as_str())
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    vec![latest, by_tag, asset]
}

/// Files currently in `dir`, or none if it does not exist.
pub fn files_in(dir: &std::path::Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
