use assert_cmd::Command;
use mockito::{Server, ServerGuard};
use pdfren_updater::test_utils::{fake_executable, release_json};
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A settings file whose every path lives under a temp dir.
struct CliEnv {
    temp: TempDir,
    config: PathBuf,
    install_path: PathBuf,
}

impl CliEnv {
    fn new(api_base: &str, current_version: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let install_path = temp.path().join("app").join("tool");
        let state = temp.path().join("state");
        let config = temp.path().join("settings.toml");

        let toml = format!(
            r#"current_version = "{current_version}"
owner = "owner"
repo = "repo"
api_base = "{api_base}"
app_name = "tool"
max_retries = 1
install_path = "{}"
backup_dir = "{}"
staging_dir = "{}"
marker_path = "{}"
check_state_path = "{}"
"#,
            slash(&install_path),
            slash(&state.join("backup")),
            slash(&state.join("downloads")),
            slash(&state.join("version.txt")),
            slash(&state.join("update_check.json")),
        );
        std::fs::write(&config, toml).unwrap();

        Self {
            temp,
            config,
            install_path,
        }
    }

    fn install(&self, bytes: &[u8]) {
        std::fs::create_dir_all(self.install_path.parent().unwrap()).unwrap();
        std::fs::write(&self.install_path, bytes).unwrap();
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("pdfren-update").unwrap();
        cmd.arg("--config")
            .arg(&self.config)
            .arg("--no-progress")
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .env_remove("GITHUB_TOKEN")
            .env_remove("PDFREN_GITHUB_TOKEN")
            .current_dir(self.temp.path());
        cmd
    }
}

fn slash(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

fn serve_latest(server: &mut ServerGuard, tag: &str, body: &[u8]) {
    let url = format!("{}/dl/tool", server.url());
    let json = release_json(tag, &[("tool", &url, body.len() as u64)]);
    server
        .mock("GET", "/repos/owner/repo/releases/latest")
        .with_status(200)
        .with_body(&json)
        .create();
    server
        .mock("GET", format!("/repos/owner/repo/releases/tags/{tag}").as_str())
        .with_status(200)
        .with_body(&json)
        .create();
    server.mock("GET", "/dl/tool").with_status(200).with_body(body).create();
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("pdfren-update")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("backups"));
}

#[test]
fn test_check_reports_available_update() {
    let mut server = Server::new();
    serve_latest(&mut server, "v1.3.0", &fake_executable(b"1.3.0"));
    let env = CliEnv::new(&server.url(), "1.2.0");

    env.command()
        .args(["check", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available: 1.2.0 -> 1.3.0"));
}

#[test]
fn test_check_up_to_date() {
    let mut server = Server::new();
    serve_latest(&mut server, "v1.3.0", &fake_executable(b"1.3.0"));
    let env = CliEnv::new(&server.url(), "1.3.0");

    env.command()
        .args(["check", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("latest version (1.3.0)"));
}

// Windows swaps through a deferred helper script instead.
#[cfg(not(windows))]
#[test]
fn test_upgrade_installs_and_records_version() {
    let mut server = Server::new();
    let new_build = fake_executable(b"build 1.3.0");
    serve_latest(&mut server, "v1.3.0", &new_build);
    let env = CliEnv::new(&server.url(), "1.2.0");
    env.install(&fake_executable(b"build 1.2.0"));

    env.command()
        .args(["upgrade", "--no-restart"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded to version 1.3.0"));

    assert_eq!(std::fs::read(&env.install_path).unwrap(), new_build);
    let settings = std::fs::read_to_string(&env.config).unwrap();
    assert!(settings.contains("current_version = \"1.3.0\""));

    env.command()
        .arg("backups")
        .assert()
        .success()
        .stdout(predicate::str::contains("1.2.0"));

    env.command()
        .arg("rollback")
        .assert()
        .success()
        .stdout(predicate::str::contains("Rolled back to version 1.2.0"));
    assert_eq!(std::fs::read(&env.install_path).unwrap(), fake_executable(b"build 1.2.0"));
}

#[test]
fn test_download_stages_without_installing() {
    let mut server = Server::new();
    serve_latest(&mut server, "v1.3.0", &fake_executable(b"build 1.3.0"));
    let env = CliEnv::new(&server.url(), "1.2.0");
    env.install(&fake_executable(b"build 1.2.0"));

    env.command()
        .args(["download", "1.3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Downloaded version 1.3.0"))
        .stdout(predicate::str::contains(".download"));

    assert_eq!(std::fs::read(&env.install_path).unwrap(), fake_executable(b"build 1.2.0"));
}

#[test]
fn test_rollback_without_backup_fails() {
    let env = CliEnv::new("https://example.invalid", "1.2.0");

    env.command()
        .arg("rollback")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No backup was found"));
}

#[test]
fn test_status_shows_installed_version() {
    let env = CliEnv::new("https://example.invalid", "1.2.0");

    env.command()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed version:"))
        .stdout(predicate::str::contains("1.2.0"))
        .stdout(predicate::str::contains("never"));

    env.command()
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"local_version\": \"1.2.0\""));
}

#[test]
fn test_invalid_settings_are_rejected() {
    let env = CliEnv::new("http://example.com", "1.2.0");

    env.command()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must use https"));
}

#[test]
fn test_invalid_version_argument() {
    let env = CliEnv::new("https://example.invalid", "1.2.0");

    env.command()
        .args(["download", "latest-please"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid version"));
}
