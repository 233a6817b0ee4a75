use crate::constants::{DEFAULT_API_BASE, REGISTRY_REQUEST_TIMEOUT};
use crate::core::UpdateError;
use crate::version::Version;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Plain settings object consumed by the update engine.
///
/// The engine never reads the environment or a settings file itself. The
/// host builds an `UpdateSettings` (usually through
/// [`crate::config::SettingsFile`]) and hands it to
/// [`crate::upgrade::UpdatePipeline::new`], which makes every session
/// deterministic for a given value.
///
/// # TOML Example
/// ```toml
/// current_version = "4.0.2"
/// owner = "chen-huai"
/// repo = "Temu_PDF_Rename_APP"
/// app_name = "PDF_Rename_Operation"
/// check_interval_secs = 2592000
/// max_backups = 3
/// install_path = "C:/Tools/PDF_Rename_Operation.exe"
/// backup_dir = "C:/Tools/backup"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateSettings {
    /// Version of the installed application, `MAJOR.MINOR[.PATCH]`.
    pub current_version: String,

    /// Release registry owner.
    pub owner: String,

    /// Release registry repository.
    pub repo: String,

    /// Registry API base, e.g. `https://api.github.com`.
    pub api_base: String,

    /// Application identifier matched against release asset names.
    pub app_name: String,

    /// Minimum spacing between two unforced update checks, in seconds.
    pub check_interval_secs: u64,

    /// Overall timeout for one artifact transfer, in seconds.
    pub download_timeout_secs: u64,

    /// Timeout for one registry round trip, in seconds.
    pub request_timeout_secs: u64,

    /// Number of backups kept after a successful install.
    pub max_backups: usize,

    /// Retry bound for transient network failures.
    pub max_retries: u32,

    /// Registry token sent as `Authorization: Bearer`. Never written back
    /// to disk.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,

    /// The installed artifact that updates replace.
    pub install_path: PathBuf,

    /// Directory holding backups of previous installs.
    pub backup_dir: PathBuf,

    /// Directory receiving downloads before they are installed.
    pub staging_dir: PathBuf,

    /// File holding the installed version string.
    pub marker_path: PathBuf,

    /// Where the last check is recorded between runs. `None` keeps the
    /// record in memory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_state_path: Option<PathBuf>,

    /// Reject staged artifacts that lack the platform executable header.
    pub validate_executable: bool,

    /// Call the restarter after a successful install.
    pub auto_restart: bool,

    /// Start the installed application again when restarting.
    pub relaunch: bool,

    /// Process a deferred swap waits for before moving the new artifact
    /// into place. `None` waits for the process running the pipeline. A
    /// separate updater process sets this to the application's PID.
    #[serde(skip)]
    pub wait_for_pid: Option<u32>,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            owner: "chen-huai".to_string(),
            repo: "Temu_PDF_Rename_APP".to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            app_name: "PDF_Rename_Operation".to_string(),
            check_interval_secs: 30 * 24 * 60 * 60,
            download_timeout_secs: 300,
            request_timeout_secs: REGISTRY_REQUEST_TIMEOUT.as_secs(),
            max_backups: 3,
            max_retries: 3,
            auth_token: None,
            install_path: PathBuf::from(format!(
                "PDF_Rename_Operation{}",
                std::env::consts::EXE_SUFFIX
            )),
            backup_dir: PathBuf::from("backup"),
            staging_dir: PathBuf::from("downloads"),
            marker_path: PathBuf::from("version.txt"),
            check_state_path: None,
            validate_executable: true,
            auto_restart: true,
            relaunch: true,
            wait_for_pid: None,
        }
    }
}

impl UpdateSettings {
    /// Settings for `install_path`, with every owned path placed under
    /// `data_dir`.
    pub fn for_install(
        current_version: impl Into<String>,
        install_path: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let data_dir = data_dir.into();
        Self {
            current_version: current_version.into(),
            install_path: install_path.into(),
            backup_dir: data_dir.join("backup"),
            staging_dir: data_dir.join("downloads"),
            marker_path: data_dir.join("version.txt"),
            check_state_path: Some(data_dir.join("update_check.json")),
            ..Self::default()
        }
    }

    /// The installed version, parsed.
    pub fn local_version(&self) -> Result<Version, UpdateError> {
        Version::parse(&self.current_version)
    }

    /// Check interval as a [`Duration`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Download timeout as a [`Duration`].
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Registry request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Checks every rule and reports all violations at once.
    ///
    /// # Errors
    ///
    /// [`UpdateError::Config`] listing each failed rule, joined with `"; "`.
    pub fn validate(&self) -> Result<(), UpdateError> {
        let mut problems = Vec::new();

        if self.owner.trim().is_empty() {
            problems.push("owner must not be empty".to_string());
        }
        if self.repo.trim().is_empty() {
            problems.push("repo must not be empty".to_string());
        }
        if self.owner.contains('/') || self.repo.contains('/') {
            problems.push("owner and repo must not contain '/'".to_string());
        }
        if let Err(reason) = check_api_base(&self.api_base) {
            problems.push(reason);
        }
        if self.app_name.trim().is_empty() {
            problems.push("app_name must not be empty".to_string());
        }
        if self.check_interval_secs < 1 {
            problems.push("check_interval_secs must be at least 1".to_string());
        }
        if self.download_timeout_secs < 10 {
            problems.push("download_timeout_secs must be at least 10".to_string());
        }
        if self.request_timeout_secs < 1 {
            problems.push("request_timeout_secs must be at least 1".to_string());
        }
        if self.max_retries > 10 {
            problems.push("max_retries must be between 0 and 10".to_string());
        }
        if !(1..=10).contains(&self.max_backups) {
            problems.push("max_backups must be between 1 and 10".to_string());
        }
        if let Err(e) = self.local_version() {
            problems.push(format!("current_version: {e}"));
        }
        if self.install_path.as_os_str().is_empty() {
            problems.push("install_path must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(UpdateError::Config {
                reason: problems.join("; "),
            })
        }
    }
}

/// `https://` anywhere, or plain `http://` to a loopback host.
fn check_api_base(api_base: &str) -> Result<(), String> {
    let url = Url::parse(api_base).map_err(|e| format!("api_base '{api_base}' is not a URL: {e}"))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" if matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")) => Ok(()),
        _ => Err(format!("api_base '{api_base}' must use https")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = UpdateSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.check_interval(), Duration::from_secs(2_592_000));
        assert_eq!(settings.download_timeout_secs, 300);
        assert_eq!(settings.max_backups, 3);
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let settings = UpdateSettings {
            owner: String::new(),
            api_base: "http://api.github.com".into(),
            check_interval_secs: 0,
            download_timeout_secs: 5,
            max_retries: 11,
            max_backups: 0,
            current_version: "four".into(),
            ..UpdateSettings::default()
        };

        let Err(UpdateError::Config { reason }) = settings.validate() else {
            panic!("expected a config error");
        };
        for needle in [
            "owner",
            "https",
            "check_interval_secs",
            "download_timeout_secs",
            "max_retries",
            "max_backups",
            "current_version",
        ] {
            assert!(reason.contains(needle), "missing '{needle}' in: {reason}");
        }
    }

    #[test]
    fn test_loopback_http_allowed() {
        let settings = UpdateSettings {
            api_base: "http://127.0.0.1:1234".into(),
            ..UpdateSettings::default()
        };
        settings.validate().unwrap();
    }

    #[test]
    fn test_token_not_serialized() {
        let settings = UpdateSettings {
            auth_token: Some("secret".into()),
            ..UpdateSettings::default()
        };
        let text = toml::to_string(&settings).unwrap();
        assert!(!text.contains("secret"));
        let back: UpdateSettings = toml::from_str(&text).unwrap();
        assert_eq!(back.auth_token, None);
        assert_eq!(back.repo, settings.repo);
    }

    #[test]
    fn test_for_install_places_state_under_data_dir() {
        let settings = UpdateSettings::for_install("1.2.0", "/opt/app/tool", "/var/lib/tool");
        assert_eq!(settings.backup_dir, PathBuf::from("/var/lib/tool/backup"));
        assert_eq!(settings.staging_dir, PathBuf::from("/var/lib/tool/downloads"));
        assert_eq!(settings.marker_path, PathBuf::from("/var/lib/tool/version.txt"));
        assert_eq!(settings.local_version().unwrap(), Version::new(1, 2, 0));
    }
}
