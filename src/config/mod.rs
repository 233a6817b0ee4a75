//! Settings file for the update host.
//!
//! The update engine takes a plain [`UpdateSettings`] value. This module is
//! the outer layer that builds one: it reads a TOML file, expands paths,
//! resolves relative paths, and pulls the registry token from the
//! environment.
//!
//! # Location
//!
//! In order of precedence:
//!
//! 1. `--config <path>` on the command line
//! 2. `PDFREN_UPDATE_CONFIG` environment variable
//! 3. `<config dir>/pdfren-updater/settings.toml`
//!
//! A missing file is not an error; every setting has a default.
//!
//! # Path resolution
//!
//! `~` and `$VARS` are expanded in every path. A relative `install_path` is
//! taken relative to the directory holding this executable; the other
//! relative paths are taken relative to the per-user data directory.
//!
//! # Installed version
//!
//! When the version marker exists it wins over `current_version`: installs,
//! deferred-swap helpers and rollbacks all rewrite the marker, even when
//! the process exits before the file could be updated.
//!
//! # Tokens
//!
//! `PDFREN_GITHUB_TOKEN` (or else `GITHUB_TOKEN`) supplies the registry
//! token. Tokens are never written back to the file.

use crate::upgrade::UpdateSettings;
use crate::upgrade::marker::VersionMarker;
use crate::utils::platform::{get_config_dir, get_data_dir, resolve_path};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the settings file location.
pub const CONFIG_PATH_ENV: &str = "PDFREN_UPDATE_CONFIG";

/// Environment variables consulted for the registry token, in order.
pub const TOKEN_ENV_VARS: [&str; 2] = ["PDFREN_GITHUB_TOKEN", "GITHUB_TOKEN"];

const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Directories relative paths in the settings file are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDirs {
    /// Base for a relative `install_path`
    pub exe_dir: PathBuf,
    /// Base for relative state paths
    pub data_dir: PathBuf,
}

impl HostDirs {
    /// The running executable's directory and the per-user data directory.
    pub fn detect() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        let exe_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .context("Executable path has no parent directory")?;
        Ok(Self {
            exe_dir,
            data_dir: get_data_dir()?,
        })
    }
}

/// A TOML settings file on disk.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    /// The settings file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
        }
    }

    /// Picks the file from an explicit path, the environment, or the
    /// platform default.
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::at(path));
        }
        Self::default_path().map(Self::at)
    }

    /// Default location, honouring `PDFREN_UPDATE_CONFIG`.
    pub fn default_path() -> Result<PathBuf> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => resolve_path(path.trim()),
            _ => Ok(get_config_dir()?.join(SETTINGS_FILE_NAME)),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file (or defaults when absent) and resolves it for `dirs`.
    ///
    /// The result is not validated; [`UpdateSettings::validate`] runs when
    /// the pipeline is built.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if a path contains an undefined variable.
    pub async fn load(&self, dirs: &HostDirs) -> Result<UpdateSettings> {
        let raw = if self.path.exists() {
            let content = fs::read_to_string(&self.path)
                .await
                .with_context(|| format!("Failed to read settings file: {}", self.path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))?
        } else {
            debug!("No settings file at {}, using defaults", self.path.display());
            UpdateSettings::default()
        };

        let mut settings = resolve_paths(raw, dirs)?;
        if let Some(installed) = VersionMarker::new(&settings.marker_path).read() {
            settings.current_version = installed.to_string();
        }
        apply_env_token(&mut settings);
        Ok(settings)
    }

    /// Writes `settings` as TOML, owner-readable only on Unix.
    pub async fn save(&self, settings: &UpdateSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(settings).context("Failed to serialize settings")?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to set permissions on {}", self.path.display()))?;
        }

        debug!("Saved settings to {}", self.path.display());
        Ok(())
    }

    /// Records a new installed version in the file, keeping everything else.
    pub async fn record_version(&self, version: &crate::version::Version) -> Result<()> {
        let mut settings = if self.path.exists() {
            let content = fs::read_to_string(&self.path)
                .await
                .with_context(|| format!("Failed to read settings file: {}", self.path.display()))?;
            toml::from_str::<UpdateSettings>(&content)
                .with_context(|| format!("Failed to parse settings file: {}", self.path.display()))?
        } else {
            UpdateSettings::default()
        };
        settings.current_version = version.to_string();
        self.save(&settings).await
    }
}

fn resolve_paths(mut settings: UpdateSettings, dirs: &HostDirs) -> Result<UpdateSettings> {
    settings.install_path = anchor(&settings.install_path, &dirs.exe_dir)?;
    settings.backup_dir = anchor(&settings.backup_dir, &dirs.data_dir)?;
    settings.staging_dir = anchor(&settings.staging_dir, &dirs.data_dir)?;
    settings.marker_path = anchor(&settings.marker_path, &dirs.data_dir)?;
    settings.check_state_path = Some(match &settings.check_state_path {
        Some(path) => anchor(path, &dirs.data_dir)?,
        None => dirs.data_dir.join("update_check.json"),
    });
    Ok(settings)
}

fn anchor(path: &Path, base: &Path) -> Result<PathBuf> {
    let expanded = resolve_path(&path.to_string_lossy())?;
    Ok(if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    })
}

/// Fills `auth_token` from the environment when a token variable is set.
pub fn apply_env_token(settings: &mut UpdateSettings) {
    let token = TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty());
    if let Some(token) = token {
        settings.auth_token = Some(token);
    }
}
