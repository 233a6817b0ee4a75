//! Release registry client.
//!
//! Talks to a GitHub-compatible REST API:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | [`ReleaseClient::get_latest`] | `GET {api}/repos/{owner}/{repo}/releases/latest` |
//! | [`ReleaseClient::get_by_tag`] | `GET {api}/repos/{owner}/{repo}/releases/tags/{tag}` |
//! | [`ReleaseClient::list_releases`] | `GET {api}/repos/{owner}/{repo}/releases` |
//!
//! Every call is one round trip bounded by the request timeout. Transport
//! failures are retried with exponential backoff; an error status or a
//! malformed document fails immediately with [`UpdateError::Registry`].
//!
//! `get_latest` answers may be served from a short-lived in-memory cache.
//! Downloads always resolve their asset through [`ReleaseClient::get_by_tag`],
//! which never reads the cache, so a stale asset location is never acted on.

use crate::constants::{
    CHECKSUM_ASSET_NAMES, CHECKSUM_ASSET_SUFFIX, CONNECT_TIMEOUT, MAX_BACKOFF_DELAY_MS,
    REGISTRY_ACCEPT, RELEASE_CACHE_TTL, user_agent,
};
use crate::core::UpdateError;
use crate::upgrade::config::UpdateSettings;
use crate::upgrade::verification::parse_checksum_listing;
use crate::version::Version;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// File name, e.g. `PDF_Rename_Operation.exe`
    pub name: String,
    /// Direct download URL
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    /// Advertised size in bytes
    #[serde(default)]
    pub size: u64,
    /// Advertised MIME type
    #[serde(default, deserialize_with = "null_as_default")]
    pub content_type: String,
}

impl Asset {
    /// Whether this asset is a checksum listing rather than an artifact.
    pub fn is_checksum_file(&self) -> bool {
        CHECKSUM_ASSET_NAMES.iter().any(|n| n.eq_ignore_ascii_case(&self.name))
            || self.name.to_ascii_lowercase().ends_with(CHECKSUM_ASSET_SUFFIX)
    }
}

/// Metadata of one published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Release tag, e.g. `v1.3.0`
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Release title
    #[serde(default)]
    pub name: Option<String>,
    /// Release notes (markdown)
    #[serde(rename = "body", default, deserialize_with = "null_as_default")]
    pub notes: String,
    /// Publication time; drafts have none
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    /// Whether the release is marked as a prerelease
    #[serde(default)]
    pub prerelease: bool,
    /// Attached files, in registry order
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl ReleaseInfo {
    /// The release tag as a [`Version`].
    pub fn version(&self) -> Result<Version, UpdateError> {
        Version::parse(&self.tag)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Picks the artifact to download from a release's assets.
///
/// Preference order:
/// 1. a non-checksum asset whose name contains `app_name` (case-insensitive)
///    and ends with the platform's executable suffix
/// 2. the first non-checksum asset
/// 3. the first asset
pub fn select_asset<'a>(assets: &'a [Asset], app_name: &str) -> Option<&'a Asset> {
    let app = app_name.to_ascii_lowercase();
    let suffix = std::env::consts::EXE_SUFFIX;

    assets
        .iter()
        .find(|a| {
            let name = a.name.to_ascii_lowercase();
            !a.is_checksum_file() && name.contains(&app) && name.ends_with(suffix)
        })
        .or_else(|| assets.iter().find(|a| !a.is_checksum_file()))
        .or_else(|| assets.first())
}

struct CachedRelease {
    fetched_at: Instant,
    release: ReleaseInfo,
}

/// Client for the release registry of one repository.
pub struct ReleaseClient {
    client: reqwest::Client,
    api_base: String,
    owner: String,
    repo: String,
    app_name: String,
    token: Option<String>,
    attempts: u32,
    cache_ttl: Duration,
    cache: Mutex<Option<CachedRelease>>,
}

impl ReleaseClient {
    /// Builds a client from the update settings.
    ///
    /// A missing token is fine; unauthenticated access is the default.
    pub fn new(settings: &UpdateSettings) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(settings.request_timeout())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UpdateError::network("build HTTP client", e))?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            owner: settings.owner.clone(),
            repo: settings.repo.clone(),
            app_name: settings.app_name.clone(),
            token: settings.auth_token.clone().filter(|t| !t.trim().is_empty()),
            attempts: settings.max_retries.max(1),
            cache_ttl: RELEASE_CACHE_TTL,
            cache: Mutex::new(None),
        })
    }

    /// `owner/repo` of the repository this client queries.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Latest published release, possibly from the in-memory cache.
    pub async fn get_latest(&self) -> Result<ReleaseInfo, UpdateError> {
        if let Some(release) = self.cached_latest() {
            debug!("Serving latest release {} from cache", release.tag);
            return Ok(release);
        }
        self.get_latest_fresh().await
    }

    /// Latest published release, always from the registry.
    pub async fn get_latest_fresh(&self) -> Result<ReleaseInfo, UpdateError> {
        let release: ReleaseInfo = self.get_json("releases/latest", "fetch latest release").await?;
        info!("Latest release of {} is {}", self.repository(), release.tag);

        *self.cache.lock().unwrap_or_else(|p| p.into_inner()) = Some(CachedRelease {
            fetched_at: Instant::now(),
            release: release.clone(),
        });
        Ok(release)
    }

    /// The release published under `tag` (e.g. `v1.3.0`). Never cached.
    pub async fn get_by_tag(&self, tag: &str) -> Result<ReleaseInfo, UpdateError> {
        self.get_json(&format!("releases/tags/{tag}"), &format!("fetch release {tag}")).await
    }

    /// Every release of the repository, newest first.
    pub async fn list_releases(&self) -> Result<Vec<ReleaseInfo>, UpdateError> {
        let mut releases: Vec<ReleaseInfo> = self.get_json("releases", "list releases").await?;
        releases.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(releases)
    }

    /// Picks the artifact for this application from `release`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NotFound`] when the release has no assets.
    pub fn select_download_asset(&self, release: &ReleaseInfo) -> Result<Asset, UpdateError> {
        select_asset(&release.assets, &self.app_name)
            .cloned()
            .ok_or_else(|| UpdateError::not_found(format!("downloadable asset in release {}", release.tag)))
    }

    /// The published SHA-256 of `asset`, if the release carries one.
    ///
    /// Looks for `<asset>.sha256` first, then a shared listing such as
    /// `SHA256SUMS`. Any failure is logged and reported as `None`.
    pub async fn expected_checksum(&self, release: &ReleaseInfo, asset: &Asset) -> Option<String> {
        let per_asset = format!("{}{}", asset.name, CHECKSUM_ASSET_SUFFIX).to_ascii_lowercase();
        let listing = release
            .assets
            .iter()
            .find(|a| a.name.to_ascii_lowercase() == per_asset)
            .or_else(|| {
                release.assets.iter().find(|a| {
                    CHECKSUM_ASSET_NAMES.iter().any(|n| n.eq_ignore_ascii_case(&a.name))
                })
            })?;

        debug!("Fetching checksums from {}", listing.download_url);
        let response = match self.client.get(&listing.download_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("Failed to fetch checksums file: HTTP {}", response.status());
                return None;
            }
            Err(e) => {
                warn!("Failed to fetch checksums file: {e}");
                return None;
            }
        };

        match response.text().await {
            Ok(content) => parse_checksum_listing(&content, &asset.name),
            Err(e) => {
                warn!("Failed to read checksums file: {e}");
                None
            }
        }
    }

    /// Probes the registry and describes what it found.
    pub async fn check_connection(&self) -> Result<String, UpdateError> {
        let release = self.get_latest_fresh().await?;
        let asset = match select_asset(&release.assets, &self.app_name) {
            Some(asset) => format!("asset {}", asset.name),
            None => "no downloadable asset".to_string(),
        };
        Ok(format!("Connected to {}: latest release {} ({asset})", self.repository(), release.tag))
    }

    fn cached_latest(&self) -> Option<ReleaseInfo> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.cache_ttl)
            .map(|c| c.release.clone())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, operation: &str) -> Result<T, UpdateError> {
        let url = format!("{}/repos/{}/{}/{}", self.api_base, self.owner, self.repo, path);

        let strategy = ExponentialBackoff::from_millis(10)
            .factor(20)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .take(self.attempts.saturating_sub(1) as usize);

        RetryIf::spawn(
            strategy,
            || self.get_json_once::<T>(&url, operation),
            |e: &UpdateError| {
                if e.is_transient() {
                    warn!("Retrying {operation}: {e}");
                }
                e.is_transient()
            },
        )
        .await
    }

    async fn get_json_once<T: DeserializeOwned>(&self, url: &str, operation: &str) -> Result<T, UpdateError> {
        debug!("GET {url}");

        let mut request = self.client.get(url).header(ACCEPT, REGISTRY_ACCEPT);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| UpdateError::network(operation, e))?;
        let status = response.status();

        if !status.is_success() {
            let rate_limited = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim() == "0");
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, rate_limited, operation, &text));
        }

        let body = response.text().await.map_err(|e| UpdateError::network(operation, e))?;
        serde_json::from_str(&body).map_err(|e| UpdateError::Registry {
            reason: format!("malformed response to {operation}: {e}"),
            status: Some(status.as_u16()),
        })
    }
}

fn status_error(status: StatusCode, rate_limited: bool, operation: &str, body: &str) -> UpdateError {
    let reason = if rate_limited || status == StatusCode::TOO_MANY_REQUESTS {
        format!("API rate limit exceeded during {operation}")
    } else if status == StatusCode::NOT_FOUND {
        format!("{operation}: not found (HTTP 404)")
    } else {
        let snippet: String = body.chars().take(200).collect();
        format!("{operation}: HTTP {status} {snippet}").trim_end().to_string()
    };

    UpdateError::Registry {
        reason,
        status: Some(status.as_u16()),
    }
}
