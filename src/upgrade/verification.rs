//! SHA-256 checksums for downloaded artifacts.
//!
//! Checksums are carried as lowercase hex without a prefix. Input from a
//! release's checksum listing may be upper case or carry a `sha256:`
//! prefix; [`normalize_checksum`] folds both forms.

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Checksum helpers shared by the fetcher and the install validator.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// SHA-256 of a byte slice as lowercase hex.
    pub fn sha256_hex(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }
}

/// Lowercases a checksum and strips an optional `sha256:` prefix.
pub fn normalize_checksum(checksum: &str) -> String {
    let trimmed = checksum.trim();
    let bare = trimmed
        .strip_prefix("sha256:")
        .or_else(|| trimmed.strip_prefix("SHA256:"))
        .unwrap_or(trimmed);
    bare.to_ascii_lowercase()
}

/// Whether `checksum` looks like a SHA-256 hex digest.
pub fn is_sha256_hex(checksum: &str) -> bool {
    let normalized = normalize_checksum(checksum);
    normalized.len() == 64 && normalized.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Finds the checksum for `asset_name` in a checksum listing.
///
/// Accepts the `sha256sum` layout (`<hex>  <name>`, optionally `*<name>`
/// for binary mode) and a bare single-digest file as published next to one
/// asset (`<asset>.sha256`).
pub fn parse_checksum_listing(content: &str, asset_name: &str) -> Option<String> {
    let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    for line in &lines {
        let mut parts = line.split_whitespace();
        let (Some(digest), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        let name = name.trim_start_matches('*');
        let name = name.rsplit('/').next().unwrap_or(name);
        if name == asset_name && is_sha256_hex(digest) {
            debug!("Found checksum for {asset_name}: {digest}");
            return Some(normalize_checksum(digest));
        }
    }

    if let [single] = lines.as_slice() {
        if is_sha256_hex(single) {
            return Some(normalize_checksum(single));
        }
    }

    warn!("No checksum found for asset: {asset_name}");
    None
}
