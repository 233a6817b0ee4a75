//! File system helpers with atomic writes and durable copies.
//!
//! Every file the updater owns outside the install path (version marker,
//! check record, settings) is written with [`atomic_write`], so a reader
//! sees either the previous or the new content and never a torn file.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Creates a directory and all of its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        anyhow::bail!("Path exists but is not a directory: {}", path.display());
    }
    Ok(())
}

/// Safely writes a string to a file using atomic operations.
pub fn safe_write(path: &Path, content: &str) -> Result<()> {
    atomic_write(path, content.as_bytes())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// 1. Write content to a sibling temporary file (`.tmp` extension)
/// 2. Sync the temporary file to disk
/// 3. Rename the temporary file over the target path
///
/// Parent directories are created if they don't exist.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let temp_path = temp_sibling(path, "tmp");

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e).with_context(|| {
            format!("Failed to rename {} to {}", temp_path.display(), path.display())
        });
    }

    Ok(())
}

/// Copies `src` to `dst`, flushing the copy to stable storage.
///
/// Returns the number of bytes copied. On unix the source permissions are
/// carried over explicitly so an executable stays executable.
pub fn durable_copy(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let bytes = fs::copy(src, dst)?;

    #[cfg(unix)]
    {
        let permissions = fs::metadata(src)?.permissions();
        fs::set_permissions(dst, permissions)?;
    }

    fs::OpenOptions::new().write(true).open(dst)?.sync_all()?;
    Ok(bytes)
}

/// A hidden sibling of `path` with a unique suffix, e.g. `.app.exe.tmp-<uuid>`.
///
/// Siblings share the target's file system, which keeps a later rename
/// atomic.
pub fn temp_sibling(path: &Path, tag: &str) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.{tag}-{}", uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parents_and_replaces() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/marker.txt");

        atomic_write(&path, b"1.0.0").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1.0.0");

        safe_write(&path, "1.1.0").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "1.1.0");

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_ensure_dir_rejects_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "x").unwrap();
        assert!(ensure_dir(&file).is_err());
        assert!(ensure_dir(&temp.path().join("a/b")).is_ok());
    }

    #[test]
    fn test_durable_copy_returns_size() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.bin");
        let dst = temp.path().join("dst.bin");
        fs::write(&src, b"0123456789").unwrap();

        assert_eq!(durable_copy(&src, &dst).unwrap(), 10);
        assert_eq!(fs::read(&dst).unwrap(), b"0123456789");
    }

    #[test]
    fn test_temp_sibling_stays_in_directory() {
        let path = Path::new("/opt/app/tool.exe");
        let sibling = temp_sibling(path, "new");
        assert_eq!(sibling.parent(), path.parent());
        assert!(sibling.file_name().unwrap().to_string_lossy().starts_with(".tool.exe.new-"));
    }
}
