//! Local cache tier: committed builds under `<scratch>/build-run-cache`.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::key::{CacheKey, Platform};

/// Errors committing into the local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Neither rename nor copy could move the entry.
    #[error("Failed to move {} to {}: {reason}", .from.display(), .to.display())]
    Move {
        /// Source path.
        from: PathBuf,
        /// Destination path.
        to: PathBuf,
        /// Why both rename and copy failed.
        reason: String,
    },
}

/// Maps cache keys to paths under a single root directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Store rooted at `root` (normally [`crate::build_run_cache_path`]).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at the default `<scratch>/build-run-cache`.
    pub fn from_env() -> Self {
        Self::new(crate::build_run_cache_path())
    }

    /// The directory that holds committed builds.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<key>.<app|apk>`
    pub fn path_for(&self, key: &CacheKey, platform: Platform) -> PathBuf {
        self.root
            .join(format!("{key}.{}", platform.artifact_extension()))
    }

    /// Local hit check. The key already encodes the content fingerprint, so
    /// existence is the whole test.
    pub async fn exists(path: &Path) -> bool {
        tokio::fs::symlink_metadata(path).await.is_ok()
    }

    /// Move `source` into place at `dest` and return the final path.
    ///
    /// With no `dest` the source path is returned untouched. Missing parent
    /// directories are created and an existing entry at `dest` is replaced.
    /// The move is a rename; across filesystems it degrades to copy + delete.
    pub async fn commit(source: &Path, dest: Option<&Path>) -> Result<PathBuf, StoreError> {
        let Some(dest) = dest else {
            return Ok(source.to_path_buf());
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        remove_existing(dest).await?;

        match tokio::fs::rename(source, dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                move_across_devices(source, dest).await?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(
            target: crate::LOG_TARGET,
            "Committed {} to {}",
            source.display(),
            dest.display()
        );
        Ok(dest.to_path_buf())
    }
}

async fn remove_existing(path: &Path) -> io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

async fn move_across_devices(source: &Path, dest: &Path) -> Result<(), StoreError> {
    let from = source.to_path_buf();
    let to = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let result = if from.is_dir() {
            let options = fs_extra::dir::CopyOptions::new().copy_inside(true);
            fs_extra::dir::move_dir(&from, &to, &options).map(|_| ())
        } else {
            let options = fs_extra::file::CopyOptions::new();
            fs_extra::file::move_file(&from, &to, &options).map(|_| ())
        };
        result.map_err(|e| StoreError::Move {
            from,
            to,
            reason: e.to_string(),
        })
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FingerprintHash;
    use tempfile::TempDir;

    fn key(dev: bool) -> CacheKey {
        CacheKey::derive(&FingerprintHash::new("abc123").unwrap(), dev)
    }

    #[test]
    fn test_path_for_uses_platform_extension() {
        let store = LocalStore::new("/tmp/relcache/build-run-cache");
        assert_eq!(
            store.path_for(&key(true), Platform::Macos),
            PathBuf::from("/tmp/relcache/build-run-cache/fingerprint.abc123.dev-client.app")
        );
        assert_eq!(
            store.path_for(&key(false), Platform::Android),
            PathBuf::from("/tmp/relcache/build-run-cache/fingerprint.abc123.apk")
        );
    }

    #[tokio::test]
    async fn test_commit_without_dest_is_identity() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("app.apk");
        std::fs::write(&src, b"apk").unwrap();

        let out = LocalStore::commit(&src, None).await.unwrap();
        assert_eq!(out, src);
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_commit_moves_directory_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("staging/Demo.app");
        std::fs::create_dir_all(src.join("Contents")).unwrap();
        std::fs::write(src.join("Contents/Info.plist"), b"plist").unwrap();

        let store = LocalStore::new(dir.path().join("cache/build-run-cache"));
        let dest = store.path_for(&key(false), Platform::Ios);
        assert!(!LocalStore::exists(&dest).await);

        let out = LocalStore::commit(&src, Some(&dest)).await.unwrap();
        assert_eq!(out, dest);
        assert!(!src.exists(), "commit moves, it does not copy");
        assert!(LocalStore::exists(&dest).await);
        assert_eq!(
            std::fs::read(dest.join("Contents/Info.plist")).unwrap(),
            b"plist"
        );
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("fingerprint.abc123.app");
        std::fs::create_dir_all(dest.join("stale")).unwrap();

        let src = dir.path().join("fresh.app");
        std::fs::create_dir_all(src.join("fresh")).unwrap();

        LocalStore::commit(&src, Some(&dest)).await.unwrap();
        assert!(dest.join("fresh").exists());
        assert!(!dest.join("stale").exists());
    }
}
