//! Cache resolution: local tier, then remote tier, never an error.

use std::path::{Path, PathBuf};

use crate::download::{self, DownloadError};
use crate::github::{ReleaseStore, RemoteError};
use crate::key::{CacheKey, FingerprintHash, Platform};
use crate::store::LocalStore;
use crate::LOG_TARGET;

/// What to look up.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    /// Fingerprint of the project inputs.
    pub fingerprint: FingerprintHash,
    /// Whether this is a dev-client build.
    pub is_dev_client: bool,
    /// Target platform, decides `.app` vs `.apk`.
    pub platform: Platform,
}

impl ResolveRequest {
    /// The cache key this request addresses.
    pub fn key(&self) -> CacheKey {
        CacheKey::derive(&self.fingerprint, self.is_dev_client)
    }
}

/// Find a cached build for `request`.
///
/// Returns the local path of the build, or `None` on any miss. `remote` is
/// `None` when no credential is configured. Every failure past the local
/// check is logged and treated as a miss so a build can always proceed.
pub async fn resolve<S: ReleaseStore + ?Sized>(
    request: &ResolveRequest,
    local: &LocalStore,
    remote: Option<&S>,
    scratch_dir: &Path,
) -> Option<PathBuf> {
    let key = request.key();
    let cached_path = local.path_for(&key, request.platform);

    if LocalStore::exists(&cached_path).await {
        tracing::info!(target: LOG_TARGET, "Cached build found, skipping download");
        return Some(cached_path);
    }

    let Some(remote) = remote else {
        tracing::info!(
            target: LOG_TARGET,
            "No BUILD_CACHE_PROVIDER_TOKEN configured; skipping remote build cache lookup"
        );
        return None;
    };

    tracing::info!(
        target: LOG_TARGET,
        "Searching builds with matching fingerprint on GitHub Releases ({key})"
    );
    match fetch_remote(remote, &key, request.platform, scratch_dir, &cached_path).await {
        Ok(Some(path)) => Some(path),
        Ok(None) => {
            tracing::info!(
                target: LOG_TARGET,
                "No cached builds available for this fingerprint"
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                target: LOG_TARGET,
                "No cached builds available for this fingerprint: {e}"
            );
            None
        }
    }
}

async fn fetch_remote<S: ReleaseStore + ?Sized>(
    remote: &S,
    key: &CacheKey,
    platform: Platform,
    scratch_dir: &Path,
    cached_path: &Path,
) -> Result<Option<PathBuf>, DownloadError> {
    let assets = match remote.list_assets_by_tag(key).await {
        Ok(assets) => assets,
        Err(RemoteError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let Some(asset) = assets.first() else {
        return Ok(None);
    };

    let path = download::download_and_maybe_extract_app(
        remote,
        asset,
        platform,
        scratch_dir,
        Some(cached_path),
    )
    .await?;
    Ok(Some(path))
}
