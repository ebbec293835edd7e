//! Cache publication.

use std::path::Path;

use crate::archive::ArchiveFormat;
use crate::github::{ReleaseStore, RemoteError};
use crate::key::{CacheKey, FingerprintHash};
use crate::LOG_TARGET;

/// Upload the build at `artifact_path` under the key for `fingerprint`.
///
/// Returns `Ok(None)` without touching the network when no credential is
/// configured (`remote` is `None`), and the release URL on success. Failures
/// are logged and returned; deciding whether they abort the run is left to
/// the caller.
pub async fn publish<S: ReleaseStore + ?Sized>(
    remote: Option<&S>,
    fingerprint: &FingerprintHash,
    is_dev_client: bool,
    artifact_path: &Path,
    format: ArchiveFormat,
) -> Result<Option<String>, RemoteError> {
    let Some(remote) = remote else {
        tracing::info!(
            target: LOG_TARGET,
            "No BUILD_CACHE_PROVIDER_TOKEN configured; skipping build cache upload"
        );
        return Ok(None);
    };

    let key = CacheKey::derive(fingerprint, is_dev_client);
    tracing::info!(target: LOG_TARGET, "Uploading build to GitHub Releases ({key})");

    match remote
        .create_release_and_upload_asset(&key, artifact_path, format)
        .await
    {
        Ok(url) => {
            tracing::info!(target: LOG_TARGET, "Published {key} to {url}");
            Ok(Some(url))
        }
        Err(e) => {
            tracing::error!(target: LOG_TARGET, "Release failed: {e}");
            Err(e)
        }
    }
}
