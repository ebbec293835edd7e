//! Streaming downloads and conversion of downloaded assets into installable
//! app artifacts.

use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::archive::{self, ArchiveError, ArchiveFormat};
use crate::github::{ReleaseAsset, ReleaseStore, RemoteError};
use crate::key::Platform;
use crate::store::{LocalStore, StoreError};
use crate::LOG_TARGET;

/// Errors fetching a build and turning it into a cache entry.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server answered with a non-success status.
    #[error("Failed to download file from {url}: HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// Non-success status.
        status: reqwest::StatusCode,
    },

    /// Release API failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Extraction failure.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Commit into the local store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Send `request` and stream the response body into `dest`.
///
/// A partially written file is removed on any error. Returns the number of
/// bytes written.
pub async fn download_to_file(
    request: reqwest::RequestBuilder,
    dest: &Path,
) -> Result<u64, DownloadError> {
    match stream_to_file(request, dest).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if tokio::fs::try_exists(dest).await.unwrap_or(false) {
                tokio::fs::remove_file(dest).await.ok();
            }
            Err(e)
        }
    }
}

async fn stream_to_file(
    request: reqwest::RequestBuilder,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: response.url().to_string(),
            status,
        });
    }

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Download `asset` and turn it into an installable artifact.
///
/// `.apk` assets are used as-is. Anything else is treated as an archive
/// (format from the asset name, tar.gz when unknown), extracted, and the
/// first `.app`/`.apk` inside it is taken. The result is committed to
/// `cached_path` when given.
pub async fn download_and_maybe_extract_app<S: ReleaseStore + ?Sized>(
    store: &S,
    asset: &ReleaseAsset,
    platform: Platform,
    scratch_dir: &Path,
    cached_path: Option<&Path>,
) -> Result<PathBuf, DownloadError> {
    let output_dir = unique_dir(scratch_dir, "download-").await?;

    if asset.name.to_ascii_lowercase().ends_with("apk") {
        let apk_path = output_dir.join("app.apk");
        store.download_asset(asset, &apk_path).await?;
        tracing::info!(target: LOG_TARGET, "Successfully downloaded app");
        return Ok(LocalStore::commit(&apk_path, cached_path).await?);
    }

    let format = ArchiveFormat::detect(&asset.name).unwrap_or_default();
    let archive_dir = unique_dir(scratch_dir, "archive-").await?;
    let archive_path = archive_dir.join(format!("download.{}", format.extension()));

    store.download_asset(asset, &archive_path).await?;
    tracing::info!(target: LOG_TARGET, "Successfully downloaded app archive");

    let app_path = unpack_app(&archive_path, &output_dir, platform).await?;
    Ok(LocalStore::commit(&app_path, cached_path).await?)
}

/// Extract an app from an archive already on disk. Returns the path of the
/// app inside a fresh directory under `scratch_dir`.
pub async fn extract_app_from_local_archive(
    archive_path: &Path,
    platform: Platform,
    scratch_dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let output_dir = unique_dir(scratch_dir, "extract-").await?;
    unpack_app(archive_path, &output_dir, platform).await
}

async fn unpack_app(
    archive_path: &Path,
    output_dir: &Path,
    platform: Platform,
) -> Result<PathBuf, DownloadError> {
    archive::extract(archive_path, output_dir).await?;

    let dir = output_dir.to_path_buf();
    let ext = platform.artifact_extension();
    let found = tokio::task::spawn_blocking(move || archive::find_app(&dir, ext))
        .await
        .map_err(io::Error::other)??;
    Ok(found)
}

async fn unique_dir(parent: &Path, prefix: &str) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(parent).await?;
    let dir = tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?;
    Ok(dir.keep())
}
