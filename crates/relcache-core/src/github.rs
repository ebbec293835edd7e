//! Remote cache tier: GitHub Releases.
//!
//! Every cached build is a pre-release whose tag is the cache key. Directory
//! artifacts are uploaded as a single compressed asset.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{self, ArchiveError, ArchiveFormat};
use crate::download::{self, DownloadError};
use crate::key::CacheKey;
use crate::repo::RepoKey;
use crate::LOG_TARGET;

/// Public GitHub REST endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
/// Public GitHub upload endpoint for release assets.
pub const DEFAULT_UPLOADS_BASE: &str = "https://uploads.github.com";

/// Branches tried, in order, to anchor new tags.
const ANCHOR_BRANCHES: &[&str] = &["main", "master"];
const TAGGER_NAME: &str = "Release Bot";
const TAGGER_EMAIL: &str = "release-bot@users.noreply.github.com";
const API_VERSION: &str = "2022-11-28";

/// Errors talking to GitHub Releases.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// No release, tag or asset by that name.
    #[error("No release found for tag '{0}'")]
    NotFound(String),

    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("GitHub API {method} {path} returned {status}: {message}")]
    Api {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
        /// Response status.
        status: StatusCode,
        /// Response body or its `message` field.
        message: String,
    },

    /// None of the anchor branches exist.
    #[error("No valid branch found (tried {})", .0.join(", "))]
    NoBranch(Vec<String>),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Compressing a directory artifact failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Downloading an asset failed.
    #[error("Download failed: {0}")]
    Download(Box<DownloadError>),

    /// A step of publishing a release failed.
    #[error("GitHub release failed: {source}")]
    ReleaseFailed {
        /// The failed step.
        source: Box<RemoteError>,
    },
}

impl RemoteError {
    fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// A 422 whose validation errors say the resource already exists.
    fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::Api { status, message, .. }
                if *status == StatusCode::UNPROCESSABLE_ENTITY && message.contains("already_exists")
        )
    }
}

impl From<DownloadError> for RemoteError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::Remote(inner) => inner,
            other => Self::Download(Box::new(other)),
        }
    }
}

/// A file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// Asset id, used for API downloads and deletion.
    pub id: u64,
    /// File name of the asset.
    pub name: String,
    /// API URL of the asset.
    pub url: String,
    /// Public download URL.
    pub browser_download_url: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    html_url: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct Branch {
    commit: ObjectRef,
}

#[derive(Debug, Deserialize)]
struct ObjectRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitRef {
    object: ObjectRef,
}

#[derive(Debug, Serialize)]
struct Tagger<'a> {
    name: &'a str,
    email: &'a str,
    date: String,
}

#[derive(Debug, Serialize)]
struct NewTag<'a> {
    tag: &'a str,
    message: &'a str,
    object: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    tagger: Tagger<'a>,
}

#[derive(Debug, Serialize)]
struct NewRef<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct NewRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
}

impl ApiMessage {
    /// `message`, followed by the validation error codes if there are any.
    fn describe(self) -> String {
        let codes: Vec<&str> = self
            .errors
            .iter()
            .filter_map(|e| e.get("code").and_then(serde_json::Value::as_str))
            .collect();
        if codes.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, codes.join(", "))
        }
    }
}

/// Operations the cache needs from a release host.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Assets of the release tagged `tag`. [`RemoteError::NotFound`] if there
    /// is no such release.
    async fn list_assets_by_tag(&self, tag: &CacheKey) -> Result<Vec<ReleaseAsset>, RemoteError>;

    /// Tag, release and upload `binary_path` (compressed with `format` when it
    /// is a directory). Returns the release URL. Failures are wrapped in
    /// [`RemoteError::ReleaseFailed`].
    async fn create_release_and_upload_asset(
        &self,
        tag: &CacheKey,
        binary_path: &Path,
        format: ArchiveFormat,
    ) -> Result<String, RemoteError>;

    /// Download the asset's bytes to `dest`.
    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64, RemoteError>;
}

/// [`ReleaseStore`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct GitHubReleases {
    client: Client,
    token: String,
    repo: RepoKey,
    api_base: String,
    uploads_base: String,
    scratch_dir: PathBuf,
}

impl std::fmt::Debug for GitHubReleases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubReleases")
            .field("repo", &self.repo)
            .field("api_base", &self.api_base)
            .field("uploads_base", &self.uploads_base)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GitHubReleases {
    /// Client for `repo`, authenticating with `token`.
    pub fn new(client: Client, token: impl Into<String>, repo: RepoKey) -> Self {
        Self {
            client,
            token: token.into(),
            repo,
            api_base: DEFAULT_API_BASE.to_string(),
            uploads_base: DEFAULT_UPLOADS_BASE.to_string(),
            scratch_dir: crate::scratch_root(),
        }
    }

    /// Override the REST endpoint (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the asset upload endpoint.
    pub fn with_uploads_base(mut self, base: impl Into<String>) -> Self {
        self.uploads_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Directory receiving temporary archives of directory artifacts.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// The repository releases are created in.
    pub fn repo(&self) -> &RepoKey {
        &self.repo
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(USER_AGENT, crate::USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn api(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}/{path}", self.api_base, self.repo.api_path());
        self.authed(self.client.request(method, url))
            .header(ACCEPT, "application/vnd.github+json")
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, RemoteError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(ApiMessage::describe)
            .unwrap_or(body);
        Err(RemoteError::Api {
            method,
            path: path.to_string(),
            status,
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let builder = self.api(Method::GET, path);
        Ok(self.send(Method::GET, path, builder).await?.json().await?)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let builder = self.api(Method::POST, path).json(body);
        Ok(self.send(Method::POST, path, builder).await?.json().await?)
    }

    async fn release_by_tag(&self, tag: &CacheKey) -> Result<Release, RemoteError> {
        match self.get_json(&format!("releases/tags/{tag}")).await {
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                Err(RemoteError::NotFound(tag.to_string()))
            }
            other => other,
        }
    }

    /// Head commit of the first anchor branch that exists.
    async fn branch_sha_with_fallback(&self) -> Result<String, RemoteError> {
        for branch in ANCHOR_BRANCHES {
            match self.get_json::<Branch>(&format!("branches/{branch}")).await {
                Ok(data) => return Ok(data.commit.sha),
                Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {
                    tracing::debug!(target: LOG_TARGET, "Branch {branch} not found");
                }
                Err(e) => return Err(e),
            }
        }
        Err(RemoteError::NoBranch(
            ANCHOR_BRANCHES.iter().map(ToString::to_string).collect(),
        ))
    }

    /// Return the SHA `refs/tags/<tag>` points at, creating an annotated tag
    /// on `commit_sha` first if the ref does not exist.
    async fn ensure_annotated_tag(
        &self,
        tag: &CacheKey,
        commit_sha: &str,
    ) -> Result<String, RemoteError> {
        match self.get_json::<GitRef>(&format!("git/ref/tags/{tag}")).await {
            Ok(existing) => {
                tracing::debug!(target: LOG_TARGET, "Reusing existing tag {tag}");
                return Ok(existing.object.sha);
            }
            Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {}
            Err(e) => return Err(e),
        }

        let new_tag = NewTag {
            tag: tag.as_str(),
            message: tag.as_str(),
            object: commit_sha,
            kind: "commit",
            tagger: Tagger {
                name: TAGGER_NAME,
                email: TAGGER_EMAIL,
                date: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            },
        };
        let created: ObjectRef = self.post_json("git/tags", &new_tag).await?;

        let new_ref = NewRef {
            reference: format!("refs/tags/{tag}"),
            sha: &created.sha,
        };
        let _: serde_json::Value = self.post_json("git/refs", &new_ref).await?;

        Ok(created.sha)
    }

    /// Create the pre-release for `tag`, or fetch it if it already exists.
    async fn create_or_get_release(&self, tag: &CacheKey) -> Result<Release, RemoteError> {
        let body = NewRelease {
            tag_name: tag.as_str(),
            name: tag.as_str(),
            draft: false,
            prerelease: true,
        };
        match self.post_json::<_, Release>("releases", &body).await {
            Err(e) if e.is_already_exists() => {
                tracing::info!(
                    target: LOG_TARGET,
                    "Release for {tag} already exists, reusing it"
                );
                self.release_by_tag(tag).await
            }
            other => other,
        }
    }

    async fn delete_asset(&self, asset: &ReleaseAsset) -> Result<(), RemoteError> {
        let path = format!("releases/assets/{}", asset.id);
        let builder = self.api(Method::DELETE, &path);
        self.send(Method::DELETE, &path, builder).await?;
        Ok(())
    }

    async fn upload_release_asset(
        &self,
        release: &Release,
        binary_path: &Path,
        format: ArchiveFormat,
    ) -> Result<(), RemoteError> {
        let mut name = binary_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut scratch_archive = None;
        let file_path = if tokio::fs::metadata(binary_path).await?.is_dir() {
            let archive = archive::compress(binary_path, format, &self.scratch_dir).await?;
            name = format!("{name}.{}", format.extension());
            scratch_archive = Some(archive.clone());
            archive
        } else {
            binary_path.to_path_buf()
        };

        if let Some(stale) = release.assets.iter().find(|a| a.name == name) {
            tracing::info!(target: LOG_TARGET, "Replacing existing asset {name}");
            self.delete_asset(stale).await?;
        }

        let data = tokio::fs::read(&file_path).await?;
        let path = format!("releases/{}/assets", release.id);
        let url = format!(
            "{}/{}/{path}",
            self.uploads_base,
            self.repo.api_path()
        );
        let builder = self
            .authed(self.client.post(url))
            .header(ACCEPT, "application/vnd.github+json")
            .query(&[("name", name.as_str())])
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, data.len())
            .body(data);

        let result = self.send(Method::POST, &path, builder).await;

        if let Some(archive) = scratch_archive {
            tokio::fs::remove_file(&archive).await.ok();
        }
        result?;

        tracing::info!(target: LOG_TARGET, "Uploaded asset {name}");
        Ok(())
    }

    async fn publish(
        &self,
        tag: &CacheKey,
        binary_path: &Path,
        format: ArchiveFormat,
    ) -> Result<String, RemoteError> {
        let commit_sha = self.branch_sha_with_fallback().await?;
        self.ensure_annotated_tag(tag, &commit_sha).await?;
        let release = self.create_or_get_release(tag).await?;
        self.upload_release_asset(&release, binary_path, format)
            .await?;
        Ok(release.html_url)
    }
}

#[async_trait]
impl ReleaseStore for GitHubReleases {
    async fn list_assets_by_tag(&self, tag: &CacheKey) -> Result<Vec<ReleaseAsset>, RemoteError> {
        Ok(self.release_by_tag(tag).await?.assets)
    }

    async fn create_release_and_upload_asset(
        &self,
        tag: &CacheKey,
        binary_path: &Path,
        format: ArchiveFormat,
    ) -> Result<String, RemoteError> {
        self.publish(tag, binary_path, format)
            .await
            .map_err(|e| RemoteError::ReleaseFailed {
                source: Box::new(e),
            })
    }

    async fn download_asset(&self, asset: &ReleaseAsset, dest: &Path) -> Result<u64, RemoteError> {
        let builder = self
            .authed(self.client.get(&asset.url))
            .header(ACCEPT, "application/octet-stream");
        Ok(download::download_to_file(builder, dest).await?)
    }
}
