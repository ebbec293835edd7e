//! The build cache provider: everything a build pipeline needs, wired from a
//! project's config and env files.

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, ProjectConfig, ProjectEnv};
use crate::fingerprint::{FingerprintError, FingerprintOptions, FingerprintProvider};
use crate::github::{GitHubReleases, RemoteError};
use crate::key::{CacheKey, FingerprintHash, Platform};
use crate::resolver::{self, ResolveRequest};
use crate::store::LocalStore;
use crate::variant::{self, RunOptions};
use crate::{publisher, LOG_TARGET};

/// Remote build cache for one project.
///
/// The remote tier exists only when a `BUILD_CACHE_PROVIDER_TOKEN` is
/// configured; without it lookups are local-only and uploads are skipped.
#[derive(Debug)]
pub struct BuildCacheProvider {
    project_root: PathBuf,
    config: ProjectConfig,
    remote: Option<GitHubReleases>,
    local: LocalStore,
    scratch_dir: PathBuf,
}

impl BuildCacheProvider {
    /// Provider for `project_root` with an explicit config and env.
    pub fn new(
        project_root: impl Into<PathBuf>,
        config: ProjectConfig,
        env: &ProjectEnv,
        client: reqwest::Client,
    ) -> Self {
        let scratch_dir = crate::scratch_root();
        let remote = env.token().map(|token| {
            let mut releases =
                GitHubReleases::new(client, token, config.provider.repo_key())
                    .with_scratch_dir(&scratch_dir);
            if let Some(base) = env.github_api_base() {
                releases = releases.with_api_base(base);
            }
            if let Some(base) = env.github_uploads_base() {
                releases = releases.with_uploads_base(base);
            }
            releases
        });

        Self {
            project_root: project_root.into(),
            config,
            remote,
            local: LocalStore::new(scratch_dir.join(crate::BUILD_RUN_CACHE_DIR)),
            scratch_dir,
        }
    }

    /// Load `relcache.toml` and the env files of `project_root`.
    pub async fn from_project(project_root: &Path, mode: &str) -> Result<Self, ConfigError> {
        let config = ProjectConfig::load(project_root).await?;
        let env = ProjectEnv::load(project_root, mode)?;
        let client = reqwest::Client::builder()
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;
        Ok(Self::new(project_root, config, &env, client))
    }

    /// Move every scratch artifact under `dir` instead of the default
    /// scratch root.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self.local = LocalStore::new(self.scratch_dir.join(crate::BUILD_RUN_CACHE_DIR));
        self.remote = self
            .remote
            .take()
            .map(|remote| remote.with_scratch_dir(&self.scratch_dir));
        self
    }

    /// Project root the provider was created for.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Parsed `relcache.toml`.
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Root for downloads, extraction and the local cache.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// The local cache tier.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Whether a token is configured.
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Whether this run is a dev-client build of the project.
    pub fn is_dev_client(&self, run_options: &RunOptions) -> bool {
        variant::is_dev_client_build(&self.project_root, run_options)
    }

    /// The key a build with these inputs is cached under.
    pub fn cache_key(&self, fingerprint: &FingerprintHash, run_options: &RunOptions) -> CacheKey {
        CacheKey::derive(fingerprint, self.is_dev_client(run_options))
    }

    /// Local path of a cached build, or `None`.
    pub async fn resolve_build_cache(
        &self,
        fingerprint: &FingerprintHash,
        run_options: &RunOptions,
        platform: Platform,
    ) -> Option<PathBuf> {
        let request = ResolveRequest {
            fingerprint: fingerprint.clone(),
            is_dev_client: self.is_dev_client(run_options),
            platform,
        };
        resolver::resolve(&request, &self.local, self.remote.as_ref(), &self.scratch_dir).await
    }

    /// Publish the build at `build_path`. `Ok(None)` when no token is set.
    pub async fn upload_build_cache(
        &self,
        fingerprint: &FingerprintHash,
        run_options: &RunOptions,
        build_path: &Path,
    ) -> Result<Option<String>, RemoteError> {
        publisher::publish(
            self.remote.as_ref(),
            fingerprint,
            self.is_dev_client(run_options),
            build_path,
            self.config.build.format,
        )
        .await
    }

    /// Fingerprint the project for `platform` with `fingerprinter`.
    pub async fn calculate_fingerprint_hash(
        &self,
        platform: Platform,
        fingerprinter: &dyn FingerprintProvider,
    ) -> Result<FingerprintHash, FingerprintError> {
        let options = FingerprintOptions::for_platform(&self.project_root, platform).await;
        let hash = fingerprinter
            .compute_fingerprint(&self.project_root, &options)
            .await?;
        tracing::info!(target: LOG_TARGET, "Fingerprint for {platform}: {hash}");
        Ok(hash)
    }
}
