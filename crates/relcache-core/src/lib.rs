//! relcache core - a remote build cache for native app builds backed by
//! GitHub Releases.
//!
//! # Overview
//!
//! A build is addressed by a [`CacheKey`] derived from a project fingerprint
//! and the build variant. Lookups go through two tiers:
//!
//! ```text
//! <scratch>/build-run-cache/<key>.<app|apk>   local tier (LocalStore)
//! github.com/<owner>/<repo>/releases/<key>    remote tier (ReleaseStore)
//! ```
//!
//! [`resolver::resolve`] finds a cached build (never failing the caller),
//! [`publisher::publish`] uploads a fresh one.

pub mod archive;
pub mod config;
pub mod download;
pub mod fingerprint;
pub mod github;
pub mod key;
pub mod native;
pub mod paths;
pub mod provider;
pub mod publisher;
pub mod repo;
pub mod resolver;
pub mod store;
pub mod variant;

pub use archive::ArchiveFormat;
pub use github::{GitHubReleases, ReleaseAsset, ReleaseStore, RemoteError};
pub use key::{CacheKey, FingerprintHash, Platform};
pub use paths::*;
pub use repo::RepoKey;
pub use store::LocalStore;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("relcache/", env!("CARGO_PKG_VERSION"));

/// Tracing target shared by every cache-layer log line.
pub const LOG_TARGET: &str = "build_cache";
