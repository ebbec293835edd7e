//! Project fingerprinting.
//!
//! The fingerprint algorithm itself lives outside relcache. A
//! [`FingerprintProvider`] turns a project root plus [`FingerprintOptions`]
//! into a [`FingerprintHash`]; [`CommandFingerprint`] does so by running a
//! configured command that speaks JSON:
//!
//! ```text
//! stdin:  {"platforms":["macos"],"ignorePaths":[...],"extraSources":[...]}
//! stdout: {"hash":"8599e6998f3a3682050d5d256b1afe6b419b937b"}
//! ```

pub mod sources;

use std::io;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::key::{FingerprintHash, Platform};
use crate::LOG_TARGET;

pub use sources::HashSource;

/// Errors computing a fingerprint.
#[derive(Error, Debug)]
pub enum FingerprintError {
    /// Filesystem or pipe failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed JSON from a tool or `package.json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `[fingerprint] command` is empty.
    #[error("No fingerprint command configured")]
    NotConfigured,

    /// A required tool or package is missing.
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// The program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The program exited unsuccessfully.
    #[error("{program} exited with status {}: {stderr}", .status.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    Failed {
        /// Program name.
        program: String,
        /// Exit code, `None` when killed by a signal.
        status: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// The program printed an unusable hash.
    #[error("Invalid fingerprint hash: {0}")]
    InvalidHash(String),
}

/// Bit set of fingerprint inputs to leave out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceSkips(u32);

impl SourceSkips {
    /// Skip nothing.
    pub const NONE: Self = Self(0);
    /// Drop platform scripts that do not run a native build.
    pub const PACKAGE_JSON_ANDROID_AND_IOS_SCRIPTS_IF_NOT_CONTAIN_RUN: Self = Self(1 << 9);
    /// Drop every `package.json` script.
    pub const PACKAGE_JSON_SCRIPTS_ALL: Self = Self(1 << 10);

    /// Skips applied when the caller sets none.
    pub const DEFAULT: Self = Self::PACKAGE_JSON_ANDROID_AND_IOS_SCRIPTS_IF_NOT_CONTAIN_RUN;

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Raw bit value.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for SourceSkips {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Options passed to the fingerprint provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintOptions {
    /// Platforms to fingerprint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,
    /// Globs excluded from hashing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_paths: Vec<String>,
    /// Inputs hashed in addition to the provider's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_sources: Vec<HashSource>,
    /// Whether React Native core autolinking is resolved through Expo.
    #[serde(
        default,
        rename = "useRNCoreAutolinkingFromExpo",
        skip_serializing_if = "Option::is_none"
    )]
    pub use_rn_core_autolinking_from_expo: Option<bool>,
    /// Inputs to leave out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_skips: Option<SourceSkips>,
}

impl FingerprintOptions {
    /// Options for `platform`. macOS projects get the macOS ignore paths and
    /// the extra sources the stock tooling misses; other platforms are left
    /// to the provider's defaults.
    pub async fn for_platform(project_root: &Path, platform: Platform) -> Self {
        match platform {
            Platform::Macos => Self::default().for_macos(project_root).await,
            other => Self {
                platforms: vec![other],
                ..Self::default()
            },
        }
    }

    /// Fill in macOS defaults and gather extra sources. Explicitly set fields
    /// are kept; gathered sources are appended to any already present.
    pub async fn for_macos(mut self, project_root: &Path) -> Self {
        if self.platforms.is_empty() {
            self.platforms = vec![Platform::Macos];
        }
        if self.ignore_paths.is_empty() {
            self.ignore_paths = sources::MACOS_IGNORE_PATHS
                .iter()
                .map(|p| (*p).to_string())
                .collect();
        }
        let use_rn_core = *self.use_rn_core_autolinking_from_expo.get_or_insert(true);

        let gather = sources::GatherOptions {
            macos: self.platforms.contains(&Platform::Macos),
            source_skips: self.source_skips.unwrap_or(SourceSkips::DEFAULT),
            use_rn_core_autolinking_from_expo: use_rn_core,
        };
        let extra = sources::gather_macos_sources(project_root, gather).await;
        tracing::debug!(target: LOG_TARGET, "Gathered {} extra macos hash sources", extra.len());
        self.extra_sources.extend(extra);
        self
    }
}

/// Computes fingerprints of project inputs.
#[async_trait]
pub trait FingerprintProvider: Send + Sync {
    /// Fingerprint of the inputs under `project_root`.
    async fn compute_fingerprint(
        &self,
        project_root: &Path,
        options: &FingerprintOptions,
    ) -> Result<FingerprintHash, FingerprintError>;
}

#[derive(Deserialize)]
struct FingerprintOutput {
    hash: String,
}

/// [`FingerprintProvider`] that runs an external command in the project root.
#[derive(Debug, Clone)]
pub struct CommandFingerprint {
    program: String,
    args: Vec<String>,
}

impl CommandFingerprint {
    /// Provider for `argv` (program followed by its arguments).
    pub fn from_argv(argv: &[String]) -> Result<Self, FingerprintError> {
        let (program, args) = argv.split_first().ok_or(FingerprintError::NotConfigured)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl FingerprintProvider for CommandFingerprint {
    async fn compute_fingerprint(
        &self,
        project_root: &Path,
        options: &FingerprintOptions,
    ) -> Result<FingerprintHash, FingerprintError> {
        let input = serde_json::to_vec(options)?;
        tracing::debug!(
            target: LOG_TARGET,
            "Running fingerprint command {} in {}",
            self.program,
            project_root.display()
        );

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .current_dir(project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FingerprintError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // a command that ignores its input may close stdin early
            match stdin.write_all(&input).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(FingerprintError::Failed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let parsed: FingerprintOutput = serde_json::from_slice(&output.stdout)?;
        FingerprintHash::new(parsed.hash).map_err(FingerprintError::InvalidHash)
    }
}
