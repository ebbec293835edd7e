//! Command implementations.

pub mod clean;
pub mod key;
pub mod publish;
pub mod resolve;
pub mod run;

use anyhow::{Context, Result};
use relcache_core::fingerprint::CommandFingerprint;
use relcache_core::provider::BuildCacheProvider;
use relcache_core::variant::RunOptions;
use relcache_core::{FingerprintHash, Platform};

use crate::GlobalArgs;

/// Provider, platform and run options for one invocation.
#[derive(Debug)]
pub struct Project {
    /// Cache provider for the project root.
    pub provider: BuildCacheProvider,
    /// Target platform.
    pub platform: Platform,
    /// Build configuration, e.g. `Debug`.
    pub configuration: String,
    /// Options used to pick the build variant.
    pub run_options: RunOptions,
}

impl Project {
    /// Load the project named by `args`.
    pub async fn load(args: &GlobalArgs) -> Result<Self> {
        let root = std::fs::canonicalize(&args.project_root).with_context(|| {
            format!("Project root {} does not exist", args.project_root.display())
        })?;
        let provider = BuildCacheProvider::from_project(&root, &args.mode)
            .await
            .context("Failed to load project configuration")?;

        let build = &provider.config().build;
        let platform = args.platform.unwrap_or(build.platform);
        let configuration = args
            .configuration
            .map_or_else(|| build.configuration.clone(), |c| c.as_str().to_string());
        let run_options = crate::run_options(platform, &configuration);

        Ok(Self {
            provider,
            platform,
            configuration,
            run_options,
        })
    }

    /// The fingerprint given on the command line, or one computed by the
    /// configured fingerprint command.
    pub async fn fingerprint(&self, explicit: Option<&str>) -> Result<FingerprintHash> {
        if let Some(hash) = explicit {
            return FingerprintHash::new(hash).map_err(anyhow::Error::msg);
        }
        let command = &self.provider.config().fingerprint.command;
        let fingerprinter = CommandFingerprint::from_argv(command)
            .context("Set [fingerprint] command in relcache.toml or pass --fingerprint")?;
        self.provider
            .calculate_fingerprint_hash(self.platform, &fingerprinter)
            .await
            .context("Failed to calculate fingerprint")
    }
}
