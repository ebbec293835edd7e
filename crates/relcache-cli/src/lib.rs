//! relcache - reuse native app builds through GitHub Releases
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Run from a project root containing `relcache.toml`:
//!
//! ```text
//! relcache                      fingerprint, reuse a cached build or build one
//! relcache --publish            ... and publish a fresh build
//! relcache key                  print the cache key of the current inputs
//! relcache resolve              print the path of a cached build, if any
//! relcache publish <path>       publish an existing build
//! relcache clean                remove the scratch directory
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use relcache_core::Platform;
use relcache_core::variant::RunOptions;

#[derive(Debug, Parser)]
#[command(name = "relcache")]
#[command(author, version = env!("RELCACHE_VERSION"), about = "relcache - reuse native app builds through GitHub Releases")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by every command.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Project root holding relcache.toml
    #[arg(long, global = true, env = "RELCACHE_PROJECT_ROOT", default_value = ".")]
    pub project_root: PathBuf,

    /// Target platform (defaults to [build] platform)
    #[arg(long, global = true)]
    pub platform: Option<Platform>,

    /// Build configuration
    #[arg(long = "config", global = true, value_enum)]
    pub configuration: Option<Configuration>,

    /// Env file mode: picks .env.<mode> and .env.<mode>.local
    #[arg(long, global = true, default_value = relcache_core::config::DEFAULT_MODE)]
    pub mode: String,

    /// Use this fingerprint instead of running the fingerprint command
    #[arg(long, global = true)]
    pub fingerprint: Option<String>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Flags of the default build pipeline.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Look up cached builds before building
    #[arg(long, overrides_with = "no_cache")]
    pub cache: bool,

    /// Always build, never look up cached builds
    #[arg(long = "no-cache", overrides_with = "cache")]
    pub no_cache: bool,

    /// Publish a fresh build to GitHub Releases
    #[arg(long, conflicts_with = "no_cache")]
    pub publish: bool,

    /// Write build output to this file instead of the terminal
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl RunArgs {
    /// Cache lookups are on unless `--no-cache` wins.
    pub fn cache_enabled(&self) -> bool {
        !self.no_cache
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the fingerprint and cache key of the current inputs
    Key,
    /// Print the path of a cached build (exits 0 on a miss)
    Resolve,
    /// Publish an existing build
    Publish {
        /// The .app bundle or .apk to upload
        path: PathBuf,
    },
    /// Remove the scratch directory and every cached build in it
    Clean {
        /// Show what would be removed
        #[arg(long)]
        dry_run: bool,
    },
}

/// Xcode-style build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Configuration {
    #[value(name = "Debug", alias = "debug")]
    Debug,
    #[value(name = "Release", alias = "release")]
    Release,
}

impl Configuration {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "Debug",
            Self::Release => "Release",
        }
    }
}

/// Run options for `platform`: Gradle variants are lowercase, Xcode
/// configurations capitalised.
pub fn run_options(platform: Platform, configuration: &str) -> RunOptions {
    if platform.is_apple() {
        RunOptions {
            configuration: Some(configuration.to_string()),
            variant: None,
        }
    } else {
        RunOptions {
            variant: Some(configuration.to_ascii_lowercase()),
            configuration: None,
        }
    }
}
