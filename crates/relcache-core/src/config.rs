//! Project configuration.
//!
//! A project is configured by two files in its root:
//!
//! - `relcache.toml` names the GitHub repository holding cached builds and
//!   describes how to fingerprint and build the project.
//! - `.env` files carry secrets, most importantly
//!   `BUILD_CACHE_PROVIDER_TOKEN`. They are read in the order
//!   `.env.<mode>.local`, `.env.local`, `.env.<mode>`, `.env`; the first file
//!   defining a variable wins and the process environment wins over all of
//!   them. `.env.local` is skipped in `test` mode.
//!
//! ```toml
//! [provider]
//! owner = "shirakaba"
//! repo = "paranovel-two"
//!
//! [build]
//! platform = "macos"
//! format = "zip"
//! command = ["xcodebuild", "-workspace", "macos/App.xcworkspace",
//!            "-configuration", "{configuration}", "-derivedDataPath", "build"]
//! output_dir = "build/Build/Products"
//!
//! [fingerprint]
//! command = ["node", "scripts/fingerprint.js"]
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveFormat;
use crate::key::Platform;
use crate::repo::RepoKey;

/// Name of the project config file.
pub const CONFIG_FILE: &str = "relcache.toml";

/// Environment variable holding the GitHub token.
pub const TOKEN_ENV: &str = "BUILD_CACHE_PROVIDER_TOKEN";

/// Override for the GitHub REST endpoint.
pub const GITHUB_API_ENV: &str = "RELCACHE_GITHUB_API";

/// Override for the GitHub asset upload endpoint.
pub const GITHUB_UPLOADS_ENV: &str = "RELCACHE_GITHUB_UPLOADS";

/// Mode used to pick `.env.<mode>` files when none is given.
pub const DEFAULT_MODE: &str = "production";

/// Errors loading project configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The project root has no `relcache.toml`.
    #[error("No relcache.toml found in {}", .0.display())]
    NotFound(PathBuf),

    /// A config or env file exists but could not be read.
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// `relcache.toml` is not valid TOML for this schema.
    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// Parsed but semantically invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parsed `relcache.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Where cached builds are published.
    pub provider: ProviderConfig,
    /// How to produce a build on a cache miss.
    #[serde(default)]
    pub build: BuildConfig,
    /// How to fingerprint the project.
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
}

/// The `[provider]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl ProviderConfig {
    /// The repository releases are created in.
    pub fn repo_key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.repo)
    }
}

/// The `[build]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Platform built when none is given on the command line.
    #[serde(default)]
    pub platform: Platform,
    /// Archive format for directory artifacts.
    #[serde(default)]
    pub format: ArchiveFormat,
    /// Build argv. `{configuration}` is replaced by the run configuration.
    #[serde(default)]
    pub command: Vec<String>,
    /// Where the build leaves its products, relative to the project root.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Configuration built when none is given on the command line.
    #[serde(default = "default_configuration")]
    pub configuration: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            format: ArchiveFormat::default(),
            command: Vec::new(),
            output_dir: default_output_dir(),
            configuration: default_configuration(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("build")
}

fn default_configuration() -> String {
    "Debug".to_string()
}

/// The `[fingerprint]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FingerprintConfig {
    /// Fingerprint argv, run in the project root.
    #[serde(default)]
    pub command: Vec<String>,
}

impl ProjectConfig {
    /// Load `relcache.toml` from `project_root`.
    pub async fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(CONFIG_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(project_root.to_path_buf()));
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Self::parse(&content, &path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: ProjectConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.owner.is_empty() || self.provider.repo.is_empty() {
            return Err(ConfigError::Invalid(
                "[provider] owner and repo must not be empty".into(),
            ));
        }
        if self.provider.owner.contains('/') || self.provider.repo.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "[provider] owner and repo must not contain '/': {}/{}",
                self.provider.owner, self.provider.repo
            )));
        }
        Ok(())
    }
}

/// Variables from the project's `.env` files layered under the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct ProjectEnv {
    vars: HashMap<String, String>,
}

impl ProjectEnv {
    /// Read the env files of `project_root` for `mode`. Missing files are
    /// skipped; a file that exists but cannot be read is an error.
    pub fn load(project_root: &Path, mode: &str) -> Result<Self, ConfigError> {
        let mut vars = HashMap::new();
        for name in env_file_names(mode) {
            let path = project_root.join(&name);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(ConfigError::Read { path, source }),
            };
            tracing::debug!(target: crate::LOG_TARGET, "Loaded {}", path.display());
            for (key, value) in parse_env_file(&content) {
                vars.entry(key).or_insert(value);
            }
        }
        Ok(Self { vars })
    }

    /// Env built from explicit pairs, ignoring files.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of `name`, from the process environment first. Empty values
    /// count as unset.
    pub fn get(&self, name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .or_else(|| self.vars.get(name).cloned())
            .filter(|v| !v.is_empty())
    }

    /// The GitHub token, if configured.
    pub fn token(&self) -> Option<String> {
        self.get(TOKEN_ENV)
    }

    /// GitHub REST endpoint override.
    pub fn github_api_base(&self) -> Option<String> {
        self.get(GITHUB_API_ENV)
    }

    /// GitHub upload endpoint override.
    pub fn github_uploads_base(&self) -> Option<String> {
        self.get(GITHUB_UPLOADS_ENV)
    }
}

/// Env files in precedence order (earlier wins).
pub fn env_file_names(mode: &str) -> Vec<String> {
    let mut names = vec![format!(".env.{mode}.local")];
    if mode != "test" {
        names.push(".env.local".to_string());
    }
    names.push(format!(".env.{mode}"));
    names.push(".env".to_string());
    names
}

/// Parse `KEY=value` lines. Blank lines, comments and malformed lines are
/// skipped; an `export ` prefix is allowed and matching quotes are stripped.
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return None;
            }
            Some((key.to_string(), unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && first == b'"' {
            return value[1..value.len() - 1].replace("\\n", "\n");
        }
        if first == last && first == b'\'' {
            return value[1..value.len() - 1].to_string();
        }
    }
    // trailing comment on an unquoted value
    match value.find(" #") {
        Some(idx) => value[..idx].trim_end().to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
[provider]
owner = "octo"
repo = "app"

[build]
platform = "android"
format = "zip"
command = ["./gradlew", "assemble{configuration}"]
output_dir = "android/app/build/outputs"
configuration = "Release"

[fingerprint]
command = ["node", "fp.js"]
"#,
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.provider.repo_key(), RepoKey::new("octo", "app"));
        assert_eq!(config.build.platform, Platform::Android);
        assert_eq!(config.build.format, ArchiveFormat::Zip);
        assert_eq!(config.build.configuration, "Release");
        assert_eq!(config.fingerprint.command, vec!["node", "fp.js"]);
    }

    #[tokio::test]
    async fn test_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[provider]\nowner = \"octo\"\nrepo = \"app\"\n",
        )
        .unwrap();

        let config = ProjectConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.build, BuildConfig::default());
        assert_eq!(config.build.platform, Platform::Macos);
        assert_eq!(config.build.format, ArchiveFormat::TarGz);
        assert_eq!(config.build.output_dir, PathBuf::from("build"));
        assert!(config.fingerprint.command.is_empty());
    }

    #[tokio::test]
    async fn test_missing_config() {
        let dir = TempDir::new().unwrap();
        let err = ProjectConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_config() {
        let path = Path::new(CONFIG_FILE);
        let err = ProjectConfig::parse("[provider]\nowner = \"\"\nrepo = \"app\"\n", path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ProjectConfig::parse("[provider]\nowner = \"octo\"\n", path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = ProjectConfig::parse(
            "[provider]\nowner = \"octo\"\nrepo = \"app\"\n[build]\nformat = \"rar\"\n",
            path,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_env_file() {
        let parsed = parse_env_file(
            "# comment\n\nexport A=1\nB = \"two\\nlines\"\nC='single'\nD=plain # trailing\nnot a line\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two\nlines".to_string()),
                ("C".to_string(), "single".to_string()),
                ("D".to_string(), "plain".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_file_precedence() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join(".env"), "RELCACHE_T_A=env\nRELCACHE_T_B=env\nRELCACHE_T_C=env\nRELCACHE_T_D=env\n").unwrap();
        std::fs::write(root.join(".env.production"), "RELCACHE_T_A=mode\nRELCACHE_T_B=mode\nRELCACHE_T_C=mode\n").unwrap();
        std::fs::write(root.join(".env.local"), "RELCACHE_T_A=local\nRELCACHE_T_B=local\n").unwrap();
        std::fs::write(root.join(".env.production.local"), "RELCACHE_T_A=mode-local\n").unwrap();

        let env = ProjectEnv::load(root, "production").unwrap();
        assert_eq!(env.get("RELCACHE_T_A").as_deref(), Some("mode-local"));
        assert_eq!(env.get("RELCACHE_T_B").as_deref(), Some("local"));
        assert_eq!(env.get("RELCACHE_T_C").as_deref(), Some("mode"));
        assert_eq!(env.get("RELCACHE_T_D").as_deref(), Some("env"));
        assert_eq!(env.get("RELCACHE_T_MISSING"), None);
    }

    #[test]
    fn test_test_mode_skips_env_local() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::write(root.join(".env"), "RELCACHE_T_X=env\n").unwrap();
        std::fs::write(root.join(".env.local"), "RELCACHE_T_X=local\n").unwrap();

        assert_eq!(
            env_file_names("test"),
            vec![".env.test.local", ".env.test", ".env"]
        );
        let env = ProjectEnv::load(root, "test").unwrap();
        assert_eq!(env.get("RELCACHE_T_X").as_deref(), Some("env"));
    }

    #[test]
    fn test_empty_token_counts_as_unset() {
        let env = ProjectEnv::from_pairs([("RELCACHE_T_EMPTY", "")]);
        assert_eq!(env.get("RELCACHE_T_EMPTY"), None);
    }
}
