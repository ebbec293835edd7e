//! Native builds on a cache miss.
//!
//! relcache does not know how to build an app. A [`NativeBuilder`] runs the
//! project's own toolchain and reports where the products landed;
//! [`CommandBuilder`] does that with a configured argv such as
//!
//! ```text
//! xcodebuild -workspace macos/App.xcworkspace -configuration {configuration} -derivedDataPath build
//! ./gradlew assemble{configuration}
//! ```
//!
//! `{configuration}` is replaced by the run configuration (`Debug`, `Release`).

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::archive::{self, ArchiveError};
use crate::key::Platform;
use crate::LOG_TARGET;

/// Placeholder in build argv replaced by the configuration.
pub const CONFIGURATION_PLACEHOLDER: &str = "{configuration}";

/// Lines of the build log shown when a build fails.
const LOG_TAIL_LINES: usize = 20;

/// Errors running a native build.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Filesystem or process failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// `[build] command` is empty.
    #[error("No build command configured")]
    NotConfigured,

    /// The build program could not be resolved.
    #[error("Build tool '{0}' not found in PATH")]
    ToolNotFound(String),

    /// The build exited unsuccessfully.
    #[error("Build failed with exit code {code:?}{}", .tail.as_deref().map(|t| format!("\n{t}")).unwrap_or_default())]
    Failed {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Last lines of the build log, when output went to a file.
        tail: Option<String>,
    },

    /// The build succeeded but left no output directory.
    #[error("Build output not found: {0}")]
    OutputMissing(PathBuf),

    /// Locating the binary failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// One build invocation.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Working directory of the build.
    pub project_root: PathBuf,
    /// `Debug`, `Release`, ...
    pub configuration: String,
    /// Where products are expected, relative to `project_root` unless absolute.
    pub output_dir: PathBuf,
    /// Send build output here instead of the terminal.
    pub log_path: Option<PathBuf>,
}

impl BuildSpec {
    fn output_location(&self) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            self.project_root.join(&self.output_dir)
        }
    }
}

/// Produces native builds.
#[async_trait]
pub trait NativeBuilder: Send + Sync {
    /// Run a build and return the directory holding its products.
    async fn build(&self, spec: &BuildSpec) -> Result<PathBuf, BuildError>;

    /// The installable binary (`.app` bundle or `.apk`) under `location`.
    async fn locate_binary(&self, location: &Path) -> Result<PathBuf, BuildError>;
}

/// [`NativeBuilder`] running a configured command.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    argv: Vec<String>,
    platform: Platform,
}

impl CommandBuilder {
    /// Builder running `argv` for `platform`. Fails when `argv` is empty.
    pub fn new(argv: Vec<String>, platform: Platform) -> Result<Self, BuildError> {
        if argv.is_empty() {
            return Err(BuildError::NotConfigured);
        }
        Ok(Self { argv, platform })
    }

    /// Argv with the configuration substituted.
    pub fn command_line(&self, configuration: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| arg.replace(CONFIGURATION_PLACEHOLDER, configuration))
            .collect()
    }
}

#[async_trait]
impl NativeBuilder for CommandBuilder {
    async fn build(&self, spec: &BuildSpec) -> Result<PathBuf, BuildError> {
        let argv = self.command_line(&spec.configuration);
        let (program, args) = argv.split_first().ok_or(BuildError::NotConfigured)?;
        let program_path = which::which(program)
            .or_else(|_| which::which_in(program, std::env::var_os("PATH"), &spec.project_root))
            .map_err(|_| BuildError::ToolNotFound(program.clone()))?;

        tracing::info!(target: LOG_TARGET, "Building: {}", argv.join(" "));

        let mut cmd = tokio::process::Command::new(&program_path);
        cmd.args(args).current_dir(&spec.project_root);

        let status = match &spec.log_path {
            None => cmd.status().await?,
            Some(log_path) => {
                if let Some(parent) = log_path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let log_file = std::fs::File::create(log_path)?;
                cmd.stdout(Stdio::from(log_file.try_clone()?))
                    .stderr(Stdio::from(log_file))
                    .status()
                    .await?
            }
        };

        if !status.success() {
            let tail = spec
                .log_path
                .as_deref()
                .and_then(|p| read_last_lines(p, LOG_TAIL_LINES).ok());
            return Err(BuildError::Failed {
                code: status.code(),
                tail,
            });
        }

        let location = spec.output_location();
        if !location.exists() {
            return Err(BuildError::OutputMissing(location));
        }
        Ok(location)
    }

    async fn locate_binary(&self, location: &Path) -> Result<PathBuf, BuildError> {
        let dir = location.to_path_buf();
        let ext = self.platform.artifact_extension();
        let found = tokio::task::spawn_blocking(move || archive::find_app(&dir, ext))
            .await
            .map_err(io::Error::other)??;
        tracing::debug!(target: LOG_TARGET, "Located build at {}", found.display());
        Ok(found)
    }
}

fn read_last_lines(path: &Path, n: usize) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    let lines: Vec<String> = io::BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(root: &Path, output_dir: &str) -> BuildSpec {
        BuildSpec {
            project_root: root.to_path_buf(),
            configuration: "Release".into(),
            output_dir: PathBuf::from(output_dir),
            log_path: None,
        }
    }

    #[test]
    fn test_configuration_substitution() {
        let builder = CommandBuilder::new(
            vec!["./gradlew".into(), "assemble{configuration}".into()],
            Platform::Android,
        )
        .unwrap();
        assert_eq!(
            builder.command_line("Release"),
            vec!["./gradlew", "assembleRelease"]
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandBuilder::new(Vec::new(), Platform::Macos),
            Err(BuildError::NotConfigured)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_and_locate_app() {
        let dir = TempDir::new().unwrap();
        let builder = CommandBuilder::new(
            vec![
                "sh".into(),
                "-c".into(),
                "mkdir -p out/{configuration}/Demo.app && echo hi > out/{configuration}/Demo.app/Info.plist".into(),
            ],
            Platform::Macos,
        )
        .unwrap();

        let location = builder.build(&spec(dir.path(), "out")).await.unwrap();
        assert_eq!(location, dir.path().join("out"));

        let app = builder.locate_binary(&location).await.unwrap();
        assert_eq!(app, dir.path().join("out/Release/Demo.app"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_reports_log_tail() {
        let dir = TempDir::new().unwrap();
        let builder = CommandBuilder::new(
            vec!["sh".into(), "-c".into(), "echo compiling; echo 'error: no signing identity'; exit 65".into()],
            Platform::Ios,
        )
        .unwrap();
        let mut spec = spec(dir.path(), "build");
        spec.log_path = Some(dir.path().join("logs/build.log"));

        let err = builder.build(&spec).await.unwrap_err();
        match err {
            BuildError::Failed { code, tail } => {
                assert_eq!(code, Some(65));
                assert!(tail.unwrap().contains("no signing identity"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_dir() {
        let dir = TempDir::new().unwrap();
        let builder = CommandBuilder::new(vec!["true".into()], Platform::Android).unwrap();
        let err = builder.build(&spec(dir.path(), "nowhere")).await.unwrap_err();
        assert!(matches!(err, BuildError::OutputMissing(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dir = TempDir::new().unwrap();
        let builder =
            CommandBuilder::new(vec!["relcache-no-such-tool".into()], Platform::Macos).unwrap();
        let err = builder.build(&spec(dir.path(), "build")).await.unwrap_err();
        assert!(matches!(err, BuildError::ToolNotFound(_)));
    }
}
