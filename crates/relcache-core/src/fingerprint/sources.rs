//! Extra hash sources for macOS projects.
//!
//! The stock fingerprint tooling only knows about Android and iOS. For macOS
//! the inputs it would otherwise miss are collected here and handed to the
//! fingerprint command as `extraSources`.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FingerprintError, SourceSkips};
use crate::LOG_TARGET;

/// An input the fingerprint hashes in addition to its defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HashSource {
    /// A directory, hashed recursively.
    Dir {
        /// Path relative to the project root, `/`-separated.
        #[serde(rename = "filePath")]
        file_path: String,
        /// Why the source is hashed.
        reasons: Vec<String>,
    },
    /// A single file.
    File {
        /// Path relative to the project root, `/`-separated.
        #[serde(rename = "filePath")]
        file_path: String,
        /// Why the source is hashed.
        reasons: Vec<String>,
    },
    /// Inline contents identified by `id`.
    Contents {
        /// Stable identifier, e.g. `packageJson:scripts`.
        id: String,
        /// Hashed text.
        contents: String,
        /// Why the source is hashed.
        reasons: Vec<String>,
    },
}

impl HashSource {
    fn dir(file_path: impl Into<String>, reasons: &[&str]) -> Self {
        Self::Dir {
            file_path: file_path.into(),
            reasons: owned(reasons),
        }
    }

    fn contents(id: impl Into<String>, contents: impl Into<String>, reasons: &[&str]) -> Self {
        Self::Contents {
            id: id.into(),
            contents: contents.into(),
            reasons: owned(reasons),
        }
    }
}

fn owned(reasons: &[&str]) -> Vec<String> {
    reasons.iter().map(|r| (*r).to_string()).collect()
}

/// Ignore globs applied to macOS projects.
pub const MACOS_IGNORE_PATHS: &[&str] = &[
    "**/macos/Pods/**/*",
    "**/macos/build/**/*",
    "**/macos/.xcode.env.local",
    "**/macos/**/project.xcworkspace",
    "**/macos/*.xcworkspace/xcuserdata/**/*",
];

/// Packages whose `package.json` is always part of a macOS fingerprint.
const DEFAULT_PACKAGES: &[&str] = &["react-native-macos"];

/// What the gatherers need to know.
#[derive(Debug, Clone, Copy)]
pub struct GatherOptions {
    /// Whether `macos` is among the requested platforms.
    pub macos: bool,
    /// Inputs to leave out.
    pub source_skips: SourceSkips,
    /// `false` disables the React Native core autolinking gatherer.
    pub use_rn_core_autolinking_from_expo: bool,
}

type Gatherer<'a> = (&'static str, BoxFuture<'a, Result<Vec<HashSource>, FingerprintError>>);

/// Collect every extra source concurrently. A gatherer that fails is logged
/// and contributes nothing; the result keeps gatherer order.
pub async fn gather_macos_sources(project_root: &Path, options: GatherOptions) -> Vec<HashSource> {
    let gatherers: Vec<Gatherer<'_>> = vec![
        (
            "expo autolinking",
            expo_autolinking_sources(project_root, options).boxed(),
        ),
        (
            "package.json scripts",
            async move { Ok(package_json_script_sources(project_root, options.source_skips).await) }
                .boxed(),
        ),
        (
            "bare native dir",
            async move { Ok(bare_macos_sources(project_root, options).await) }.boxed(),
        ),
        (
            "react-native core autolinking",
            core_autolinking_sources(project_root, options).boxed(),
        ),
        (
            "default packages",
            async move { Ok(default_package_sources(project_root).await) }.boxed(),
        ),
    ];

    let (names, futures): (Vec<_>, Vec<_>) = gatherers.into_iter().unzip();
    let results = join_all(futures).await;

    names
        .into_iter()
        .zip(results)
        .flat_map(|(name, result)| match result {
            Ok(sources) => sources,
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, "Skipping {name} sources: {e}");
                Vec::new()
            }
        })
        .collect()
}

async fn expo_autolinking_sources(
    project_root: &Path,
    options: GatherOptions,
) -> Result<Vec<HashSource>, FingerprintError> {
    if !options.macos {
        return Ok(Vec::new());
    }
    let cli = resolve_autolinking_cli(project_root)?;
    let stdout = run_node(project_root, &cli, &["resolve", "-p", "apple", "--json"]).await?;
    let config: Value = serde_json::from_str(&stdout)?;
    Ok(expo_autolinking_sources_from_config(project_root, config))
}

/// Turn `expo-modules-autolinking resolve` output into sources. Pod directories
/// are rewritten relative to `project_root` in the embedded config as well.
pub fn expo_autolinking_sources_from_config(project_root: &Path, mut config: Value) -> Vec<HashSource> {
    const REASONS: &[&str] = &["expoAutolinkingMacos"];
    let mut results = Vec::new();

    if let Some(modules) = config.get_mut("modules").and_then(Value::as_array_mut) {
        for module in modules {
            let Some(pods) = module.get_mut("pods").and_then(Value::as_array_mut) else {
                continue;
            };
            for pod in pods {
                let Some(dir) = pod.get("podspecDir").and_then(Value::as_str) else {
                    continue;
                };
                let file_path = to_posix(&relative_path(project_root, Path::new(dir)));
                tracing::debug!(
                    target: LOG_TARGET,
                    "Adding expo-modules-autolinking macos dir - {file_path}"
                );
                pod["podspecDir"] = Value::String(file_path.clone());
                results.push(HashSource::dir(file_path, REASONS));
            }
        }
    }

    results.push(HashSource::contents(
        "expoAutolinkingConfig:macos",
        config.to_string(),
        REASONS,
    ));
    results
}

#[derive(Deserialize)]
struct ScriptsOnly {
    scripts: Option<BTreeMap<String, String>>,
}

async fn package_json_script_sources(project_root: &Path, skips: SourceSkips) -> Vec<HashSource> {
    if skips.contains(SourceSkips::PACKAGE_JSON_SCRIPTS_ALL) {
        return Vec::new();
    }
    let path = project_root.join("package.json");
    let parsed = match tokio::fs::read_to_string(&path).await {
        Ok(content) => serde_json::from_str::<ScriptsOnly>(&content).map_err(FingerprintError::from),
        Err(e) => Err(e.into()),
    };
    let scripts = match parsed {
        Ok(ScriptsOnly { scripts: Some(scripts) }) => scripts,
        Ok(_) => return Vec::new(),
        Err(e) => {
            tracing::debug!(
                target: LOG_TARGET,
                "Unable to read package.json from {}: {e}",
                path.display()
            );
            return Vec::new();
        }
    };

    tracing::debug!(target: LOG_TARGET, "Adding package.json contents - scripts");
    let id = "packageJson:scripts";
    vec![HashSource::contents(
        id,
        normalize_package_json_scripts(scripts, skips),
        &[id],
    )]
}

/// Serialise `scripts` the way `expo prebuild` sees them: with the platform
/// scripts skip active, `android`/`ios`/`macos` entries that do not invoke a
/// run command (or are exactly `expo run:<platform>`) are dropped.
pub fn normalize_package_json_scripts(
    mut scripts: BTreeMap<String, String>,
    skips: SourceSkips,
) -> String {
    if skips.contains(SourceSkips::PACKAGE_JSON_ANDROID_AND_IOS_SCRIPTS_IF_NOT_CONTAIN_RUN) {
        for platform in ["android", "ios", "macos"] {
            let keep = scripts
                .get(platform)
                .is_some_and(|s| s.contains("run") && *s != format!("expo run:{platform}"));
            if !keep {
                scripts.remove(platform);
            }
        }
    }
    serde_json::to_string(&scripts).unwrap_or_default()
}

async fn bare_macos_sources(project_root: &Path, options: GatherOptions) -> Vec<HashSource> {
    if !options.macos {
        return Vec::new();
    }
    let reasons = ["bareNativeDir"];
    match tokio::fs::metadata(project_root.join("macos")).await {
        Ok(meta) if meta.is_dir() => {
            tracing::debug!(target: LOG_TARGET, "Adding bare native dir - macos");
            vec![HashSource::dir("macos", &reasons)]
        }
        Ok(meta) if meta.is_file() => vec![HashSource::File {
            file_path: "macos".into(),
            reasons: owned(&reasons),
        }],
        _ => Vec::new(),
    }
}

async fn core_autolinking_sources(
    project_root: &Path,
    options: GatherOptions,
) -> Result<Vec<HashSource>, FingerprintError> {
    if !options.use_rn_core_autolinking_from_expo || !options.macos {
        return Ok(Vec::new());
    }
    let cli = resolve_autolinking_cli(project_root)?;
    let stdout = run_node(
        project_root,
        &cli,
        &["react-native-config", "--json", "--platform", "macos"],
    )
    .await?;
    let config: Value = serde_json::from_str(&stdout)?;
    Ok(core_autolinking_sources_from_config(&config))
}

/// Turn `react-native-config` output into sources. Dependency roots, and any
/// platform path under a dependency root, are made relative to the config
/// root. Dependencies without a root are skipped.
pub fn core_autolinking_sources_from_config(config: &Value) -> Vec<HashSource> {
    const REASONS: &[&str] = &["rncoreAutolinkingMacos"];
    let root = Path::new(config.get("root").and_then(Value::as_str).unwrap_or(""));
    let mut results = Vec::new();
    let mut stripped = serde_json::Map::new();

    if let Some(deps) = config.get("dependencies").and_then(Value::as_object) {
        for (name, data) in deps {
            let mut data = data.clone();
            match strip_absolute_paths(&mut data, root) {
                Some(file_path) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        "Adding react-native core autolinking dir for macos - {file_path}"
                    );
                    results.push(HashSource::dir(file_path, REASONS));
                    stripped.insert(name.clone(), data);
                }
                None => tracing::debug!(
                    target: LOG_TARGET,
                    "Error adding react-native core autolinking dir for macos - {name}: missing root"
                ),
            }
        }
    }

    results.push(HashSource::contents(
        "rncoreAutolinkingConfig:macos",
        Value::Object(stripped).to_string(),
        REASONS,
    ));
    results
}

/// Rewrite `dependency.root` and the platform paths beneath it relative to
/// `root`. Returns the new dependency root.
fn strip_absolute_paths(dependency: &mut Value, root: &Path) -> Option<String> {
    let dep_root = dependency.get("root")?.as_str()?.to_string();
    let relative_root = to_posix(&relative_path(root, Path::new(&dep_root)));
    dependency["root"] = Value::String(relative_root.clone());

    if let Some(platforms) = dependency.get_mut("platforms").and_then(Value::as_object_mut) {
        for platform_data in platforms.values_mut() {
            let Some(fields) = platform_data.as_object_mut() else {
                continue;
            };
            for value in fields.values_mut() {
                let rewritten = value
                    .as_str()
                    .filter(|s| s.starts_with(&dep_root))
                    .map(|s| to_posix(&relative_path(root, Path::new(s))));
                if let Some(rewritten) = rewritten {
                    *value = Value::String(rewritten);
                }
            }
        }
    }
    Some(relative_root)
}

async fn default_package_sources(project_root: &Path) -> Vec<HashSource> {
    let mut results = Vec::new();
    for package in DEFAULT_PACKAGES {
        let Some(path) = resolve_package_file(project_root, package, "package.json") else {
            continue;
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let id = format!("package:{package}");
                tracing::debug!(target: LOG_TARGET, "Adding package - {package}");
                results.push(HashSource::Contents {
                    reasons: vec![id.clone()],
                    id,
                    contents,
                });
            }
            Err(e) => tracing::debug!(
                target: LOG_TARGET,
                "Unable to read {}: {e}",
                path.display()
            ),
        }
    }
    results
}

/// Node-style lookup of `<package>/<file>` in `node_modules` directories from
/// `start` upwards.
pub fn resolve_package_file(start: &Path, package: &str, file: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join("node_modules").join(package).join(file))
        .find(|candidate| candidate.is_file())
}

fn resolve_autolinking_cli(project_root: &Path) -> Result<PathBuf, FingerprintError> {
    const CLI: &str = "bin/expo-modules-autolinking.js";
    resolve_package_file(project_root, "expo-modules-autolinking", CLI)
        .or_else(|| {
            // nested under expo when not hoisted
            let expo = resolve_package_file(project_root, "expo", "package.json")?;
            let expo_dir = expo.parent()?;
            resolve_package_file(expo_dir, "expo-modules-autolinking", CLI)
        })
        .ok_or_else(|| FingerprintError::NotInstalled("expo-modules-autolinking".into()))
}

async fn run_node(
    project_root: &Path,
    script: &Path,
    args: &[&str],
) -> Result<String, FingerprintError> {
    let node = which::which("node").map_err(|_| FingerprintError::NotInstalled("node".into()))?;
    let output = tokio::process::Command::new(&node)
        .arg(script)
        .args(args)
        .current_dir(project_root)
        .output()
        .await
        .map_err(|source| FingerprintError::Spawn {
            program: node.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(FingerprintError::Failed {
            program: node.display().to_string(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Lexical relative path from `base` to `target`. Falls back to `target`
/// when the two share no root.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();

    let anchored = |c: Option<&Component<'_>>| {
        matches!(c, Some(Component::Prefix(_) | Component::RootDir))
    };
    if base.first() != target.first() && anchored(target.first()) {
        return target.iter().collect();
    }

    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    out
}

fn to_posix(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn scripts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_hash_source_wire_shape() {
        let dir = serde_json::to_value(HashSource::dir("macos", &["bareNativeDir"])).unwrap();
        assert_eq!(
            dir,
            json!({"type": "dir", "filePath": "macos", "reasons": ["bareNativeDir"]})
        );
        let contents = serde_json::to_value(HashSource::contents("a", "b", &["a"])).unwrap();
        assert_eq!(contents["type"], "contents");
        assert_eq!(contents["id"], "a");
    }

    #[test]
    fn test_normalize_scripts_drops_platform_scripts_without_run() {
        let input = scripts(&[
            ("android", "expo run:android"),
            ("ios", "react-native run-ios --simulator X"),
            ("macos", "react-native-macos-init"),
            ("start", "expo start"),
        ]);
        let out = normalize_package_json_scripts(
            input.clone(),
            SourceSkips::PACKAGE_JSON_ANDROID_AND_IOS_SCRIPTS_IF_NOT_CONTAIN_RUN,
        );
        assert_eq!(
            out,
            r#"{"ios":"react-native run-ios --simulator X","start":"expo start"}"#
        );

        let untouched = normalize_package_json_scripts(input, SourceSkips::NONE);
        assert!(untouched.contains("expo run:android"));
        assert!(untouched.contains("react-native-macos-init"));
    }

    #[test]
    fn test_expo_autolinking_paths_made_relative() {
        let config = json!({
            "modules": [
                {"packageName": "expo-camera", "pods": [
                    {"podName": "ExpoCamera", "podspecDir": "/work/app/node_modules/expo-camera/ios"}
                ]},
                {"packageName": "hoisted", "pods": [
                    {"podName": "Hoisted", "podspecDir": "/work/node_modules/hoisted/ios"}
                ]}
            ]
        });
        let sources = expo_autolinking_sources_from_config(Path::new("/work/app"), config);

        assert_eq!(sources.len(), 3);
        assert_eq!(
            sources[0],
            HashSource::dir("node_modules/expo-camera/ios", &["expoAutolinkingMacos"])
        );
        assert_eq!(
            sources[1],
            HashSource::dir("../node_modules/hoisted/ios", &["expoAutolinkingMacos"])
        );
        let HashSource::Contents { id, contents, .. } = &sources[2] else {
            panic!("expected contents source");
        };
        assert_eq!(id, "expoAutolinkingConfig:macos");
        assert!(contents.contains(r#""podspecDir":"node_modules/expo-camera/ios""#));
        assert!(!contents.contains("/work/app"));
    }

    #[test]
    fn test_core_autolinking_strips_absolute_paths() {
        let config = json!({
            "root": "/work/app",
            "dependencies": {
                "react-native-svg": {
                    "root": "/work/app/node_modules/react-native-svg",
                    "platforms": {
                        "macos": {
                            "podspecPath": "/work/app/node_modules/react-native-svg/RNSVG.podspec",
                            "configurations": [],
                            "scriptPhases": "/elsewhere/phase.sh"
                        },
                        "android": null
                    }
                },
                "broken": {"platforms": {}}
            }
        });
        let sources = core_autolinking_sources_from_config(&config);

        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            HashSource::dir("node_modules/react-native-svg", &["rncoreAutolinkingMacos"])
        );
        let HashSource::Contents { id, contents, .. } = &sources[1] else {
            panic!("expected contents source");
        };
        assert_eq!(id, "rncoreAutolinkingConfig:macos");
        let parsed: Value = serde_json::from_str(contents).unwrap();
        let svg = &parsed["react-native-svg"];
        assert_eq!(svg["root"], "node_modules/react-native-svg");
        assert_eq!(
            svg["platforms"]["macos"]["podspecPath"],
            "node_modules/react-native-svg/RNSVG.podspec"
        );
        assert_eq!(svg["platforms"]["macos"]["scriptPhases"], "/elsewhere/phase.sh");
        assert!(parsed.get("broken").is_none());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/b/c/d")),
            PathBuf::from("c/d")
        );
        assert_eq!(
            relative_path(Path::new("/a/b"), Path::new("/a/x")),
            PathBuf::from("../x")
        );
        assert_eq!(relative_path(Path::new("/a"), Path::new("/a")), PathBuf::new());
    }

    #[tokio::test]
    async fn test_gather_without_node_modules() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("macos")).unwrap();
        std::fs::write(
            root.join("package.json"),
            r#"{"scripts":{"macos":"react-native run-macos","start":"expo start"}}"#,
        )
        .unwrap();
        std::fs::create_dir_all(root.join("node_modules/react-native-macos")).unwrap();
        std::fs::write(
            root.join("node_modules/react-native-macos/package.json"),
            r#"{"name":"react-native-macos","version":"0.79.0"}"#,
        )
        .unwrap();

        let sources = gather_macos_sources(
            root,
            GatherOptions {
                macos: true,
                source_skips: SourceSkips::default(),
                use_rn_core_autolinking_from_expo: true,
            },
        )
        .await;

        let ids: Vec<String> = sources
            .iter()
            .map(|s| match s {
                HashSource::Dir { file_path, .. } | HashSource::File { file_path, .. } => {
                    file_path.clone()
                }
                HashSource::Contents { id, .. } => id.clone(),
            })
            .collect();
        assert_eq!(
            ids,
            vec!["packageJson:scripts", "macos", "package:react-native-macos"]
        );
    }

    #[tokio::test]
    async fn test_gather_skips_macos_sources_for_other_platforms() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("macos")).unwrap();
        let sources = gather_macos_sources(
            dir.path(),
            GatherOptions {
                macos: false,
                source_skips: SourceSkips::PACKAGE_JSON_SCRIPTS_ALL,
                use_rn_core_autolinking_from_expo: true,
            },
        )
        .await;
        assert!(sources.is_empty());
    }
}
