//! Dev-client build detection.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Package whose presence makes debug builds dev-client builds.
pub const DEV_CLIENT_PACKAGE: &str = "expo-dev-client";

/// Run configuration of the surrounding build.
///
/// Android runs set `variant` (`debug`, `release`), Apple runs set
/// `configuration` (`Debug`, `Release`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Gradle build variant.
    pub variant: Option<String>,
    /// Xcode build configuration.
    pub configuration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    #[serde(default)]
    dependencies: HashMap<String, serde_json::Value>,
    #[serde(default)]
    dev_dependencies: HashMap<String, serde_json::Value>,
}

/// Whether `package.json` in `project_root` lists the dev-client package in
/// `dependencies` or `devDependencies`. Unreadable manifests count as "no".
pub fn has_direct_dev_client_dependency(project_root: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(project_root.join("package.json")) else {
        return false;
    };
    let Ok(manifest) = serde_json::from_str::<PackageJson>(&content) else {
        tracing::debug!(
            target: crate::LOG_TARGET,
            "Unable to parse package.json in {}",
            project_root.display()
        );
        return false;
    };
    [&manifest.dependencies, &manifest.dev_dependencies]
        .iter()
        .any(|deps| deps.get(DEV_CLIENT_PACKAGE).is_some_and(is_truthy))
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null | serde_json::Value::Bool(false) => false,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Dev-client builds are debug builds of projects depending on the dev
/// client. Without an explicit variant or configuration the build is assumed
/// to be a debug build.
pub fn is_dev_client_build(project_root: &Path, run_options: &RunOptions) -> bool {
    if !has_direct_dev_client_dependency(project_root) {
        return false;
    }
    if let Some(variant) = &run_options.variant {
        return variant == "debug";
    }
    if let Some(configuration) = &run_options.configuration {
        return configuration == "Debug";
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project(package_json: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), package_json).unwrap();
        dir
    }

    fn opts(variant: Option<&str>, configuration: Option<&str>) -> RunOptions {
        RunOptions {
            variant: variant.map(String::from),
            configuration: configuration.map(String::from),
        }
    }

    #[test]
    fn test_without_dependency_never_dev_client() {
        let dir = project(r#"{"dependencies":{"expo":"~53.0.0"}}"#);
        assert!(!is_dev_client_build(dir.path(), &opts(None, Some("Debug"))));
        assert!(!is_dev_client_build(dir.path(), &RunOptions::default()));
    }

    #[test]
    fn test_missing_package_json() {
        let dir = TempDir::new().unwrap();
        assert!(!has_direct_dev_client_dependency(dir.path()));
    }

    #[test]
    fn test_dev_dependency_counts() {
        let dir = project(r#"{"devDependencies":{"expo-dev-client":"~5.0.0"}}"#);
        assert!(has_direct_dev_client_dependency(dir.path()));
    }

    #[test]
    fn test_variant_and_configuration_precedence() {
        let dir = project(r#"{"dependencies":{"expo-dev-client":"~5.0.0"}}"#);
        let root = dir.path();

        assert!(is_dev_client_build(root, &RunOptions::default()));
        assert!(is_dev_client_build(root, &opts(Some("debug"), None)));
        assert!(!is_dev_client_build(root, &opts(Some("release"), None)));
        assert!(is_dev_client_build(root, &opts(None, Some("Debug"))));
        assert!(!is_dev_client_build(root, &opts(None, Some("Release"))));
        // variant wins over configuration
        assert!(!is_dev_client_build(root, &opts(Some("release"), Some("Debug"))));
    }
}
