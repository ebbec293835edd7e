//! Cache key derivation.
//!
//! The cache key doubles as a local filename stem and a git tag name, so the
//! fingerprint it embeds is restricted to characters that are safe in both.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Suffix appended to keys of dev-client builds.
const DEV_CLIENT_SUFFIX: &str = ".dev-client";

/// Prefix of every cache key.
const KEY_PREFIX: &str = "fingerprint.";

/// Opaque fingerprint of the build-relevant project inputs (e.g. a hex digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FingerprintHash(String);

impl FingerprintHash {
    /// Create a validated `FingerprintHash`.
    ///
    /// Accepts ASCII alphanumerics plus `-` and `_`. A `.` is rejected since
    /// it separates the hash from the variant suffix in a [`CacheKey`].
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` is empty or contains a character that is
    /// not valid in both a file name and a git tag.
    pub fn new(s: impl Into<String>) -> Result<Self, String> {
        let s = s.into();
        if s.is_empty() {
            return Err("Invalid fingerprint: empty string".to_string());
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
        {
            return Err(format!(
                "Invalid fingerprint '{s}': character {bad:?} is not allowed"
            ));
        }
        Ok(Self(s))
    }

    /// Return the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FingerprintHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FingerprintHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for FingerprintHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

/// Key addressing one cached build, e.g. `fingerprint.abc123.dev-client`.
///
/// Only constructible through [`CacheKey::derive`], so the same inputs always
/// produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a fingerprint and build variant.
    pub fn derive(fingerprint: &FingerprintHash, is_dev_client: bool) -> Self {
        let suffix = if is_dev_client { DEV_CLIENT_SUFFIX } else { "" };
        Self(format!("{KEY_PREFIX}{fingerprint}{suffix}"))
    }

    /// Return the key as a tag / filename stem.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key was derived for a dev-client build.
    pub fn is_dev_client(&self) -> bool {
        self.0
            .strip_prefix(KEY_PREFIX)
            .is_some_and(|hash| hash.ends_with(DEV_CLIENT_SUFFIX))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Target platform of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// iOS app bundle.
    Ios,
    /// macOS app bundle.
    #[default]
    Macos,
    /// Android package.
    Android,
}

impl Platform {
    /// Whether this is an Apple platform (produces `.app` bundles).
    pub fn is_apple(self) -> bool {
        matches!(self, Self::Ios | Self::Macos)
    }

    /// File extension of the installable artifact.
    pub fn artifact_extension(self) -> &'static str {
        if self.is_apple() { "app" } else { "apk" }
    }

    /// Lowercase platform name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ios => "ios",
            Self::Macos => "macos",
            Self::Android => "android",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" => Ok(Self::Ios),
            "macos" => Ok(Self::Macos),
            "android" => Ok(Self::Android),
            other => Err(format!(
                "Unknown platform '{other}': expected ios, macos or android"
            )),
        }
    }
}
