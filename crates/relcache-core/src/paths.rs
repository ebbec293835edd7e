//! Scratch directory layout.

use std::path::PathBuf;

/// Name of the directory holding committed builds under the scratch root.
pub const BUILD_RUN_CACHE_DIR: &str = "build-run-cache";

/// Returns the scratch root: `$RELCACHE_SCRATCH_DIR`, or `<system temp>/relcache`.
pub fn scratch_root() -> PathBuf {
    if let Some(val) = std::env::var_os("RELCACHE_SCRATCH_DIR") {
        if !val.is_empty() {
            return PathBuf::from(val);
        }
    }
    std::env::temp_dir().join("relcache")
}

/// Committed builds: <scratch>/build-run-cache
pub fn build_run_cache_path() -> PathBuf {
    scratch_root().join(BUILD_RUN_CACHE_DIR)
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or("");
    path.split('/').next_back().unwrap_or("")
}
