//! Clean command

use std::path::Path;

use anyhow::{Context, Result};

use crate::ui::Output;

/// Remove the scratch root: cached builds, downloads and temporary archives.
pub fn clean(dry_run: bool) -> Result<()> {
    clean_dir(&relcache_core::scratch_root(), dry_run)
}

fn clean_dir(dir: &Path, dry_run: bool) -> Result<()> {
    let output = Output::new();

    if !dir.exists() {
        output.success("Nothing to clean.");
        return Ok(());
    }

    if dry_run {
        output.info(&format!("Would remove {}", dir.display()));
        return Ok(());
    }

    output.info(&format!("Removing {}...", dir.display()));
    std::fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    output.success("Scratch directory is clean.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clean_removes_scratch() {
        let tmp = TempDir::new().unwrap();
        let scratch = tmp.path().join("relcache");
        std::fs::create_dir_all(scratch.join("build-run-cache/fingerprint.abc.app")).unwrap();

        clean_dir(&scratch, true).unwrap();
        assert!(scratch.exists());

        clean_dir(&scratch, false).unwrap();
        assert!(!scratch.exists());

        clean_dir(&scratch, false).unwrap();
    }
}
