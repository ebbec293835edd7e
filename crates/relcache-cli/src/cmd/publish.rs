//! Publish command

use std::path::Path;

use anyhow::{Context, Result, bail};

use super::Project;
use crate::GlobalArgs;
use crate::ui::Output;

/// Publish the build at `path` under the current cache key.
pub async fn publish(args: &GlobalArgs, path: &Path) -> Result<()> {
    let output = Output::new();
    if !path.exists() {
        bail!("Build not found: {}", path.display());
    }
    let ctx = Project::load(args).await?;
    let fingerprint = ctx.fingerprint(args.fingerprint.as_deref()).await?;
    upload(&ctx, &output, &fingerprint, path).await
}

/// Upload and report. Failures propagate so the process exits non-zero.
pub(crate) async fn upload(
    ctx: &Project,
    output: &Output,
    fingerprint: &relcache_core::FingerprintHash,
    path: &Path,
) -> Result<()> {
    let url = ctx
        .provider
        .upload_build_cache(fingerprint, &ctx.run_options, path)
        .await
        .context("Release failed")?;

    match url {
        Some(url) => {
            output.success("Published build");
            output.result(&url);
        }
        None => output.warning("BUILD_CACHE_PROVIDER_TOKEN is not set; nothing published"),
    }
    Ok(())
}
