//! Resolve command

use anyhow::Result;

use super::Project;
use crate::GlobalArgs;
use crate::ui::Output;

/// Print the path of a cached build. A miss is not an error.
pub async fn resolve(args: &GlobalArgs) -> Result<()> {
    let output = Output::new();
    let ctx = Project::load(args).await?;
    let fingerprint = ctx.fingerprint(args.fingerprint.as_deref()).await?;

    match ctx
        .provider
        .resolve_build_cache(&fingerprint, &ctx.run_options, ctx.platform)
        .await
    {
        Some(path) => output.result(&path.display().to_string()),
        None => output.warning("No cached build for this fingerprint"),
    }
    Ok(())
}
