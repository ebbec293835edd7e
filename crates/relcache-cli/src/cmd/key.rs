//! Key command

use anyhow::Result;

use super::Project;
use crate::GlobalArgs;
use crate::ui::Output;

/// Print the fingerprint, cache key and local cache path.
pub async fn key(args: &GlobalArgs) -> Result<()> {
    let output = Output::new();
    let ctx = Project::load(args).await?;
    let fingerprint = ctx.fingerprint(args.fingerprint.as_deref()).await?;
    let key = ctx.provider.cache_key(&fingerprint, &ctx.run_options);

    output.info(&format!("Fingerprint: {fingerprint}"));
    output.info(&format!(
        "Local path: {}",
        ctx.provider.local().path_for(&key, ctx.platform).display()
    ));
    output.result(key.as_str());
    Ok(())
}
