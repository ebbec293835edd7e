//! The default pipeline: reuse a cached build, or build (and publish) one.

use std::path::PathBuf;

use anyhow::{Context, Result};
use relcache_core::native::{BuildSpec, CommandBuilder, NativeBuilder};

use super::Project;
use crate::ui::Output;
use crate::{GlobalArgs, RunArgs};

/// Fingerprint the project, then either reuse a cached build or build one.
/// With `--publish` a fresh build is uploaded; a failed upload fails the run.
/// Prints the path of the build to use.
pub async fn run(args: &GlobalArgs, run: &RunArgs) -> Result<()> {
    let output = Output::new();
    let ctx = Project::load(args).await?;
    let fingerprint = ctx.fingerprint(args.fingerprint.as_deref()).await?;

    if run.cache_enabled() {
        if let Some(path) = ctx
            .provider
            .resolve_build_cache(&fingerprint, &ctx.run_options, ctx.platform)
            .await
        {
            output.success("Using cached build");
            output.result(&path.display().to_string());
            return Ok(());
        }
    } else {
        output.info("Build cache disabled (--no-cache)");
    }

    let binary = build(&ctx, run.log_file.clone()).await?;
    output.success(&format!("Built {}", binary.display()));

    if run.publish {
        super::publish::upload(&ctx, &output, &fingerprint, &binary).await?;
    }

    output.result(&binary.display().to_string());
    Ok(())
}

async fn build(ctx: &Project, log_path: Option<PathBuf>) -> Result<PathBuf> {
    let config = &ctx.provider.config().build;
    let builder = CommandBuilder::new(config.command.clone(), ctx.platform)
        .context("No cached build and no [build] command in relcache.toml")?;

    let spec = BuildSpec {
        project_root: ctx.provider.project_root().to_path_buf(),
        configuration: ctx.configuration.clone(),
        output_dir: config.output_dir.clone(),
        log_path,
    };

    let location = builder.build(&spec).await.context("Build failed")?;
    let binary = builder
        .locate_binary(&location)
        .await
        .with_context(|| format!("No {} build found in {}", ctx.platform, location.display()))?;
    Ok(binary)
}
