//! relcache - reuse native app builds through GitHub Releases

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

use relcache_cli::cmd;
use relcache_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage errors exit 1; help and version exit 0
            let code = match e.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayVersion
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 0,
                _ => 1,
            };
            e.print()?;
            std::process::exit(code);
        }
    };

    init_logging(cli.global.verbose);

    match cli.command {
        None => cmd::run::run(&cli.global, &cli.run).await,
        Some(Commands::Key) => cmd::key::key(&cli.global).await,
        Some(Commands::Resolve) => cmd::resolve::resolve(&cli.global).await,
        Some(Commands::Publish { path }) => cmd::publish::publish(&cli.global, &path).await,
        Some(Commands::Clean { dry_run }) => cmd::clean::clean(dry_run),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "build_cache=info,warn",
        1 => "build_cache=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
