//! skyftp command line entry point.

mod cli;
mod commands;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Results go to stdout; logs share stderr with the progress bar.
    let default_filter = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.global.config.as_deref())?.apply(&cli.global);
    tracing::debug!(
        host = %config.host,
        chunk_size = config.chunk_size,
        backend = %config.backend,
        "configuration resolved"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(commands::run(cli.command, config, cli.global.json))
}
