use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use memshard_host::cli::{Cli, Command, ServeArgs};
use memshard_host::config::load_env_file;
use memshard_host::{HostConfig, app, http};

fn main() -> Result<()> {
    // Before the runtime starts any threads, and before clap reads env fallbacks.
    let cwd = std::env::current_dir().context("resolve working directory")?;
    load_env_file(&cwd)?;

    let cli = Cli::parse();
    setup_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    match cli.command {
        Command::Serve(args) => runtime.block_on(serve(args)),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut cfg = HostConfig::from_env()?;
    args.apply(&mut cfg);
    let store = Arc::new(cfg.build_store()?);
    tracing::info!(
        feed_limit = cfg.store.change_feed_limit,
        catalog = cfg.capability_catalog.is_some(),
        "session store ready"
    );
    http::serve(cfg.bind, app(store), http::shutdown_signal()).await?;
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();
}
