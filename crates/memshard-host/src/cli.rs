use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::HostConfig;

#[derive(Parser, Debug)]
#[command(name = "memshard", version, about = "Session shard store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the memory API over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "MEMSHARD_BIND")]
    pub bind: Option<SocketAddr>,

    /// Capability catalog (JSON array of {capabilityId, severity})
    #[arg(long, env = "MEMSHARD_CAPABILITY_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Change entries retained per session
    #[arg(long, env = "MEMSHARD_CHANGE_FEED_LIMIT")]
    pub feed_limit: Option<usize>,
}

impl ServeArgs {
    /// Flags win over whatever the environment produced.
    pub fn apply(&self, cfg: &mut HostConfig) {
        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if let Some(catalog) = &self.catalog {
            cfg.capability_catalog = Some(catalog.clone());
        }
        if let Some(limit) = self.feed_limit {
            cfg.store.change_feed_limit = limit.max(1);
        }
    }
}
