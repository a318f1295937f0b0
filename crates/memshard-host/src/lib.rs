//! HTTP host for the session shard store.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;

pub use config::HostConfig;
pub use error::HostError;
pub use http::{HttpState, app};
