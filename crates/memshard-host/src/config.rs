use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memshard_core::{
    CapabilityCatalog, SessionStore, ShapeValidator, SharedValidator, StoreConfig, SystemClock,
};

use crate::error::HostError;

pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    7878,
);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bind: SocketAddr,
    /// JSON array of `{capabilityId, severity}`; without it any non-blank
    /// capability id is accepted.
    pub capability_catalog: Option<PathBuf>,
    pub store: StoreConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND,
            capability_catalog: None,
            store: StoreConfig::default(),
        }
    }
}

impl HostConfig {
    /// Defaults overlaid with `MEMSHARD_*` environment variables.
    pub fn from_env() -> Result<Self, HostError> {
        let mut cfg = Self {
            store: StoreConfig::from_env(),
            ..Self::default()
        };
        if let Ok(raw) = std::env::var("MEMSHARD_BIND") {
            cfg.bind = raw
                .trim()
                .parse()
                .map_err(|err| HostError::Config(format!("MEMSHARD_BIND '{raw}': {err}")))?;
        }
        if let Some(path) = std::env::var_os("MEMSHARD_CAPABILITY_CATALOG") {
            if !path.is_empty() {
                cfg.capability_catalog = Some(PathBuf::from(path));
            }
        }
        Ok(cfg)
    }

    pub fn validator(&self) -> Result<SharedValidator, HostError> {
        match &self.capability_catalog {
            Some(path) => {
                let catalog = load_catalog(path)?;
                tracing::info!(
                    path = %path.display(),
                    entries = catalog.len(),
                    "loaded capability catalog"
                );
                Ok(Arc::new(catalog))
            }
            None => Ok(Arc::new(ShapeValidator)),
        }
    }

    pub fn build_store(&self) -> Result<SessionStore, HostError> {
        Ok(SessionStore::with_parts(
            self.store.clone(),
            self.validator()?,
            Arc::new(SystemClock),
        ))
    }
}

pub fn load_catalog(path: &Path) -> Result<CapabilityCatalog, HostError> {
    let raw = fs::read_to_string(path).map_err(|source| HostError::CatalogRead {
        path: path.to_path_buf(),
        source,
    })?;
    CapabilityCatalog::from_json_str(&raw).map_err(|source| HostError::CatalogFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads `.env` from `dir` without overriding variables already set.
///
/// Must run before any other thread is started.
pub fn load_env_file(dir: &Path) -> Result<(), HostError> {
    let env_path = dir.join(".env");
    if !env_path.exists() {
        return Ok(());
    }
    for item in dotenvy::from_path_iter(&env_path)? {
        let (key, val) = item?;
        if std::env::var_os(&key).is_none() {
            unsafe {
                std::env::set_var(&key, &val);
            }
        }
    }
    Ok(())
}
