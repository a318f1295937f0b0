use thiserror::Error;

use crate::capability::CapabilityError;
use crate::feed::Scope;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown shard '{0}'")]
    UnknownShard(String),
    #[error("shard '{shard}' unavailable in session '{session_id}'")]
    ShardUnavailable { session_id: String, shard: String },
    #[error("revision mismatch: current {current}, expected {expected}")]
    RevisionMismatch { current: u64, expected: u64 },
    #[error("writes under scope '{scope}' must go through a domain mutator")]
    CanonicalWriteNotAllowed { scope: Scope },
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("unknown check '{0}'")]
    UnknownCheck(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl StoreError {
    /// Stable machine-readable code, surfaced verbatim by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::UnknownShard(_) => "unknown_shard",
            StoreError::ShardUnavailable { .. } => "shard_unavailable",
            StoreError::RevisionMismatch { .. } => "revision_mismatch",
            StoreError::CanonicalWriteNotAllowed { .. } => "canonical_write_not_allowed",
            StoreError::Capability(err) => err.code(),
            StoreError::UnknownCheck(_) => "unknown_check",
            StoreError::InvalidPayload(_) => "invalid_payload",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
