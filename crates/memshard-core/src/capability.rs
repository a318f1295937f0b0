//! Capability references attached to mutations, their validators, and
//! safety-flag normalization.
//!
//! The store has no knowledge of the capability taxonomy itself: it hands the
//! raw references of every mutation to an injected [`CapabilityValidator`] and
//! only ever records what the validator returns.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRef {
    pub capability_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl CapabilityRef {
    pub fn new(capability_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            capability_id: capability_id.into(),
            severity: Some(severity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("invalid capability reference: {0}")]
    Invalid(String),
    #[error("unknown capability reference '{0}'")]
    Unknown(String),
    #[error("capability '{capability_id}' has severity '{expected}', reference declared '{found}'")]
    SeverityMismatch {
        capability_id: String,
        expected: Severity,
        found: Severity,
    },
}

impl CapabilityError {
    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::Invalid(_) => "invalid_capability_reference",
            CapabilityError::Unknown(_) => "unknown_capability_reference",
            CapabilityError::SeverityMismatch { .. } => "capability_severity_mismatch",
        }
    }
}

/// Pure validation seam. Implementations must not depend on session state.
pub trait CapabilityValidator: Send + Sync {
    fn validate(&self, refs: &[CapabilityRef]) -> Result<Vec<CapabilityRef>, CapabilityError>;
}

pub type SharedValidator = Arc<dyn CapabilityValidator>;

/// Accepts any reference with a non-blank id.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapeValidator;

impl CapabilityValidator for ShapeValidator {
    fn validate(&self, refs: &[CapabilityRef]) -> Result<Vec<CapabilityRef>, CapabilityError> {
        let mut out = IndexMap::new();
        for (idx, cap) in refs.iter().enumerate() {
            let id = checked_id(idx, cap)?;
            out.insert(
                id.to_string(),
                CapabilityRef {
                    capability_id: id.to_string(),
                    severity: cap.severity,
                },
            );
        }
        Ok(out.into_values().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub capability_id: String,
    pub severity: Severity,
}

/// Closed set of known capabilities with their canonical severity.
#[derive(Debug, Default, Clone)]
pub struct CapabilityCatalog {
    entries: IndexMap<String, Severity>,
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = CatalogEntry>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.capability_id, entry.severity))
            .collect();
        Self { entries }
    }

    /// Parses a JSON array of `{capabilityId, severity}` entries.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(raw)?;
        Ok(Self::from_entries(entries))
    }

    pub fn with(mut self, capability_id: impl Into<String>, severity: Severity) -> Self {
        self.entries.insert(capability_id.into(), severity);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn severity_of(&self, capability_id: &str) -> Option<Severity> {
        self.entries.get(capability_id).copied()
    }
}

impl CapabilityValidator for CapabilityCatalog {
    fn validate(&self, refs: &[CapabilityRef]) -> Result<Vec<CapabilityRef>, CapabilityError> {
        let mut out = IndexMap::new();
        for (idx, cap) in refs.iter().enumerate() {
            let id = checked_id(idx, cap)?;
            let Some(expected) = self.severity_of(id) else {
                return Err(CapabilityError::Unknown(id.to_string()));
            };
            if let Some(found) = cap.severity {
                if found != expected {
                    return Err(CapabilityError::SeverityMismatch {
                        capability_id: id.to_string(),
                        expected,
                        found,
                    });
                }
            }
            out.insert(id.to_string(), CapabilityRef::new(id, expected));
        }
        Ok(out.into_values().collect())
    }
}

fn checked_id(idx: usize, cap: &CapabilityRef) -> Result<&str, CapabilityError> {
    let id = cap.capability_id.trim();
    if id.is_empty() {
        return Err(CapabilityError::Invalid(format!(
            "reference {idx} has a blank capabilityId"
        )));
    }
    Ok(id)
}

/// Folds validated refs into a session aggregate; the latest ref per id wins.
pub fn merge_references(aggregate: &mut IndexMap<String, CapabilityRef>, refs: &[CapabilityRef]) {
    for cap in refs {
        aggregate.insert(cap.capability_id.clone(), cap.clone());
    }
}

pub fn normalize_safety_flags<S: AsRef<str>>(flags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(flags.len());
    for flag in flags {
        let normalized = flag
            .as_ref()
            .trim()
            .to_lowercase()
            .split(|c: char| c.is_whitespace() || c == '_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if !normalized.is_empty() && !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}
