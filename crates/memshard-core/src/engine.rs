//! The single choke point every shard write passes through.
//!
//! [`Session::mutate_shard`] runs a transform against a deep copy of the shard
//! payload, decides whether anything changed and, only then, bumps the
//! revision, appends the change entry and folds capability references into
//! the session aggregate. Capability validation happens before anything is
//! touched so a rejected call leaves the session exactly as it was.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::{
    CapabilityRef, CapabilityValidator, merge_references, normalize_safety_flags,
};
use crate::clock::{Clock, Timestamp};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeAction, ChangeEntry, Cursor, Scope};
use crate::session::Session;
use crate::shard::{DEFAULT_ACTOR, ShardKind};

/// Collaborators a mutation needs besides the session itself.
#[derive(Clone, Copy)]
pub struct MutationContext<'a> {
    pub validator: &'a dyn CapabilityValidator,
    pub clock: &'a dyn Clock,
    pub config: &'a StoreConfig,
}

impl MutationContext<'_> {
    pub(crate) fn timestamp(&self, meta: &MutationMeta) -> Timestamp {
        meta.timestamp.unwrap_or_else(|| self.clock.now_ms())
    }
}

/// Provenance carried by a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MutationMeta {
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub action: ChangeAction,
    pub capability_refs: Vec<CapabilityRef>,
    pub safety_flags: Vec<String>,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<u64>,
}

impl Default for MutationMeta {
    fn default() -> Self {
        Self {
            actor: DEFAULT_ACTOR.to_string(),
            reason: None,
            action: ChangeAction::Update,
            capability_refs: Vec::new(),
            safety_flags: Vec::new(),
            scope: Scope::Ephemeral,
            timestamp: None,
            metadata: Value::Object(Map::new()),
            expected_revision: None,
        }
    }
}

impl MutationMeta {
    pub fn new(action: ChangeAction) -> Self {
        Self {
            action,
            ..Self::default()
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn capability(mut self, cap: CapabilityRef) -> Self {
        self.capability_refs.push(cap);
        self
    }

    pub fn safety_flag(mut self, flag: impl Into<String>) -> Self {
        self.safety_flags.push(flag.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn expect_revision(mut self, revision: u64) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    /// Sets one metadata key, turning non-object metadata into an object.
    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }
}

/// What a transform reports back. `next: None` keeps the edited working copy;
/// `changed: None` defers to structural comparison of before and after.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub next: Option<Value>,
    pub changed: Option<bool>,
}

impl Transformed {
    pub fn in_place() -> Self {
        Self::default()
    }

    pub fn replace(next: Value) -> Self {
        Self {
            next: Some(next),
            changed: None,
        }
    }

    pub fn changed(mut self, changed: bool) -> Self {
        self.changed = Some(changed);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub changed: bool,
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceOutcome {
    pub changed: bool,
    pub revision: u64,
    pub updated_at: Timestamp,
    pub updated_by: String,
}

impl Session {
    pub fn mutate_shard<F>(
        &mut self,
        ctx: MutationContext<'_>,
        kind: ShardKind,
        meta: &MutationMeta,
        transform: F,
    ) -> StoreResult<MutationOutcome>
    where
        F: FnOnce(&mut Value) -> Transformed,
    {
        let validated = ctx.validator.validate(&meta.capability_refs).map_err(|err| {
            log::warn!(
                "session {} rejected {} write on {kind}: {err}",
                self.id,
                meta.action
            );
            StoreError::from(err)
        })?;

        let shard = self.shard(kind)?;
        let current_revision = shard.revision;
        let before = shard.data.clone();
        let mut working = before.clone();
        let hint = transform(&mut working);
        let after = hint.next.unwrap_or(working);
        let changed = hint.changed.unwrap_or_else(|| before != after);

        if !changed {
            merge_references(&mut self.capability_references, &validated);
            log::trace!(
                "session {} no-op {} on {kind} at revision {current_revision}",
                self.id,
                meta.action
            );
            return Ok(MutationOutcome {
                changed: false,
                revision: current_revision,
                cursor: None,
            });
        }

        let at = ctx.timestamp(meta);
        let safety_flags = normalize_safety_flags(&meta.safety_flags);
        let revision = self.shard_mut(kind)?.commit(after.clone(), &meta.actor, at);
        let cursor = self.feed.append(ChangeEntry {
            cursor: 0,
            shard: kind.to_string(),
            action: meta.action.clone(),
            actor: meta.actor.clone(),
            reason: meta.reason.clone(),
            metadata: meta.metadata.clone(),
            capability_refs: validated.clone(),
            safety_flags,
            revision,
            scope: meta.scope,
            at,
            before,
            after,
        });
        merge_references(&mut self.capability_references, &validated);
        self.refresh_aliases();
        log::debug!(
            "session {} {} on {kind} -> revision {revision} cursor {cursor}",
            self.id,
            meta.action
        );
        Ok(MutationOutcome {
            changed: true,
            revision,
            cursor: Some(cursor),
        })
    }

    /// Wholesale client replace guarded by scope and compare-and-swap on the
    /// shard revision.
    pub fn replace_shard(
        &mut self,
        ctx: MutationContext<'_>,
        kind: ShardKind,
        payload: Value,
        meta: &MutationMeta,
    ) -> StoreResult<ReplaceOutcome> {
        if meta.scope != Scope::Ephemeral {
            log::warn!(
                "session {} refused {} replace of {kind}",
                self.id,
                meta.scope
            );
            return Err(StoreError::CanonicalWriteNotAllowed { scope: meta.scope });
        }
        let current = self.shard(kind)?.revision;
        if let Some(expected) = meta.expected_revision {
            if expected != current {
                log::warn!(
                    "session {} stale replace of {kind}: current {current}, expected {expected}",
                    self.id
                );
                return Err(StoreError::RevisionMismatch { current, expected });
            }
        }

        let mut meta = meta.clone();
        if meta.action == ChangeAction::Update {
            meta.action = ChangeAction::Replace;
        }
        let outcome = self.mutate_shard(ctx, kind, &meta, |_| Transformed::replace(payload))?;
        let shard = self.shard(kind)?;
        Ok(ReplaceOutcome {
            changed: outcome.changed,
            revision: shard.revision,
            updated_at: shard.updated_at,
            updated_by: shard.updated_by.clone(),
        })
    }
}
