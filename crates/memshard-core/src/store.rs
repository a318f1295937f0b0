//! Process-wide session map and the per-session handles that serialize access.
//!
//! Two lock levels: the map itself sits behind an `RwLock` that is only held
//! for lookup/creation, and each session owns a `Mutex` held for the whole
//! read-modify-write of a mutation or the deep clone of a projection.
//! Different sessions never contend with each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde_json::Value;

use crate::capability::{CapabilityRef, SharedValidator, ShapeValidator};
use crate::checks::{CheckBoard, CheckResolution, PendingCheck, ResolvedCheck, VetoedCheck};
use crate::clock::{SharedClock, SystemClock};
use crate::config::StoreConfig;
use crate::engine::{MutationContext, MutationMeta, MutationOutcome, ReplaceOutcome, Transformed};
use crate::error::StoreResult;
use crate::feed::{AckOutcome, ChangeWindow, Cursor};
use crate::mutators::inventory::{InventoryDelta, InventoryOutcome};
use crate::mutators::momentum::{MomentumAdjustment, MomentumOutcome};
use crate::mutators::stats::{StatAdjustmentRecord, StatOutcome};
use crate::mutators::transcript::{NewTranscriptEntry, TranscriptAppend, TranscriptEntry};
use crate::mutators::{CommandOutcome, ShardCommand};
use crate::projection::{SessionOverlay, ShardSnapshot};
use crate::session::Session;
use crate::shard::ShardKind;

struct StoreShared {
    config: StoreConfig,
    validator: SharedValidator,
    clock: SharedClock,
}

impl StoreShared {
    fn ctx(&self) -> MutationContext<'_> {
        MutationContext {
            validator: self.validator.as_ref(),
            clock: self.clock.as_ref(),
            config: &self.config,
        }
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    shared: Arc<StoreShared>,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl SessionStore {
    /// Store with the permissive [`ShapeValidator`] and the system clock.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_parts(config, Arc::new(ShapeValidator), Arc::new(SystemClock))
    }

    pub fn with_parts(config: StoreConfig, validator: SharedValidator, clock: SharedClock) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            shared: Arc::new(StoreShared {
                config: config.normalized(),
                validator,
                clock,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Returns the session's handle, seeding a fresh session on first access.
    pub fn get_or_create(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.get(session_id) {
            return handle;
        }
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                log::debug!("creating session {session_id}");
                let now = self.shared.clock.now_ms();
                SessionHandle {
                    id: session_id.to_string(),
                    inner: Arc::new(Mutex::new(Session::new(
                        session_id,
                        &self.shared.config,
                        now,
                    ))),
                    shared: self.shared.clone(),
                }
            })
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn replace_shard(
        &self,
        session_id: &str,
        shard: &str,
        payload: Value,
        meta: &MutationMeta,
    ) -> StoreResult<ReplaceOutcome> {
        self.get_or_create(session_id).replace_shard(shard, payload, meta)
    }

    pub fn list_changes(
        &self,
        session_id: &str,
        since: Cursor,
        limit: Option<usize>,
    ) -> ChangeWindow {
        self.get_or_create(session_id).list_changes(since, limit)
    }

    pub fn acknowledge_changes(&self, session_id: &str, cursor: Cursor) -> AckOutcome {
        self.get_or_create(session_id).acknowledge_changes(cursor)
    }

    pub fn overlay(&self, session_id: &str) -> SessionOverlay {
        self.get_or_create(session_id).overlay()
    }
}

/// Cheap clonable reference to one session. Every method takes the session
/// lock for its full duration.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    inner: Arc<Mutex<Session>>,
    shared: Arc<StoreShared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the locked session with a mutation context.
    fn with_session<T>(&self, f: impl FnOnce(&mut Session, MutationContext<'_>) -> T) -> T {
        let mut session = self.lock();
        f(&mut session, self.shared.ctx())
    }

    /// Escape hatch for reads not covered by a projection.
    pub fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        f(&self.lock())
    }

    pub fn mutate_shard<F>(
        &self,
        kind: ShardKind,
        meta: &MutationMeta,
        transform: F,
    ) -> StoreResult<MutationOutcome>
    where
        F: FnOnce(&mut Value) -> Transformed,
    {
        self.with_session(|session, ctx| session.mutate_shard(ctx, kind, meta, transform))
    }

    pub fn replace_shard(
        &self,
        shard: &str,
        payload: Value,
        meta: &MutationMeta,
    ) -> StoreResult<ReplaceOutcome> {
        let kind: ShardKind = shard.parse()?;
        self.with_session(|session, ctx| session.replace_shard(ctx, kind, payload, meta))
    }

    pub fn adjust_momentum(
        &self,
        adjustment: &MomentumAdjustment,
        meta: &MutationMeta,
    ) -> StoreResult<MomentumOutcome> {
        self.with_session(|session, ctx| session.adjust_momentum(ctx, adjustment, meta))
    }

    pub fn apply_inventory_delta(
        &self,
        delta: &InventoryDelta,
        meta: &MutationMeta,
    ) -> StoreResult<InventoryOutcome> {
        self.with_session(|session, ctx| session.apply_inventory_delta(ctx, delta, meta))
    }

    pub fn apply_stat_adjustments(
        &self,
        adjustments: &[Value],
        check_id: Option<&str>,
        meta: &MutationMeta,
    ) -> StoreResult<StatOutcome> {
        self.with_session(|session, ctx| {
            session.apply_stat_adjustments(ctx, adjustments, check_id, meta)
        })
    }

    pub fn append_transcript(
        &self,
        entry: NewTranscriptEntry,
        meta: &MutationMeta,
    ) -> StoreResult<TranscriptAppend> {
        self.with_session(|session, ctx| session.append_transcript(ctx, entry, meta))
    }

    pub fn apply(&self, command: ShardCommand, meta: &MutationMeta) -> StoreResult<CommandOutcome> {
        self.with_session(|session, ctx| session.apply_command(ctx, command, meta))
    }

    pub fn begin_turn(&self) -> u64 {
        self.lock().begin_turn()
    }

    pub fn register_check(&self, check: PendingCheck) -> PendingCheck {
        self.with_session(|session, ctx| session.register_check(check, ctx.clock.now_ms()))
    }

    pub fn resolve_check(
        &self,
        check_id: &str,
        resolution: &CheckResolution,
        meta: &MutationMeta,
    ) -> StoreResult<ResolvedCheck> {
        self.with_session(|session, ctx| session.resolve_check(ctx, check_id, resolution, meta))
    }

    pub fn veto_check(
        &self,
        check_id: &str,
        reason: Option<String>,
        actor: &str,
    ) -> StoreResult<VetoedCheck> {
        self.with_session(|session, ctx| {
            session.veto_check(check_id, reason, actor, ctx.clock.now_ms())
        })
    }

    /// Entries after `since`; `limit` is clamped into the configured range.
    pub fn list_changes(&self, since: Cursor, limit: Option<usize>) -> ChangeWindow {
        let limit = self.shared.config.clamp_list_limit(limit);
        self.lock().feed().window(since, limit)
    }

    pub fn acknowledge_changes(&self, cursor: Cursor) -> AckOutcome {
        let mut session = self.lock();
        let outcome = session.feed.acknowledge(cursor);
        log::debug!(
            "session {} acknowledged through {} (pending: {})",
            self.id,
            outcome.acknowledged_through,
            outcome.pending
        );
        outcome
    }

    pub fn overlay(&self) -> SessionOverlay {
        self.lock().overlay()
    }

    pub fn shard(&self, name: &str) -> StoreResult<ShardSnapshot> {
        let kind: ShardKind = name.parse()?;
        self.lock().shard_snapshot(kind)
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.lock().transcript().to_vec()
    }

    pub fn capability_references(&self) -> Vec<CapabilityRef> {
        self.lock().capability_references().cloned().collect()
    }

    pub fn checks(&self) -> CheckBoard {
        self.lock().check_board()
    }

    pub fn stat_adjustments(&self) -> Vec<StatAdjustmentRecord> {
        self.lock().stat_adjustments().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store() -> SessionStore {
        SessionStore::with_parts(
            StoreConfig::default(),
            Arc::new(ShapeValidator),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[test]
    fn sessions_are_created_once() {
        let store = store();
        let a = store.get_or_create("alpha");
        a.begin_turn();
        let again = store.get_or_create("alpha");
        assert_eq!(again.read(|s| s.turn_sequence()), 1);
        store.get_or_create("beta");
        assert_eq!(store.session_ids(), vec!["alpha".to_string(), "beta".to_string()]);
        assert!(store.get("gamma").is_none());
    }

    #[test]
    fn unknown_shard_name_is_rejected() {
        let store = store();
        let err = store
            .replace_shard("s1", "spellbook", json!({}), &MutationMeta::default())
            .unwrap_err();
        assert_eq!(err.code(), "unknown_shard");
        let handle = store.get_or_create("s1");
        assert!(handle.shard("spellbook").is_err());
        assert_eq!(handle.shard("momentum").unwrap().revision, 1);
    }

    #[test]
    fn list_limit_is_clamped_by_config() {
        let store = store();
        let handle = store.get_or_create("s1");
        for n in 0..5 {
            handle
                .mutate_shard(ShardKind::Relationships, &MutationMeta::default(), |data| {
                    data["n"] = json!(n);
                    Transformed::in_place()
                })
                .unwrap();
        }
        let window = handle.list_changes(0, Some(0));
        assert_eq!(window.entries.len(), 1);
        assert!(window.has_more);
        let window = store.list_changes("s1", 0, None);
        assert_eq!(window.entries.len(), 5);
        assert_eq!(window.next_cursor, 5);
    }
}
