use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityRef;
use crate::checks::{PendingCheck, ResolvedCheck, VetoedCheck};
use crate::clock::Timestamp;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeFeed, Cursor};
use crate::mutators::stats::StatAdjustmentRecord;
use crate::mutators::transcript::TranscriptEntry;
use crate::shard::{Shard, ShardKind};

/// Convenience fields mirroring shard payloads, refreshed after every
/// accepted mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAliases {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum_current: Option<i64>,
}

/// All state owned by one session. Not synchronized; callers go through
/// [`crate::store::SessionHandle`] which serializes access.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: String,
    pub(crate) created_at: Timestamp,
    pub(crate) shards: BTreeMap<ShardKind, Shard>,
    pub(crate) feed: ChangeFeed,
    pub(crate) capability_references: IndexMap<String, CapabilityRef>,
    pub(crate) transcript: Vec<TranscriptEntry>,
    pub(crate) turn_sequence: u64,
    pub(crate) pending_checks: IndexMap<String, PendingCheck>,
    pub(crate) resolved_checks: Vec<ResolvedCheck>,
    pub(crate) vetoed_checks: Vec<VetoedCheck>,
    pub(crate) stat_adjustments: Vec<StatAdjustmentRecord>,
    pub(crate) aliases: SessionAliases,
}

impl Session {
    /// Seeds every shard at revision 1 with its default payload.
    pub fn new(id: impl Into<String>, config: &StoreConfig, now: Timestamp) -> Self {
        let shards = ShardKind::ALL
            .into_iter()
            .map(|kind| (kind, Shard::seeded(kind, config, now)))
            .collect();
        let mut session = Self {
            id: id.into(),
            created_at: now,
            shards,
            feed: ChangeFeed::new(config.change_feed_limit),
            capability_references: IndexMap::new(),
            transcript: Vec::new(),
            turn_sequence: 0,
            pending_checks: IndexMap::new(),
            resolved_checks: Vec::new(),
            vetoed_checks: Vec::new(),
            stat_adjustments: Vec::new(),
            aliases: SessionAliases::default(),
        };
        session.refresh_aliases();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn shard(&self, kind: ShardKind) -> StoreResult<&Shard> {
        self.shards.get(&kind).ok_or_else(|| self.unavailable(kind))
    }

    pub(crate) fn shard_mut(&mut self, kind: ShardKind) -> StoreResult<&mut Shard> {
        let session_id = &self.id;
        self.shards
            .get_mut(&kind)
            .ok_or_else(|| StoreError::ShardUnavailable {
                session_id: session_id.clone(),
                shard: kind.to_string(),
            })
    }

    fn unavailable(&self, kind: ShardKind) -> StoreError {
        StoreError::ShardUnavailable {
            session_id: self.id.clone(),
            shard: kind.to_string(),
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn change_cursor(&self) -> Cursor {
        self.feed.head()
    }

    pub fn last_ack_cursor(&self) -> Cursor {
        self.feed.acked()
    }

    /// Derived from the cursors on every read, never stored.
    pub fn pending_offline_reconcile(&self) -> bool {
        self.feed.pending()
    }

    pub fn capability_references(&self) -> impl Iterator<Item = &CapabilityRef> {
        self.capability_references.values()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn turn_sequence(&self) -> u64 {
        self.turn_sequence
    }

    pub fn pending_checks(&self) -> impl Iterator<Item = &PendingCheck> {
        self.pending_checks.values()
    }

    pub fn resolved_checks(&self) -> &[ResolvedCheck] {
        &self.resolved_checks
    }

    pub fn vetoed_checks(&self) -> &[VetoedCheck] {
        &self.vetoed_checks
    }

    pub fn stat_adjustments(&self) -> &[StatAdjustmentRecord] {
        &self.stat_adjustments
    }

    pub fn aliases(&self) -> &SessionAliases {
        &self.aliases
    }

    /// Starts a new narrative turn and returns its sequence number.
    pub fn begin_turn(&mut self) -> u64 {
        self.turn_sequence += 1;
        self.turn_sequence
    }

    pub(crate) fn refresh_aliases(&mut self) {
        let character_name = self
            .shards
            .get(&ShardKind::Character)
            .and_then(|shard| shard.data.get("name"))
            .and_then(|name| name.as_str())
            .map(str::to_string);
        let momentum_current = self
            .shards
            .get(&ShardKind::Momentum)
            .and_then(|shard| shard.data.get("current"))
            .and_then(|current| current.as_i64());
        self.aliases = SessionAliases {
            character_name,
            momentum_current,
        };
    }
}
