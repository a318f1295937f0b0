//! Session-scoped, cursor-ordered log of accepted mutations.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityRef;
use crate::clock::Timestamp;

/// Position in a session's change feed. Zero means "before the first entry".
pub type Cursor = u64;

/// What kind of write produced a change entry. Mutators use the named
/// variants; anything else round-trips through `Custom`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ChangeAction {
    #[default]
    Update,
    Append,
    Replace,
    MomentumAdjustment,
    InventoryUpdate,
    StatAdjustment,
    Custom(String),
}

impl ChangeAction {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeAction::Update => "update",
            ChangeAction::Append => "append",
            ChangeAction::Replace => "replace",
            ChangeAction::MomentumAdjustment => "momentum-adjustment",
            ChangeAction::InventoryUpdate => "inventory-update",
            ChangeAction::StatAdjustment => "stat-adjustment",
            ChangeAction::Custom(action) => action,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ChangeAction {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "update" => ChangeAction::Update,
            "append" => ChangeAction::Append,
            "replace" => ChangeAction::Replace,
            "momentum-adjustment" => ChangeAction::MomentumAdjustment,
            "inventory-update" => ChangeAction::InventoryUpdate,
            "stat-adjustment" => ChangeAction::StatAdjustment,
            _ => ChangeAction::Custom(raw),
        }
    }
}

impl From<ChangeAction> for String {
    fn from(action: ChangeAction) -> Self {
        match action {
            ChangeAction::Custom(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Client-replaceable state.
    #[default]
    Ephemeral,
    /// Reserved for trusted domain mutators.
    Canonical,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Ephemeral => f.write_str("ephemeral"),
            Scope::Canonical => f.write_str("canonical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub cursor: Cursor,
    pub shard: String,
    pub action: ChangeAction,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub capability_refs: Vec<CapabilityRef>,
    #[serde(default)]
    pub safety_flags: Vec<String>,
    /// Shard revision after the write, or transcript length for transcript entries.
    pub revision: u64,
    pub scope: Scope,
    pub at: Timestamp,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeWindow {
    pub entries: Vec<ChangeEntry>,
    pub next_cursor: Cursor,
    pub has_more: bool,
    pub latest_cursor: Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckOutcome {
    pub acknowledged_through: Cursor,
    pub pending: bool,
}

/// Bounded in-memory feed. Cursors are never reused: eviction drops the
/// oldest entries and leaves a contiguous tail ending at `head`.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    entries: VecDeque<ChangeEntry>,
    capacity: usize,
    head: Cursor,
    acked: Cursor,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            head: 0,
            acked: 0,
        }
    }

    /// Assigns the next cursor to `entry`, stores it and returns the cursor.
    pub fn append(&mut self, mut entry: ChangeEntry) -> Cursor {
        self.head += 1;
        entry.cursor = self.head;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.head
    }

    /// Entries strictly after `since`, oldest first, at most `limit` of them.
    pub fn window(&self, since: Cursor, limit: usize) -> ChangeWindow {
        let start = self.entries.partition_point(|entry| entry.cursor <= since);
        let entries: Vec<ChangeEntry> = self
            .entries
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();
        let next_cursor = entries.last().map(|entry| entry.cursor).unwrap_or(since);
        ChangeWindow {
            has_more: next_cursor < self.head,
            entries,
            next_cursor,
            latest_cursor: self.head,
        }
    }

    /// Advances the ack cursor; never regresses and never passes `head`.
    pub fn acknowledge(&mut self, cursor: Cursor) -> AckOutcome {
        self.acked = self.acked.max(cursor.min(self.head));
        AckOutcome {
            acknowledged_through: self.acked,
            pending: self.pending(),
        }
    }

    pub fn pending(&self) -> bool {
        self.head > self.acked
    }

    pub fn head(&self) -> Cursor {
        self.head
    }

    pub fn acked(&self) -> Cursor {
        self.acked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn oldest_cursor(&self) -> Option<Cursor> {
        self.entries.front().map(|entry| entry.cursor)
    }
}
