use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::capability::{merge_references, normalize_safety_flags};
use crate::clock::{Timestamp, new_id};
use crate::engine::{MutationContext, MutationMeta};
use crate::error::StoreResult;
use crate::feed::{ChangeAction, ChangeEntry, Cursor};
use crate::session::Session;
use crate::shard::TRANSCRIPT_FEED;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptRole {
    Narrator,
    Player,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: String,
    pub role: TranscriptRole,
    pub text: String,
    pub at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl NewTranscriptEntry {
    pub fn new(role: TranscriptRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            id: None,
            metadata: Value::Object(Map::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptAppend {
    pub entry: TranscriptEntry,
    pub cursor: Cursor,
    pub length: u64,
}

impl Session {
    /// Appends to the transcript and records one `transcript` change entry
    /// whose revision is the new transcript length.
    pub fn append_transcript(
        &mut self,
        ctx: MutationContext<'_>,
        draft: NewTranscriptEntry,
        meta: &MutationMeta,
    ) -> StoreResult<TranscriptAppend> {
        let validated = ctx.validator.validate(&meta.capability_refs)?;
        let at = ctx.timestamp(meta);
        let entry = TranscriptEntry {
            id: draft.id.unwrap_or_else(new_id),
            role: draft.role,
            text: draft.text,
            at,
            turn: (self.turn_sequence > 0).then_some(self.turn_sequence),
            metadata: draft.metadata,
        };

        self.transcript.push(entry.clone());
        let length = self.transcript.len() as u64;
        let action = match &meta.action {
            ChangeAction::Update => ChangeAction::Append,
            other => other.clone(),
        };
        let cursor = self.feed.append(ChangeEntry {
            cursor: 0,
            shard: TRANSCRIPT_FEED.to_string(),
            action,
            actor: meta.actor.clone(),
            reason: meta.reason.clone(),
            metadata: meta.metadata.clone(),
            capability_refs: validated.clone(),
            safety_flags: normalize_safety_flags(&meta.safety_flags),
            revision: length,
            scope: meta.scope,
            at,
            before: Value::Null,
            after: serde_json::to_value(&entry).unwrap_or(Value::Null),
        });
        merge_references(&mut self.capability_references, &validated);
        log::debug!(
            "session {} transcript append {} -> length {length} cursor {cursor}",
            self.id,
            entry.id
        );
        Ok(TranscriptAppend {
            entry,
            cursor,
            length,
        })
    }
}
