//! Read models handed to callers. Everything here is an owned copy; nothing
//! borrows from the live session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityRef;
use crate::clock::Timestamp;
use crate::error::StoreResult;
use crate::feed::Cursor;
use crate::session::{Session, SessionAliases};
use crate::shard::{Shard, ShardKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSnapshot {
    pub shard: ShardKind,
    pub data: Value,
    pub revision: u64,
    pub updated_at: Timestamp,
    pub updated_by: String,
}

impl ShardSnapshot {
    pub fn of(kind: ShardKind, shard: &Shard) -> Self {
        Self {
            shard: kind,
            data: shard.data.clone(),
            revision: shard.revision,
            updated_at: shard.updated_at,
            updated_by: shard.updated_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverlay {
    pub session_id: String,
    pub created_at: Timestamp,
    pub shards: BTreeMap<ShardKind, ShardSnapshot>,
    pub change_cursor: Cursor,
    pub last_ack_cursor: Cursor,
    pub pending_offline_reconcile: bool,
    pub capability_references: Vec<CapabilityRef>,
    pub turn_sequence: u64,
    pub transcript_length: usize,
    pub pending_checks: Vec<String>,
    #[serde(flatten)]
    pub aliases: SessionAliases,
}

impl SessionOverlay {
    pub fn shard(&self, kind: ShardKind) -> Option<&ShardSnapshot> {
        self.shards.get(&kind)
    }
}

impl Session {
    pub fn shard_snapshot(&self, kind: ShardKind) -> StoreResult<ShardSnapshot> {
        Ok(ShardSnapshot::of(kind, self.shard(kind)?))
    }

    pub fn overlay(&self) -> SessionOverlay {
        let shards = self
            .shards
            .iter()
            .map(|(kind, shard)| (*kind, ShardSnapshot::of(*kind, shard)))
            .collect();
        SessionOverlay {
            session_id: self.id.clone(),
            created_at: self.created_at,
            shards,
            change_cursor: self.change_cursor(),
            last_ack_cursor: self.last_ack_cursor(),
            pending_offline_reconcile: self.pending_offline_reconcile(),
            capability_references: self.capability_references().cloned().collect(),
            turn_sequence: self.turn_sequence,
            transcript_length: self.transcript.len(),
            pending_checks: self.pending_checks.keys().cloned().collect(),
            aliases: self.aliases.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ShapeValidator;
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::engine::{MutationContext, MutationMeta, Transformed};
    use serde_json::json;

    #[test]
    fn overlay_shards_match_single_snapshots() {
        let config = StoreConfig::default();
        let session = Session::new("s1", &config, 0);
        let overlay = session.overlay();
        for kind in ShardKind::ALL {
            assert_eq!(overlay.shard(kind), Some(&session.shard_snapshot(kind).unwrap()));
        }
    }

    #[test]
    fn overlay_is_detached_from_live_state() {
        let config = StoreConfig::default();
        let clock = ManualClock::new(9);
        let ctx = MutationContext {
            validator: &ShapeValidator,
            clock: &clock,
            config: &config,
        };
        let mut session = Session::new("s1", &config, 0);
        session
            .mutate_shard(ctx, ShardKind::Character, &MutationMeta::default(), |data| {
                data["name"] = json!("Ash");
                Transformed::in_place()
            })
            .unwrap();

        let mut overlay = session.overlay();
        assert_eq!(overlay.change_cursor, 1);
        assert!(overlay.pending_offline_reconcile);
        assert_eq!(overlay.aliases.character_name.as_deref(), Some("Ash"));
        assert_eq!(overlay.shards.len(), 4);

        if let Some(snapshot) = overlay.shards.get_mut(&ShardKind::Character) {
            snapshot.data["name"] = json!("Mallory");
        }
        assert_eq!(
            session.shard(ShardKind::Character).unwrap().data["name"],
            json!("Ash")
        );

        let wire = serde_json::to_value(session.overlay()).unwrap();
        assert_eq!(wire["characterName"], json!("Ash"));
        assert_eq!(wire["shards"]["character"]["revision"], json!(2));
        assert_eq!(wire["lastAckCursor"], json!(0));
    }
}
