//! Skill-check bookkeeping. Checks themselves are not versioned; resolving one
//! fans out into the momentum, stat and inventory mutators.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::clock::{Timestamp, new_id};
use crate::engine::{MutationContext, MutationMeta};
use crate::error::{StoreError, StoreResult};
use crate::feed::{ChangeAction, Cursor};
use crate::mutators::inventory::{InventoryDelta, InventorySummary};
use crate::mutators::momentum::{MomentumAdjustment, MomentumOutcome};
use crate::mutators::transcript::{NewTranscriptEntry, TranscriptRole};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCheck {
    /// Generated on registration when left empty.
    #[serde(default)]
    pub id: String,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    #[serde(default)]
    pub created_at: Timestamp,
    #[serde(default)]
    pub metadata: Value,
}

impl PendingCheck {
    pub fn new(skill: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            skill: skill.into(),
            difficulty: None,
            turn: None,
            created_at: 0,
            metadata: Value::Object(Map::new()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn difficulty(mut self, difficulty: i64) -> Self {
        self.difficulty = Some(difficulty);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    CriticalSuccess,
    Success,
    PartialSuccess,
    Failure,
    CriticalFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResolution {
    pub outcome: CheckOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum: Option<MomentumAdjustment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stat_adjustments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventoryDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
}

impl CheckResolution {
    pub fn new(outcome: CheckOutcome) -> Self {
        Self {
            outcome,
            momentum: None,
            stat_adjustments: Vec::new(),
            inventory: None,
            narration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCheck {
    pub check: PendingCheck,
    pub outcome: CheckOutcome,
    pub resolved_at: Timestamp,
    pub resolved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum: Option<MomentumOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory: Option<InventorySummary>,
    pub stats_applied: usize,
    /// Feed position after every side effect of the resolution landed.
    pub cursor: Cursor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VetoedCheck {
    pub check: PendingCheck,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub vetoed_at: Timestamp,
    pub vetoed_by: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckBoard {
    pub pending: Vec<PendingCheck>,
    pub resolved: Vec<ResolvedCheck>,
    pub vetoed: Vec<VetoedCheck>,
}

impl Session {
    pub fn register_check(&mut self, mut check: PendingCheck, now: Timestamp) -> PendingCheck {
        if check.id.trim().is_empty() {
            check.id = new_id();
        }
        if check.turn.is_none() && self.turn_sequence > 0 {
            check.turn = Some(self.turn_sequence);
        }
        check.created_at = now;
        self.pending_checks.insert(check.id.clone(), check.clone());
        log::debug!("session {} registered check {}", self.id, check.id);
        check
    }

    pub fn veto_check(
        &mut self,
        check_id: &str,
        reason: Option<String>,
        actor: &str,
        now: Timestamp,
    ) -> StoreResult<VetoedCheck> {
        let check = self
            .pending_checks
            .shift_remove(check_id)
            .ok_or_else(|| StoreError::UnknownCheck(check_id.to_string()))?;
        let vetoed = VetoedCheck {
            check,
            reason,
            vetoed_at: now,
            vetoed_by: actor.to_string(),
        };
        self.vetoed_checks.push(vetoed.clone());
        log::debug!("session {} vetoed check {check_id}", self.id);
        Ok(vetoed)
    }

    /// Applies the resolution's side effects in a fixed order: momentum, stats,
    /// inventory, narration. Inputs are validated before the first write.
    pub fn resolve_check(
        &mut self,
        ctx: MutationContext<'_>,
        check_id: &str,
        resolution: &CheckResolution,
        meta: &MutationMeta,
    ) -> StoreResult<ResolvedCheck> {
        if !self.pending_checks.contains_key(check_id) {
            return Err(StoreError::UnknownCheck(check_id.to_string()));
        }
        ctx.validator.validate(&meta.capability_refs)?;
        if let Some(inventory) = &resolution.inventory {
            inventory.validate()?;
        }

        let at = ctx.timestamp(meta);
        let meta = meta
            .clone()
            .at(at)
            .with_metadata("checkId", json!(check_id))
            .with_metadata("outcome", json!(resolution.outcome));

        let momentum = match &resolution.momentum {
            Some(adjustment) => {
                let mut adjustment = adjustment.clone();
                if adjustment.check_id.is_none() {
                    adjustment.check_id = Some(check_id.to_string());
                }
                Some(self.adjust_momentum(ctx, &adjustment, &meta)?)
            }
            None => None,
        };
        let stats = self.apply_stat_adjustments(
            ctx,
            &resolution.stat_adjustments,
            Some(check_id),
            &meta,
        )?;
        let inventory = match &resolution.inventory {
            Some(delta) => Some(self.apply_inventory_delta(ctx, delta, &meta)?.summary),
            None => None,
        };
        if let Some(text) = &resolution.narration {
            let narration_meta = MutationMeta {
                action: ChangeAction::Append,
                ..meta.clone()
            };
            self.append_transcript(
                ctx,
                NewTranscriptEntry::new(TranscriptRole::Narrator, text.clone()),
                &narration_meta,
            )?;
        }

        let check = self
            .pending_checks
            .shift_remove(check_id)
            .ok_or_else(|| StoreError::UnknownCheck(check_id.to_string()))?;
        let resolved = ResolvedCheck {
            check,
            outcome: resolution.outcome,
            resolved_at: at,
            resolved_by: meta.actor.clone(),
            momentum,
            inventory,
            stats_applied: stats.applied.len(),
            cursor: self.feed.head(),
        };
        self.resolved_checks.push(resolved.clone());
        log::debug!(
            "session {} resolved check {check_id} as {:?}",
            self.id,
            resolution.outcome
        );
        Ok(resolved)
    }

    pub fn check_board(&self) -> CheckBoard {
        CheckBoard {
            pending: self.pending_checks.values().cloned().collect(),
            resolved: self.resolved_checks.clone(),
            vetoed: self.vetoed_checks.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilityCatalog, CapabilityRef, Severity};
    use crate::clock::ManualClock;
    use crate::config::StoreConfig;
    use crate::mutators::inventory::{InventoryItem, InventoryOp};
    use crate::shard::ShardKind;

    struct Fixture {
        clock: ManualClock,
        config: StoreConfig,
        catalog: CapabilityCatalog,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                clock: ManualClock::new(50),
                config: StoreConfig::default(),
                catalog: CapabilityCatalog::new().with("peril", Severity::Medium),
            }
        }

        fn ctx(&self) -> MutationContext<'_> {
            MutationContext {
                validator: &self.catalog,
                clock: &self.clock,
                config: &self.config,
            }
        }
    }

    #[test]
    fn resolve_applies_every_side_effect_in_order() {
        let fx = Fixture::new();
        let mut session = Session::new("s1", &fx.config, 0);
        session.begin_turn();
        let check = session.register_check(PendingCheck::new("athletics").with_id("c1"), 10);
        assert_eq!(check.turn, Some(1));

        let mut resolution = CheckResolution::new(CheckOutcome::Success);
        resolution.momentum = Some(MomentumAdjustment::delta(2));
        resolution.stat_adjustments = vec![json!({"stat": "grit", "delta": 1})];
        resolution.inventory = Some(InventoryDelta::new(vec![InventoryOp::Add(
            InventoryItem::new("rope", 1),
        )]));
        resolution.narration = Some("You haul yourself up.".into());

        let resolved = session
            .resolve_check(fx.ctx(), "c1", &resolution, &MutationMeta::default().actor("gm"))
            .unwrap();
        assert_eq!(resolved.cursor, 4);
        assert_eq!(resolved.stats_applied, 1);
        assert_eq!(resolved.momentum.map(|m| m.after), Some(2));
        assert_eq!(resolved.resolved_by, "gm");

        let shards: Vec<_> = session
            .feed()
            .window(0, 10)
            .entries
            .into_iter()
            .map(|entry| entry.shard)
            .collect();
        assert_eq!(shards, vec!["momentum", "character", "inventory", "transcript"]);
        assert!(session.check_board().pending.is_empty());
        assert_eq!(session.resolved_checks().len(), 1);
    }

    #[test]
    fn resolve_rejects_bad_capability_before_any_write() {
        let fx = Fixture::new();
        let mut session = Session::new("s1", &fx.config, 0);
        session.register_check(PendingCheck::new("stealth").with_id("c1"), 0);
        let mut resolution = CheckResolution::new(CheckOutcome::Failure);
        resolution.momentum = Some(MomentumAdjustment::delta(-1));
        let meta = MutationMeta::default().capability(CapabilityRef::new("peril", Severity::High));

        let err = session.resolve_check(fx.ctx(), "c1", &resolution, &meta).unwrap_err();
        assert_eq!(err.code(), "capability_severity_mismatch");
        assert_eq!(session.change_cursor(), 0);
        assert_eq!(session.shard(ShardKind::Momentum).unwrap().revision, 1);
        assert_eq!(session.check_board().pending.len(), 1);
    }

    #[test]
    fn unknown_and_vetoed_checks() {
        let fx = Fixture::new();
        let mut session = Session::new("s1", &fx.config, 0);
        let resolution = CheckResolution::new(CheckOutcome::Success);
        let err = session
            .resolve_check(fx.ctx(), "missing", &resolution, &MutationMeta::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownCheck(id) if id == "missing"));

        let check = session.register_check(PendingCheck::new("lore"), 3);
        assert!(!check.id.is_empty());
        let vetoed = session
            .veto_check(&check.id, Some("off-tone".into()), "moderator", 4)
            .unwrap();
        assert_eq!(vetoed.vetoed_by, "moderator");
        assert!(session.veto_check(&check.id, None, "moderator", 5).is_err());
        assert_eq!(session.change_cursor(), 0);
    }
}
