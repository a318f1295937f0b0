use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clock::Timestamp;
use crate::engine::{MutationContext, MutationMeta, Transformed};
use crate::error::{StoreError, StoreResult};
use crate::feed::ChangeAction;
use crate::session::Session;
use crate::shard::ShardKind;

/// How the next momentum value is derived from the current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MomentumChange {
    /// Caller-computed result. `after` wins over `delta` when both are present.
    Explicit {
        #[serde(default)]
        after: Option<i64>,
        #[serde(default)]
        delta: Option<i64>,
    },
    Reset {
        value: i64,
    },
    Delta {
        delta: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumAdjustment {
    pub change: MomentumChange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
}

impl MomentumAdjustment {
    pub fn delta(delta: i64) -> Self {
        Self {
            change: MomentumChange::Delta { delta },
            reason: None,
            check_id: None,
        }
    }

    pub fn reset(value: i64) -> Self {
        Self {
            change: MomentumChange::Reset { value },
            reason: None,
            check_id: None,
        }
    }

    pub fn explicit(after: Option<i64>, delta: Option<i64>) -> Self {
        Self {
            change: MomentumChange::Explicit { after, delta },
            reason: None,
            check_id: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn check(mut self, check_id: impl Into<String>) -> Self {
        self.check_id = Some(check_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumHistoryEntry {
    pub before: i64,
    pub after: i64,
    pub delta: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumOutcome {
    pub changed: bool,
    pub revision: u64,
    pub before: i64,
    pub after: i64,
    pub delta: i64,
    /// True when the requested value fell outside `[floor, ceiling]`.
    pub clamped: bool,
}

/// Current/floor/ceiling as read from a momentum payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MomentumBounds {
    pub current: i64,
    pub floor: i64,
    pub ceiling: i64,
}

impl MomentumBounds {
    pub fn read(data: &Value, ctx: &MutationContext<'_>) -> Self {
        let defaults = ctx.config.momentum;
        let field = |name: &str, fallback: i64| data.get(name).and_then(Value::as_i64).unwrap_or(fallback);
        let mut floor = field("floor", defaults.floor);
        let mut ceiling = field("ceiling", defaults.ceiling);
        if floor > ceiling {
            std::mem::swap(&mut floor, &mut ceiling);
        }
        Self {
            current: field("current", defaults.current),
            floor,
            ceiling,
        }
    }

    /// Returns the clamped target and whether clamping kicked in.
    pub fn resolve(&self, change: &MomentumChange) -> (i64, bool) {
        let requested = match change {
            MomentumChange::Explicit {
                after: Some(after), ..
            } => *after,
            MomentumChange::Explicit {
                after: None,
                delta: Some(delta),
            } => self.current.saturating_add(*delta),
            MomentumChange::Explicit {
                after: None,
                delta: None,
            } => self.current,
            MomentumChange::Reset { value } => *value,
            MomentumChange::Delta { delta } => self.current.saturating_add(*delta),
        };
        let clamped = requested.clamp(self.floor, self.ceiling);
        (clamped, clamped != requested)
    }
}

impl Session {
    pub fn adjust_momentum(
        &mut self,
        ctx: MutationContext<'_>,
        adjustment: &MomentumAdjustment,
        meta: &MutationMeta,
    ) -> StoreResult<MomentumOutcome> {
        let at = ctx.timestamp(meta);
        let history_limit = ctx.config.momentum_history_limit;
        let bounds = MomentumBounds::read(&self.shard(ShardKind::Momentum)?.data, &ctx);
        let (after, clamped) = bounds.resolve(&adjustment.change);
        let Some(delta) = after.checked_sub(bounds.current) else {
            return Err(StoreError::InvalidPayload(format!(
                "momentum current {} is out of range",
                bounds.current
            )));
        };

        let mut meta = meta.clone().at(at);
        if meta.action == ChangeAction::Update {
            meta.action = ChangeAction::MomentumAdjustment;
        }
        if meta.reason.is_none() {
            meta.reason = adjustment.reason.clone();
        }
        meta = meta
            .with_metadata("delta", json!(delta))
            .with_metadata("clamped", json!(clamped));
        if let Some(check_id) = &adjustment.check_id {
            meta = meta.with_metadata("checkId", json!(check_id));
        }

        let outcome = self.mutate_shard(ctx, ShardKind::Momentum, &meta, |data| {
            if delta == 0 {
                return Transformed::in_place().changed(false);
            }
            if !data.is_object() {
                *data = json!({});
            }
            data["current"] = json!(after);
            data["floor"] = json!(bounds.floor);
            data["ceiling"] = json!(bounds.ceiling);
            let entry = MomentumHistoryEntry {
                before: bounds.current,
                after,
                delta,
                reason: adjustment.reason.clone(),
                at,
                check_id: adjustment.check_id.clone(),
            };
            let mut history = match data.get("history") {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            history.push(serde_json::to_value(entry).unwrap_or(Value::Null));
            if history.len() > history_limit {
                let excess = history.len() - history_limit;
                history.drain(..excess);
            }
            data["history"] = Value::Array(history);
            Transformed::in_place().changed(true)
        })?;

        Ok(MomentumOutcome {
            changed: outcome.changed,
            revision: outcome.revision,
            before: bounds.current,
            after: if outcome.changed { after } else { bounds.current },
            delta: if outcome.changed { delta } else { 0 },
            clamped,
        })
    }
}
