use serde::{Deserialize, Serialize};
use serde_json::{Number, Value, json};

use super::add_numbers;
use crate::clock::Timestamp;
use crate::engine::{MutationContext, MutationMeta, Transformed};
use crate::error::{StoreError, StoreResult};
use crate::feed::ChangeAction;
use crate::session::Session;
use crate::shard::ShardKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatDelta {
    pub stat: String,
    pub delta: Number,
}

impl StatDelta {
    /// Keeps entries with a string `stat` and a numeric `delta`; everything
    /// else is dropped silently.
    pub fn filter_valid(raw: &[Value]) -> Vec<StatDelta> {
        raw.iter()
            .filter_map(|entry| {
                let stat = entry.get("stat")?.as_str()?;
                let Value::Number(delta) = entry.get("delta")? else {
                    return None;
                };
                Some(StatDelta {
                    stat: stat.to_string(),
                    delta: delta.clone(),
                })
            })
            .collect()
    }
}

/// Session-scoped log line for an applied stat change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatAdjustmentRecord {
    pub stat: String,
    pub delta: Number,
    pub before: Number,
    pub after: Number,
    pub at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatOutcome {
    pub changed: bool,
    pub revision: u64,
    pub applied: Vec<StatAdjustmentRecord>,
}

fn apply_deltas(
    data: &mut Value,
    deltas: &[StatDelta],
    at: Timestamp,
    check_id: Option<&str>,
) -> StoreResult<Vec<StatAdjustmentRecord>> {
    if !data.is_object() {
        *data = json!({});
    }
    if !data.get("stats").is_some_and(Value::is_object) {
        data["stats"] = json!({});
    }
    let mut records = Vec::with_capacity(deltas.len());
    for delta in deltas {
        let before = match data["stats"].get(&delta.stat) {
            Some(Value::Number(n)) => n.clone(),
            _ => Number::from(0),
        };
        let after = add_numbers(&before, &delta.delta)
            .ok_or_else(|| StoreError::InvalidPayload(format!("stat '{}' overflows", delta.stat)))?;
        data["stats"][delta.stat.as_str()] = Value::Number(after.clone());
        records.push(StatAdjustmentRecord {
            stat: delta.stat.clone(),
            delta: delta.delta.clone(),
            before,
            after,
            at,
            check_id: check_id.map(str::to_string),
        });
    }
    Ok(records)
}

impl Session {
    pub fn apply_stat_adjustments(
        &mut self,
        ctx: MutationContext<'_>,
        raw: &[Value],
        check_id: Option<&str>,
        meta: &MutationMeta,
    ) -> StoreResult<StatOutcome> {
        let deltas = StatDelta::filter_valid(raw);
        let at = ctx.timestamp(meta);
        let mut meta = meta.clone().at(at);
        if meta.action == ChangeAction::Update {
            meta.action = ChangeAction::StatAdjustment;
        }
        meta = meta.with_metadata(
            "adjustments",
            serde_json::to_value(&deltas).unwrap_or(Value::Null),
        );
        if let Some(check_id) = check_id {
            meta = meta.with_metadata("checkId", json!(check_id));
        }

        // Computed up front so an overflowing delta leaves the shard untouched.
        let mut next = self.shard(ShardKind::Character)?.data.clone();
        let mut records = if deltas.is_empty() {
            Vec::new()
        } else {
            apply_deltas(&mut next, &deltas, at, check_id)?
        };
        let outcome = self.mutate_shard(ctx, ShardKind::Character, &meta, |_| {
            if deltas.is_empty() {
                Transformed::in_place().changed(false)
            } else {
                Transformed::replace(next)
            }
        })?;

        if !outcome.changed {
            records.clear();
        }
        self.stat_adjustments.extend(records.iter().cloned());
        Ok(StatOutcome {
            changed: outcome.changed,
            revision: outcome.revision,
            applied: records,
        })
    }
}
