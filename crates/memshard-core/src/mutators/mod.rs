//! Domain mutators layered on top of [`Session::mutate_shard`]. Each one owns
//! its business semantics; versioning and the change feed stay in the engine.

pub mod inventory;
pub mod momentum;
pub mod stats;
pub mod transcript;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::engine::{MutationContext, MutationMeta};
use crate::error::StoreResult;
use crate::session::Session;
use crate::shard::ShardKind;

use inventory::InventoryDelta;
use momentum::MomentumAdjustment;

/// A shard write expressed as data, for callers that queue or forward
/// mutations instead of invoking a mutator directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ShardCommand {
    Replace {
        shard: ShardKind,
        payload: Value,
    },
    MomentumAdjust(MomentumAdjustment),
    InventoryDelta(InventoryDelta),
    StatAdjustment {
        adjustments: Vec<Value>,
        #[serde(default, rename = "checkId", skip_serializing_if = "Option::is_none")]
        check_id: Option<String>,
    },
}

impl ShardCommand {
    pub fn target(&self) -> ShardKind {
        match self {
            ShardCommand::Replace { shard, .. } => *shard,
            ShardCommand::MomentumAdjust(_) => ShardKind::Momentum,
            ShardCommand::InventoryDelta(_) => ShardKind::Inventory,
            ShardCommand::StatAdjustment { .. } => ShardKind::Character,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub shard: ShardKind,
    pub changed: bool,
    pub revision: u64,
}

impl Session {
    pub fn apply_command(
        &mut self,
        ctx: MutationContext<'_>,
        command: ShardCommand,
        meta: &MutationMeta,
    ) -> StoreResult<CommandOutcome> {
        let shard = command.target();
        let (changed, revision) = match command {
            ShardCommand::Replace { shard, payload } => {
                let outcome = self.replace_shard(ctx, shard, payload, meta)?;
                (outcome.changed, outcome.revision)
            }
            ShardCommand::MomentumAdjust(adjustment) => {
                let outcome = self.adjust_momentum(ctx, &adjustment, meta)?;
                (outcome.changed, outcome.revision)
            }
            ShardCommand::InventoryDelta(delta) => {
                let outcome = self.apply_inventory_delta(ctx, &delta, meta)?;
                (outcome.changed, outcome.revision)
            }
            ShardCommand::StatAdjustment {
                adjustments,
                check_id,
            } => {
                let outcome =
                    self.apply_stat_adjustments(ctx, &adjustments, check_id.as_deref(), meta)?;
                (outcome.changed, outcome.revision)
            }
        };
        Ok(CommandOutcome {
            shard,
            changed,
            revision,
        })
    }
}

/// Integer-preserving addition of JSON numbers. `None` when the result is not
/// representable as a finite JSON number.
pub(crate) fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Some(Number::from(sum));
        }
    }
    float_number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
}

pub(crate) fn sub_numbers(a: &Number, b: &Number) -> Option<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(diff) = x.checked_sub(y) {
            return Some(Number::from(diff));
        }
    }
    float_number(a.as_f64().unwrap_or(0.0) - b.as_f64().unwrap_or(0.0))
}

pub(crate) fn is_positive(n: &Number) -> bool {
    n.as_f64().map(|v| v > 0.0).unwrap_or(false)
}

fn float_number(value: f64) -> Option<Number> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        return Some(Number::from(value as i64));
    }
    Number::from_f64(value)
}
