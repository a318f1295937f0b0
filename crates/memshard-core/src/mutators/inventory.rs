use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use super::{add_numbers, is_positive, sub_numbers};
use crate::engine::{MutationContext, MutationMeta, Transformed};
use crate::error::{StoreError, StoreResult};
use crate::feed::ChangeAction;
use crate::mutators::transcript::{NewTranscriptEntry, TranscriptRole};
use crate::session::Session;
use crate::shard::ShardKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Number>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InventoryItem {
    pub fn new(id: impl Into<String>, quantity: i64) -> Self {
        Self {
            id: id.into(),
            quantity: Some(Number::from(quantity)),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InventoryOp {
    /// Stacks onto an existing entry with the same id, or appends a new one.
    Add(InventoryItem),
    /// Decrements `quantity`, dropping the entry once it reaches zero. Without a
    /// quantity the entry is removed outright.
    Remove {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quantity: Option<Number>,
    },
    /// Patches an existing entry; unknown ids are ignored.
    Update {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quantity: Option<Number>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl InventoryOp {
    pub fn id(&self) -> &str {
        match self {
            InventoryOp::Add(item) => &item.id,
            InventoryOp::Remove { id, .. } | InventoryOp::Update { id, .. } => id,
        }
    }

    pub fn remove(id: impl Into<String>, quantity: Option<i64>) -> Self {
        InventoryOp::Remove {
            id: id.into(),
            quantity: quantity.map(Number::from),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryDelta {
    pub ops: Vec<InventoryOp>,
    /// Append a narration transcript entry summarizing the change.
    #[serde(default)]
    pub narrate: bool,
    /// Overrides the generated narration text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
}

impl InventoryDelta {
    pub fn new(ops: Vec<InventoryOp>) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }

    pub fn narrated(mut self) -> Self {
        self.narrate = true;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        for (idx, op) in self.ops.iter().enumerate() {
            if op.id().trim().is_empty() {
                return Err(StoreError::InvalidPayload(format!(
                    "inventory op {idx} has a blank id"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl InventorySummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    pub fn narration(&self) -> String {
        let mut parts = Vec::new();
        for (label, ids) in [
            ("added", &self.added),
            ("removed", &self.removed),
            ("updated", &self.updated),
        ] {
            if !ids.is_empty() {
                parts.push(format!("{label} {}", ids.join(", ")));
            }
        }
        format!("Inventory: {}", parts.join("; "))
    }

    fn note(list: &mut Vec<String>, id: &str) {
        if !list.iter().any(|existing| existing == id) {
            list.push(id.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryOutcome {
    pub changed: bool,
    pub revision: u64,
    pub summary: InventorySummary,
}

/// Applies `ops` to an inventory payload in place. Fails when a quantity
/// leaves the finite number range, in which case `data` may be partially
/// rewritten and should be discarded.
pub fn apply_ops(data: &mut Value, ops: &[InventoryOp]) -> StoreResult<InventorySummary> {
    if !data.is_object() {
        *data = json!({});
    }
    let mut items = match data.get("items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    };
    let mut summary = InventorySummary::default();

    for op in ops {
        let position = items
            .iter()
            .position(|item| item.get("id").and_then(Value::as_str) == Some(op.id()));
        match op {
            InventoryOp::Add(incoming) => {
                let fresh = || serde_json::to_value(incoming).unwrap_or(Value::Null);
                match position {
                    Some(idx) => match items[idx].as_object_mut() {
                        Some(existing) => stack_into(existing, incoming)?,
                        None => items[idx] = fresh(),
                    },
                    None => items.push(fresh()),
                }
                InventorySummary::note(&mut summary.added, &incoming.id);
            }
            InventoryOp::Remove { id, quantity } => {
                let Some(idx) = position else { continue };
                let remaining = match (quantity, items[idx].get("quantity")) {
                    (Some(take), Some(Value::Number(have))) => {
                        Some(sub_numbers(have, take).ok_or_else(|| quantity_overflow(id))?)
                    }
                    _ => None,
                };
                match remaining {
                    Some(left) if is_positive(&left) => {
                        items[idx]["quantity"] = Value::Number(left);
                    }
                    _ => {
                        items.remove(idx);
                    }
                }
                InventorySummary::note(&mut summary.removed, id);
            }
            InventoryOp::Update {
                id,
                quantity,
                name,
                tags,
                description,
            } => {
                let Some(existing) = position.and_then(|idx| items[idx].as_object_mut()) else {
                    continue;
                };
                if let Some(quantity) = quantity {
                    existing.insert("quantity".into(), Value::Number(quantity.clone()));
                }
                if let Some(name) = name {
                    existing.insert("name".into(), json!(name));
                }
                if let Some(tags) = tags {
                    existing.insert("tags".into(), json!(tags));
                }
                if let Some(description) = description {
                    existing.insert("description".into(), json!(description));
                }
                InventorySummary::note(&mut summary.updated, id);
            }
        }
    }

    data["items"] = Value::Array(items);
    Ok(summary)
}

fn quantity_overflow(id: &str) -> StoreError {
    StoreError::InvalidPayload(format!("quantity of '{id}' overflows"))
}

fn stack_into(existing: &mut Map<String, Value>, incoming: &InventoryItem) -> StoreResult<()> {
    if let Some(add) = &incoming.quantity {
        let next = match existing.get("quantity") {
            Some(Value::Number(have)) => {
                add_numbers(have, add).ok_or_else(|| quantity_overflow(&incoming.id))?
            }
            _ => add.clone(),
        };
        existing.insert("quantity".into(), Value::Number(next));
    }
    if !incoming.tags.is_empty() {
        let mut tags: Vec<Value> = match existing.get("tags") {
            Some(Value::Array(tags)) => tags.clone(),
            _ => Vec::new(),
        };
        for tag in &incoming.tags {
            let tag = json!(tag);
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        existing.insert("tags".into(), Value::Array(tags));
    }
    if let Some(name) = &incoming.name {
        existing.entry("name").or_insert_with(|| json!(name));
    }
    if let Some(description) = &incoming.description {
        existing
            .entry("description")
            .or_insert_with(|| json!(description));
    }
    for (key, value) in &incoming.extra {
        existing.entry(key.as_str()).or_insert_with(|| value.clone());
    }
    Ok(())
}

impl Session {
    pub fn apply_inventory_delta(
        &mut self,
        ctx: MutationContext<'_>,
        delta: &InventoryDelta,
        meta: &MutationMeta,
    ) -> StoreResult<InventoryOutcome> {
        delta.validate()?;
        let at = ctx.timestamp(meta);
        let mut meta = meta.clone().at(at);
        if meta.action == ChangeAction::Update {
            meta.action = ChangeAction::InventoryUpdate;
        }

        // Ops run on a scratch copy first: the summary becomes change-entry
        // metadata and a failing op leaves the shard untouched.
        let mut preview = self.shard(ShardKind::Inventory)?.data.clone();
        let summary = apply_ops(&mut preview, &delta.ops)?;
        let meta = meta.with_metadata(
            "inventory",
            serde_json::to_value(&summary).unwrap_or(Value::Null),
        );

        let outcome = self.mutate_shard(ctx, ShardKind::Inventory, &meta, |_| {
            Transformed::replace(preview)
        })?;

        if outcome.changed && delta.narrate && !summary.is_empty() {
            let text = delta
                .narration
                .clone()
                .unwrap_or_else(|| summary.narration());
            let narration_meta = MutationMeta {
                action: ChangeAction::Append,
                capability_refs: Vec::new(),
                ..meta.clone()
            };
            self.append_transcript(
                ctx,
                NewTranscriptEntry::new(TranscriptRole::Narrator, text),
                &narration_meta,
            )?;
        }

        Ok(InventoryOutcome {
            changed: outcome.changed,
            revision: outcome.revision,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(data: &Value) -> Vec<Value> {
        data["items"].as_array().cloned().unwrap_or_default()
    }

    #[test]
    fn add_stacks_by_id() {
        let mut data = json!({"items": []});
        let ops = vec![InventoryOp::Add(InventoryItem::new("rope", 2))];
        apply_ops(&mut data, &ops).unwrap();
        apply_ops(&mut data, &ops).unwrap();
        assert_eq!(items(&data), vec![json!({"id": "rope", "quantity": 4})]);
    }

    #[test]
    fn add_unions_tags_and_fills_missing_fields() {
        let mut data = json!({"items": [{"id": "torch", "quantity": 1, "tags": ["light"]}]});
        let incoming = InventoryItem::new("torch", 1)
            .named("Torch")
            .tag("light")
            .tag("fire");
        apply_ops(&mut data, &[InventoryOp::Add(incoming)]).unwrap();
        assert_eq!(
            items(&data),
            vec![json!({"id": "torch", "quantity": 2, "tags": ["light", "fire"], "name": "Torch"})]
        );
    }

    #[test]
    fn remove_decrements_then_deletes() {
        let mut data = json!({"items": [{"id": "coin", "quantity": 3}, {"id": "map"}]});
        let summary = apply_ops(&mut data, &[InventoryOp::remove("coin", Some(2))]).unwrap();
        assert_eq!(items(&data)[0]["quantity"], json!(1));
        assert_eq!(summary.removed, vec!["coin".to_string()]);

        apply_ops(&mut data, &[InventoryOp::remove("coin", Some(1))]).unwrap();
        apply_ops(&mut data, &[InventoryOp::remove("map", None)]).unwrap();
        assert!(items(&data).is_empty());
    }

    #[test]
    fn update_patches_known_ids_only() {
        let mut data = json!({"items": [{"id": "lamp", "quantity": 1}]});
        let summary = apply_ops(
            &mut data,
            &[
                InventoryOp::Update {
                    id: "lamp".into(),
                    quantity: Some(Number::from(2)),
                    name: Some("Oil lamp".into()),
                    tags: None,
                    description: Some("dented".into()),
                },
                InventoryOp::Update {
                    id: "ghost".into(),
                    quantity: Some(Number::from(9)),
                    name: None,
                    tags: None,
                    description: None,
                },
            ],
        )
        .unwrap();
        assert_eq!(
            items(&data),
            vec![json!({"id": "lamp", "quantity": 2, "name": "Oil lamp", "description": "dented"})]
        );
        assert_eq!(summary.updated, vec!["lamp".to_string()]);
    }

    #[test]
    fn overflowing_quantity_is_an_invalid_payload() {
        let mut data = json!({"items": [{"id": "ore", "quantity": 1e308}]});
        let mut incoming = InventoryItem::new("ore", 0);
        incoming.quantity = Number::from_f64(1e308);
        let err = apply_ops(&mut data, &[InventoryOp::Add(incoming)]).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[test]
    fn ops_decode_from_json() {
        let delta: InventoryDelta = serde_json::from_value(json!({
            "ops": [
                {"op": "add", "id": "rope", "quantity": 2, "weight": 3},
                {"op": "remove", "id": "torch"},
            ],
            "narrate": true,
        }))
        .unwrap();
        let InventoryOp::Add(item) = &delta.ops[0] else {
            panic!("expected add");
        };
        assert_eq!(item.extra.get("weight"), Some(&json!(3)));
        assert!(delta.narrate);
    }

    #[test]
    fn summary_narration_lists_each_bucket() {
        let summary = InventorySummary {
            added: vec!["rope".into()],
            removed: vec!["torch".into()],
            updated: vec![],
        };
        assert_eq!(summary.narration(), "Inventory: added rope; removed torch");
    }
}
