//! Shared helpers for the core integration tests.
//!
//! Each integration test compiles this module separately, so some helpers may
//! look unused in a given test binary.

#![allow(dead_code)]

use std::sync::Arc;

use memshard_core::{
    CapabilityCatalog, ManualClock, MutationMeta, SessionHandle, SessionStore, Severity,
    ShardKind, StoreConfig, Transformed,
};
use serde_json::json;

pub fn catalog() -> CapabilityCatalog {
    CapabilityCatalog::new()
        .with("violence.mild", Severity::Low)
        .with("peril", Severity::Medium)
        .with("horror.graphic", Severity::High)
}

pub fn store_with(config: StoreConfig) -> (SessionStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = SessionStore::with_parts(config, Arc::new(catalog()), clock.clone());
    (store, clock)
}

pub fn store() -> (SessionStore, Arc<ManualClock>) {
    store_with(StoreConfig::default())
}

/// Writes `value` under `key` in the relationships shard.
pub fn touch(handle: &SessionHandle, key: &str, value: i64) -> u64 {
    handle
        .mutate_shard(ShardKind::Relationships, &MutationMeta::default(), |data| {
            data[key] = json!(value);
            Transformed::in_place()
        })
        .expect("relationship write")
        .revision
}
