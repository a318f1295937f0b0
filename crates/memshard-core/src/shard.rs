use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::clock::Timestamp;
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Feed name used for transcript appends, which are not a versioned shard.
pub const TRANSCRIPT_FEED: &str = "transcript";

pub const DEFAULT_ACTOR: &str = "system";

/// Closed set of versioned partitions of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKind {
    Character,
    Inventory,
    Relationships,
    Momentum,
}

impl ShardKind {
    pub const ALL: [ShardKind; 4] = [
        ShardKind::Character,
        ShardKind::Inventory,
        ShardKind::Relationships,
        ShardKind::Momentum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShardKind::Character => "character",
            ShardKind::Inventory => "inventory",
            ShardKind::Relationships => "relationships",
            ShardKind::Momentum => "momentum",
        }
    }

    /// Empty payload a shard is seeded with when its session is created.
    pub fn seed_payload(&self, config: &StoreConfig) -> Value {
        match self {
            ShardKind::Character => json!({ "stats": {} }),
            ShardKind::Inventory => json!({ "items": [] }),
            ShardKind::Relationships => json!({}),
            ShardKind::Momentum => json!({
                "current": config.momentum.current,
                "floor": config.momentum.floor,
                "ceiling": config.momentum.ceiling,
                "history": [],
            }),
        }
    }
}

impl fmt::Display for ShardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardKind {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "character" => Ok(ShardKind::Character),
            "inventory" => Ok(ShardKind::Inventory),
            "relationships" => Ok(ShardKind::Relationships),
            "momentum" => Ok(ShardKind::Momentum),
            other => Err(StoreError::UnknownShard(other.to_string())),
        }
    }
}

/// Atomic unit of versioned session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shard {
    pub data: Value,
    pub revision: u64,
    pub updated_at: Timestamp,
    pub updated_by: String,
}

impl Shard {
    pub fn seeded(kind: ShardKind, config: &StoreConfig, now: Timestamp) -> Self {
        Self {
            data: kind.seed_payload(config),
            revision: 1,
            updated_at: now,
            updated_by: DEFAULT_ACTOR.to_string(),
        }
    }

    /// Installs an accepted payload and bumps the revision by exactly one.
    pub(crate) fn commit(&mut self, data: Value, actor: &str, at: Timestamp) -> u64 {
        self.data = data;
        self.revision += 1;
        self.updated_at = at;
        self.updated_by = actor.to_string();
        self.revision
    }
}
