//! In-memory, per-session shard store: versioned shards, an ordered change feed
//! with acknowledgement cursors, and domain mutators on top of one engine.

pub mod capability;
pub mod checks;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod mutators;
pub mod projection;
pub mod session;
pub mod shard;
pub mod store;

pub use capability::{
    CapabilityCatalog, CapabilityError, CapabilityRef, CapabilityValidator, CatalogEntry,
    Severity, ShapeValidator, SharedValidator,
};
pub use checks::{CheckBoard, CheckOutcome, CheckResolution, PendingCheck, ResolvedCheck, VetoedCheck};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use config::{MomentumDefaults, StoreConfig};
pub use engine::{MutationMeta, MutationOutcome, ReplaceOutcome, Transformed};
pub use error::{StoreError, StoreResult};
pub use feed::{AckOutcome, ChangeAction, ChangeEntry, ChangeWindow, Cursor, Scope};
pub use mutators::inventory::{InventoryDelta, InventoryItem, InventoryOp, InventorySummary};
pub use mutators::momentum::{MomentumAdjustment, MomentumChange, MomentumOutcome};
pub use mutators::transcript::{NewTranscriptEntry, TranscriptEntry, TranscriptRole};
pub use mutators::{CommandOutcome, ShardCommand};
pub use projection::{SessionOverlay, ShardSnapshot};
pub use session::{Session, SessionAliases};
pub use shard::{Shard, ShardKind};
pub use store::{SessionHandle, SessionStore};
