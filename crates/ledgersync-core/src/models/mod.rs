//! Data models for ledgersync

mod entity;
mod queue;
mod sync_conflict;
mod sync_metadata;

pub use entity::{compare_timestamps, EntityType, SyncableEntity};
pub(crate) use entity::{deserialize_id, deserialize_ids};
pub use queue::{OperationType, QueueStatistics, QueueStatus, SyncQueueEntry, MAX_SYNC_ATTEMPTS};
pub use sync_conflict::SyncConflict;
pub use sync_metadata::SyncMetadata;
