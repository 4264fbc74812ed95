//! Upstream/downstream synchronization with the remote backend.
//!
//! Local writes land in the tenant database together with an outbox entry.
//! [`SyncService`] pushes the outbox, pulls per-collection deltas and
//! merges them under last-write-wins; [`SyncWorker`] runs it in the
//! background.

mod backend;
mod downstream;
mod http;
mod merge;
mod report;
mod service;
mod upstream;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{
    BackendError, BackendResult, DownstreamDelta, SyncBackend, UpstreamItemError,
    UpstreamResponse,
};
pub use downstream::EPOCH;
pub use http::HttpSyncBackend;
pub use merge::{decide, import_batch, merge_batch, MergeDecision};
pub use report::{DownstreamReport, InitialSyncReport, MergeStats, SyncReport, UpstreamReport};
pub use service::SyncService;
pub use worker::{SyncCommand, SyncEvent, SyncHandle, SyncWorker};
