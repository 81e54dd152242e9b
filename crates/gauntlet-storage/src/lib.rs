//! # Gauntlet Storage
//!
//! Hybrid local-first persistence for the quality-engineering fleet. A
//! single [`PersistenceProvider`] interface fronts three implementations:
//!
//! - [`LocalProvider`] — single-file SQLite (WAL mode, transactional
//!   batches) serving low-latency reads and durable writes.
//! - [`RemoteProvider`] — a PostgREST-style REST store, mapping HTTP
//!   outcomes onto the structured [`StorageErrorKind`] contract.
//! - [`HybridProvider`] — local-first writes mirrored to the remote by the
//!   background [`SyncEngine`], which coalesces ops per record, debounces
//!   flushes, retries with linear backoff, resolves conflicts per policy,
//!   and survives offline periods through the durable `sync_queue` table.
//!
//! [`migration::migrate_local_to_remote`] performs the one-shot move of an
//! existing local store into the remote.

pub mod error;
pub mod hybrid;
pub mod local;
pub mod migration;
pub mod provider;
pub mod records;
pub mod remote;
pub mod sync;

pub use error::{StorageError, StorageErrorKind, StorageResult};
pub use hybrid::HybridProvider;
pub use local::LocalProvider;
pub use migration::{migrate_local_to_remote, MigrationOptions, MigrationReport};
pub use provider::PersistenceProvider;
pub use records::{
    AccessLevel, AgentState, AgentStateValue, AggregatedMetric, CodeChunk, CodeChunkQuery,
    EventQuery, EventRecord, ExperienceQuery, ExperienceRecord, MemoryEntry, MemoryQuery,
    MetricQuery, MetricRecord, PatternQuery, PatternRecord, ProviderInfo, SimilarCodeOptions,
};
pub use remote::{RemoteProvider, RemoteStore};
pub use sync::{ConflictStrategy, SyncEngine, SyncEngineConfig, SyncOp, SyncOpType, SyncQueueStore};
