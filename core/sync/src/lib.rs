//! Sync engine for NoteSync.
//!
//! Keeps one user's local replica and a single remote snapshot in step using
//! whole-snapshot last-writer-wins:
//! - Decides pull, push, conflict or no-op from metadata alone
//! - Retries transient provider failures with exponential backoff
//! - Queues manual requests made offline and replays them on reconnect
//! - Publishes an observable [`SyncState`] to listeners
//! - Schedules periodic and debounced background syncs

pub mod config;
pub mod conflict;
pub mod engine;
pub mod metadata;
pub mod network;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod state;

pub use config::SyncConfig;
pub use conflict::{decide, ConflictDetails, Direction, Resolution};
pub use engine::{SkipReason, SyncEngine, SyncOutcome, TriggerOptions};
pub use metadata::{
    JsonFileMetadataStore, MemoryMetadataStore, MetadataStore, SyncMetadata, METADATA_KEY,
    PENDING_KEY,
};
pub use network::{NetworkClass, NetworkMonitor, NetworkPolicy, StaticNetwork};
pub use queue::{OfflineQueue, PendingSyncRequest};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{ScheduleConfig, SchedulerEvent, SyncScheduler, SyncSchedulerHandle, SyncTarget};
pub use state::{StateHub, SubscriptionId, SyncState, SyncStatus};
