//! Remote snapshot stores for NoteSync.
//!
//! A snapshot store holds whole-database snapshots as opaque blobs with a
//! small set of string properties readable without downloading the payload.
//! Providers (in-memory, local directory, Google Drive) are resolved through
//! a typed registry.
//!
//! # Design Principles
//! - Provider isolation: no provider-specific logic in the sync engine
//! - Every call is retry-safe
//! - Unified error semantics across providers

pub mod gdrive;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use gdrive::{AuthorizationHandler, AuthorizationResponse, GDriveConfig, GDriveProvider};
pub use local::{LocalConfig, LocalProvider};
pub use memory::{InjectedFailure, MemoryProvider};
pub use provider::{
    prune_snapshots, Progress, SnapshotMetadata, SnapshotProperties, SnapshotStore,
    DEFAULT_RETENTION,
};
pub use registry::{create_default_registry, ProviderFactory, ProviderKind, ProviderRegistry};
