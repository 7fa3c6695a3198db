//! Local replica for NoteSync.
//!
//! The sync engine sees local data only through [`LocalReplica`]: export the
//! whole snapshot, import one (merge or replace), and read the latest change
//! timestamp and a content summary. [`Replica`] implements it on top of any
//! [`RecordStore`].

pub mod memory;
pub mod replica;
pub mod sqlite;

pub use memory::MemoryRecordStore;
pub use replica::{ImportBatch, ImportMode, LocalReplica, RecordStore, Replica};
pub use sqlite::SqliteRecordStore;
