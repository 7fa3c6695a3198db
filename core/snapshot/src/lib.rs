//! Snapshot model and archive codec.
//!
//! A snapshot is the complete state of one user's data: entries, media and
//! settings, including tombstones. This crate defines the record model, the
//! ZIP archive format and the content hash used to detect unchanged data.

pub mod codec;
pub mod hash;
pub mod manifest;
pub mod model;

pub use codec::{decode, encode, encode_at, is_archive, read_manifest};
pub use hash::{content_hash, summarize};
pub use manifest::{Manifest, SCHEMA_VERSION};
pub use model::{DataSummary, Entry, Media, Settings, SnapshotContents};
