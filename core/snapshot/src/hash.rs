//! Content hashing and data summaries.
//!
//! The hash is taken over a canonical rendering of the semantic content rather
//! than the archive bytes, so two exports of the same data hash equal even
//! though their export timestamps and archive layouts differ. `updated_at` is
//! excluded: re-saving a record without changing it does not change the hash.

use sha2::{Digest, Sha256};

use notesync_common::Result;

use crate::model::{DataSummary, Entry, Media, SnapshotContents};

/// Hex-encoded SHA-256 of the canonical content.
pub fn content_hash(contents: &SnapshotContents) -> Result<String> {
    let mut hasher = Sha256::new();

    let mut entries: Vec<&Entry> = contents.entries.iter().collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    for entry in entries {
        hash_entry(&mut hasher, entry)?;
    }

    // BTreeMap iterates in key order.
    for (key, value) in &contents.settings {
        hash_field(&mut hasher, b"setting", key.as_bytes());
        hash_field(&mut hasher, b"value", &serde_json::to_vec(value)?);
    }

    let mut media: Vec<&Media> = contents.media.iter().collect();
    media.sort_by(|a, b| a.key.cmp(&b.key));
    for item in media {
        hash_media(&mut hasher, item);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Live counts plus [`content_hash`].
pub fn summarize(contents: &SnapshotContents) -> Result<DataSummary> {
    let entry_count = contents.entries.iter().filter(|e| !e.is_deleted()).count();
    let image_count = contents
        .media
        .iter()
        .filter(|m| !m.is_deleted() && m.is_image())
        .count();

    Ok(DataSummary {
        entry_count,
        image_count,
        content_hash: content_hash(contents)?,
    })
}

fn hash_entry(hasher: &mut Sha256, entry: &Entry) -> Result<()> {
    hash_field(hasher, b"entry", entry.key.as_bytes());
    hash_field(hasher, b"created", entry.created_at.to_rfc3339().as_bytes());

    if let Some(deleted_at) = entry.deleted_at {
        hash_field(hasher, b"deleted", deleted_at.to_rfc3339().as_bytes());
        return Ok(());
    }

    hash_field(hasher, b"title", entry.title.as_bytes());
    hash_field(hasher, b"body", entry.body.as_bytes());
    let date = entry.entry_date.map(|d| d.to_string()).unwrap_or_default();
    hash_field(hasher, b"date", date.as_bytes());
    hash_field(hasher, b"tags", &serde_json::to_vec(&entry.tags)?);
    hash_field(
        hasher,
        b"mood",
        entry.mood.as_deref().unwrap_or_default().as_bytes(),
    );
    hash_field(hasher, b"media_keys", &serde_json::to_vec(&entry.media_keys)?);
    Ok(())
}

fn hash_media(hasher: &mut Sha256, media: &Media) {
    hash_field(hasher, b"media", media.key.as_bytes());

    if let Some(deleted_at) = media.deleted_at {
        hash_field(hasher, b"deleted", deleted_at.to_rfc3339().as_bytes());
        return;
    }

    hash_field(hasher, b"entry_key", media.entry_key.as_bytes());
    hash_field(hasher, b"mime", media.mime_type.as_bytes());
    hash_field(hasher, b"data", &media.data);
}

/// Length-prefixed so adjacent fields cannot run together.
fn hash_field(hasher: &mut Sha256, tag: &[u8], value: &[u8]) {
    hasher.update(tag);
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value);
}
