//! Record model shared by the codec, the local replica and the engine.
//!
//! Records are owned by exactly one user. The owner is not stored on the
//! record itself: record stores key every record by `(user, key)`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application settings exported verbatim with every snapshot.
pub type Settings = BTreeMap<String, serde_json::Value>;

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Local key, unique per user.
    pub key: String,
    pub title: String,
    pub body: String,
    /// Calendar day the entry is filed under.
    pub entry_date: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub mood: Option<String>,
    /// Keys of media records attached to this entry.
    pub media_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker. Payload fields are meaningless once set.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Entry {
    /// Create a live entry stamped with `now` for both timestamps.
    pub fn new(
        key: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            body: body.into(),
            entry_date: Some(now.date_naive()),
            tags: Vec::new(),
            mood: None,
            media_keys: Vec::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Build the tombstone left behind when this entry is deleted.
    pub fn tombstone(key: impl Into<String>, created_at: DateTime<Utc>, deleted_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            title: String::new(),
            body: String::new(),
            entry_date: None,
            tags: Vec::new(),
            mood: None,
            media_keys: Vec::new(),
            created_at,
            updated_at: deleted_at,
            deleted_at: Some(deleted_at),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A binary attachment (usually an image) belonging to an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub key: String,
    pub entry_key: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Media {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Everything a snapshot carries for one user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotContents {
    pub entries: Vec<Entry>,
    pub media: Vec<Media>,
    pub settings: Settings,
}

impl SnapshotContents {
    /// Latest `updated_at` across all record kinds.
    pub fn latest_change(&self) -> Option<DateTime<Utc>> {
        let entries = self.entries.iter().map(|e| e.updated_at);
        let media = self.media.iter().map(|m| m.updated_at);
        entries.chain(media).max()
    }
}

/// Counts and hash describing a snapshot without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    /// Live (non-tombstoned) entries.
    pub entry_count: usize,
    /// Live image media.
    pub image_count: usize,
    /// See [`crate::content_hash`].
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tombstone_has_no_payload() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let deleted = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let tomb = Entry::tombstone("e1", created, deleted);

        assert!(tomb.is_deleted());
        assert!(tomb.title.is_empty());
        assert_eq!(tomb.updated_at, deleted);
    }

    #[test]
    fn test_latest_change_spans_kinds() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let contents = SnapshotContents {
            entries: vec![Entry::new("e1", "a", "b", t1)],
            media: vec![Media {
                key: "m1".to_string(),
                entry_key: "e1".to_string(),
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                created_at: t1,
                updated_at: t2,
                deleted_at: None,
            }],
            settings: Settings::new(),
        };

        assert_eq!(contents.latest_change(), Some(t2));
        assert_eq!(SnapshotContents::default().latest_change(), None);
    }
}
