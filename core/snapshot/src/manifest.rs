//! Manifest document stored as `manifest.json` inside every snapshot archive.
//!
//! Compatibility is field-additive: unknown fields are ignored on read and
//! every optional field defaults when absent.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Entry, Media, Settings};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Archive path of the manifest.
pub const MANIFEST_PATH: &str = "manifest.json";

/// Archive directory holding media blobs.
pub const MEDIA_DIR: &str = "media";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
    #[serde(default)]
    pub media: Vec<ManifestMedia>,
}

/// Entry as written to the manifest. Tombstones only carry key and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Media record as written to the manifest. `file` names the blob inside
/// [`MEDIA_DIR`]; tombstones have no file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMedia {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ManifestEntry {
    pub fn from_entry(entry: &Entry) -> Self {
        if entry.is_deleted() {
            return Self {
                key: entry.key.clone(),
                title: None,
                body: None,
                entry_date: None,
                tags: Vec::new(),
                mood: None,
                media_keys: Vec::new(),
                created_at: entry.created_at,
                updated_at: entry.updated_at,
                deleted_at: entry.deleted_at,
            };
        }

        Self {
            key: entry.key.clone(),
            title: Some(entry.title.clone()),
            body: Some(entry.body.clone()),
            entry_date: entry.entry_date,
            tags: entry.tags.clone(),
            mood: entry.mood.clone(),
            media_keys: entry.media_keys.clone(),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            deleted_at: None,
        }
    }

    pub fn into_entry(self) -> Entry {
        Entry {
            key: self.key,
            title: self.title.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            entry_date: self.entry_date,
            tags: self.tags,
            mood: self.mood,
            media_keys: self.media_keys,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

impl ManifestMedia {
    /// Manifest record for `media`; `file` is `None` for tombstones.
    pub fn from_media(media: &Media, file: Option<String>) -> Self {
        let live = !media.is_deleted();
        Self {
            key: media.key.clone(),
            entry_key: live.then(|| media.entry_key.clone()),
            mime_type: live.then(|| media.mime_type.clone()),
            file: if live { file } else { None },
            created_at: media.created_at,
            updated_at: media.updated_at,
            deleted_at: media.deleted_at,
        }
    }

    pub fn into_media(self, data: Vec<u8>) -> Media {
        Media {
            key: self.key,
            entry_key: self.entry_key.unwrap_or_default(),
            mime_type: self
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            data,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Archive filename for a media blob: `media/<sanitized key>.<ext>`.
pub fn media_file_name(key: &str, mime_type: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let ext = match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "image/svg+xml" => "svg",
        _ => "bin",
    };

    format!("{}/{}.{}", MEDIA_DIR, stem, ext)
}
