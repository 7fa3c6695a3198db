//! In-memory record store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use notesync_common::{Result, UserId};
use notesync_snapshot::{Entry, Media, Settings, SnapshotContents};

use crate::replica::{ImportBatch, ImportMode, RecordStore};

#[derive(Default)]
struct UserRecords {
    entries: BTreeMap<String, Entry>,
    media: BTreeMap<String, Media>,
    settings: Settings,
}

/// Record store backed by maps keyed by `(user, key)`.
#[derive(Default)]
pub struct MemoryRecordStore {
    users: RwLock<HashMap<String, UserRecords>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with `contents` for `user`.
    pub async fn with_contents(user: &UserId, contents: SnapshotContents) -> Self {
        let store = Self::new();
        {
            let mut users = store.users.write().await;
            let records = users.entry(user.as_str().to_string()).or_default();
            insert_all(records, contents);
        }
        store
    }
}

fn insert_all(records: &mut UserRecords, contents: SnapshotContents) {
    for entry in contents.entries {
        records.entries.insert(entry.key.clone(), entry);
    }
    for media in contents.media {
        records.media.insert(media.key.clone(), media);
    }
    records.settings.extend(contents.settings);
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load(&self, user: &UserId) -> Result<SnapshotContents> {
        let users = self.users.read().await;
        Ok(users
            .get(user.as_str())
            .map(|r| SnapshotContents {
                entries: r.entries.values().cloned().collect(),
                media: r.media.values().cloned().collect(),
                settings: r.settings.clone(),
            })
            .unwrap_or_default())
    }

    async fn latest_updated_at(&self, user: &UserId) -> Result<Option<DateTime<Utc>>> {
        let users = self.users.read().await;
        Ok(users.get(user.as_str()).and_then(|r| {
            let entries = r.entries.values().map(|e| e.updated_at);
            let media = r.media.values().map(|m| m.updated_at);
            entries.chain(media).max()
        }))
    }

    async fn apply_import(&self, user: &UserId, batch: ImportBatch) -> Result<()> {
        let mut users = self.users.write().await;
        let records = users.entry(user.as_str().to_string()).or_default();
        if batch.mode == ImportMode::Replace {
            *records = UserRecords::default();
        }
        insert_all(records, batch.contents);
        Ok(())
    }

    async fn get_entry(&self, user: &UserId, key: &str) -> Result<Option<Entry>> {
        let users = self.users.read().await;
        Ok(users
            .get(user.as_str())
            .and_then(|r| r.entries.get(key).cloned()))
    }

    async fn put_entry(&self, user: &UserId, entry: Entry) -> Result<()> {
        let mut users = self.users.write().await;
        users
            .entry(user.as_str().to_string())
            .or_default()
            .entries
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn put_media(&self, user: &UserId, media: Media) -> Result<()> {
        let mut users = self.users.write().await;
        users
            .entry(user.as_str().to_string())
            .or_default()
            .media
            .insert(media.key.clone(), media);
        Ok(())
    }

    async fn put_setting(&self, user: &UserId, key: &str, value: serde_json::Value) -> Result<()> {
        let mut users = self.users.write().await;
        users
            .entry(user.as_str().to_string())
            .or_default()
            .settings
            .insert(key.to_string(), value);
        Ok(())
    }
}
