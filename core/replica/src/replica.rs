//! Local replica contract and its implementation over a record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use notesync_common::{Error, Result, UserId};
use notesync_snapshot::{codec, hash, DataSummary, Entry, Media, Settings, SnapshotContents};

/// How an imported snapshot is applied to local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Upsert every imported record by key, replacing the whole record.
    Merge,
    /// Delete all local records for the user, then insert the imported ones.
    Replace,
}

/// A decoded snapshot ready to be applied in one transaction.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub mode: ImportMode,
    pub contents: SnapshotContents,
}

/// The authoritative local copy of a user's data, as seen by the sync engine.
#[async_trait]
pub trait LocalReplica: Send + Sync {
    /// Latest `updated_at` across all record kinds, `None` when empty.
    async fn latest_changed_timestamp(&self, user: &UserId) -> Result<Option<DateTime<Utc>>>;

    /// Export every record (tombstones included) and settings as an archive.
    async fn export_snapshot(&self, user: &UserId) -> Result<Vec<u8>>;

    /// Decode `bytes` and apply them atomically.
    ///
    /// Nothing is written if decoding fails.
    async fn import_snapshot(&self, user: &UserId, bytes: &[u8], mode: ImportMode) -> Result<()>;

    /// Live record counts and content hash.
    async fn data_summary(&self, user: &UserId) -> Result<DataSummary>;
}

/// Storage engine holding the records themselves.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load all entries, media and settings for `user`.
    async fn load(&self, user: &UserId) -> Result<SnapshotContents>;

    /// Maximum `updated_at` over entries and media.
    async fn latest_updated_at(&self, user: &UserId) -> Result<Option<DateTime<Utc>>>;

    /// Apply an import batch. Must be all-or-nothing.
    async fn apply_import(&self, user: &UserId, batch: ImportBatch) -> Result<()>;

    async fn get_entry(&self, user: &UserId, key: &str) -> Result<Option<Entry>>;

    async fn put_entry(&self, user: &UserId, entry: Entry) -> Result<()>;

    async fn put_media(&self, user: &UserId, media: Media) -> Result<()>;

    async fn put_setting(&self, user: &UserId, key: &str, value: serde_json::Value) -> Result<()>;
}

/// [`LocalReplica`] over any [`RecordStore`].
pub struct Replica<S> {
    store: S,
}

impl<S: RecordStore> Replica<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create or overwrite an entry, stamping `updated_at` with `now`.
    pub async fn save_entry(&self, user: &UserId, mut entry: Entry, now: DateTime<Utc>) -> Result<()> {
        if entry.key.trim().is_empty() {
            return Err(Error::InvalidInput("Entry key cannot be empty".to_string()));
        }
        entry.updated_at = now;
        debug!("Saving entry {}", entry.key);
        self.store.put_entry(user, entry).await
    }

    /// Tombstone an entry and its media.
    pub async fn delete_entry(&self, user: &UserId, key: &str, now: DateTime<Utc>) -> Result<()> {
        let entry = self
            .store
            .get_entry(user, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Entry {}", key)))?;

        if entry.is_deleted() {
            return Ok(());
        }

        let contents = self.store.load(user).await?;
        for media in contents.media {
            if media.entry_key == key && !media.is_deleted() {
                self.store
                    .put_media(
                        user,
                        Media {
                            data: Vec::new(),
                            updated_at: now,
                            deleted_at: Some(now),
                            ..media
                        },
                    )
                    .await?;
            }
        }

        info!("Deleting entry {}", key);
        self.store
            .put_entry(user, Entry::tombstone(key, entry.created_at, now))
            .await
    }

    /// Live entries, newest first.
    pub async fn list_entries(&self, user: &UserId) -> Result<Vec<Entry>> {
        let mut entries: Vec<Entry> = self
            .store
            .load(user)
            .await?
            .entries
            .into_iter()
            .filter(|e| !e.is_deleted())
            .collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    pub async fn settings(&self, user: &UserId) -> Result<Settings> {
        Ok(self.store.load(user).await?.settings)
    }
}

#[async_trait]
impl<S: RecordStore> LocalReplica for Replica<S> {
    async fn latest_changed_timestamp(&self, user: &UserId) -> Result<Option<DateTime<Utc>>> {
        self.store.latest_updated_at(user).await
    }

    async fn export_snapshot(&self, user: &UserId) -> Result<Vec<u8>> {
        let contents = self.store.load(user).await?;
        codec::encode(&contents)
    }

    async fn import_snapshot(&self, user: &UserId, bytes: &[u8], mode: ImportMode) -> Result<()> {
        let contents = codec::decode(bytes)?;
        info!(
            "Importing snapshot ({:?}): {} entries, {} media",
            mode,
            contents.entries.len(),
            contents.media.len()
        );
        self.store
            .apply_import(user, ImportBatch { mode, contents })
            .await
    }

    async fn data_summary(&self, user: &UserId) -> Result<DataSummary> {
        let contents = self.store.load(user).await?;
        hash::summarize(&contents)
    }
}
