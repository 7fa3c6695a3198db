//! Persisted sync metadata and the key-value store holding it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use notesync_common::{DeviceId, Error, Result};

/// Reserved key for [`SyncMetadata`].
pub const METADATA_KEY: &str = "__notesync_metadata";

/// Reserved key for the offline queue.
pub const PENDING_KEY: &str = "__notesync_pending";

/// What this device knows about its last successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub remote_snapshot_id: Option<String>,
    pub last_sync_device_id: Option<DeviceId>,
    pub device_id: DeviceId,
}

impl SyncMetadata {
    /// Metadata for a device that has never synced.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            last_sync_at: None,
            remote_snapshot_id: None,
            last_sync_device_id: None,
            device_id,
        }
    }

    /// `last_sync_at`, or the epoch when the device never synced.
    pub fn last_sync_or_epoch(&self) -> DateTime<Utc> {
        self.last_sync_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Local key-value persistence for engine state.
///
/// Keys live in a namespace separate from user records.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn store(&self, key: &str, value: &Value) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Store keeping every key as `<dir>/<key>.json`.
pub struct JsonFileMetadataStore {
    dir: PathBuf,
}

impl JsonFileMetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid metadata key: {}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl MetadataStore for JsonFileMetadataStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Stored {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryMetadataStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn store(&self, key: &str, value: &Value) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Read and decode [`SyncMetadata`], `None` if never written.
pub async fn load_metadata(store: &dyn MetadataStore) -> Result<Option<SyncMetadata>> {
    match store.load(METADATA_KEY).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save_metadata(store: &dyn MetadataStore, metadata: &SyncMetadata) -> Result<()> {
    store
        .store(METADATA_KEY, &serde_json::to_value(metadata)?)
        .await
}
