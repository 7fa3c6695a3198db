//! Snapshot store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use notesync_common::Result;

/// Number of snapshots kept remotely after a successful upload.
pub const DEFAULT_RETENTION: usize = 3;

/// Fractional transfer progress callback, called with values in `[0, 1]`.
pub type Progress = Arc<dyn Fn(f64) + Send + Sync>;

pub(crate) fn report(progress: &Option<Progress>, fraction: f64) {
    if let Some(cb) = progress {
        cb(fraction.clamp(0.0, 1.0));
    }
}

/// Custom properties attached to every uploaded snapshot.
///
/// Stored as provider-side string key/value pairs so they can be read
/// without downloading the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotProperties {
    pub entry_count: usize,
    pub image_count: usize,
    pub content_hash: String,
    pub encrypted: bool,
    pub device_id: Option<String>,
    pub schema_version: u32,
}

impl SnapshotProperties {
    /// Flatten into the provider's string map.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("entryCount".to_string(), self.entry_count.to_string());
        map.insert("imageCount".to_string(), self.image_count.to_string());
        map.insert("contentHash".to_string(), self.content_hash.clone());
        map.insert("encrypted".to_string(), self.encrypted.to_string());
        map.insert("schemaVersion".to_string(), self.schema_version.to_string());
        if let Some(device) = &self.device_id {
            map.insert("deviceId".to_string(), device.clone());
        }
        map
    }

    /// Read back from a string map. Missing or malformed values default.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        fn parse<T: FromStr>(map: &HashMap<String, String>, key: &str) -> Option<T> {
            map.get(key).and_then(|v| v.parse().ok())
        }

        Self {
            entry_count: parse(map, "entryCount").unwrap_or_default(),
            image_count: parse(map, "imageCount").unwrap_or_default(),
            content_hash: map.get("contentHash").cloned().unwrap_or_default(),
            encrypted: parse(map, "encrypted").unwrap_or_default(),
            device_id: map.get("deviceId").cloned(),
            schema_version: parse(map, "schemaVersion").unwrap_or(1),
        }
    }
}

/// Metadata of one remote snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Provider-assigned identifier.
    pub id: String,
    /// Server-side modification time.
    pub modified_time: DateTime<Utc>,
    /// Payload size in bytes.
    pub size: u64,
    pub properties: SnapshotProperties,
}

/// Remote store holding whole-database snapshots.
///
/// Every call is safe to retry. A retried upload may leave a duplicate
/// snapshot behind; pruning removes it on the next upload.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Provider name (e.g., "memory", "local", "gdrive").
    fn name(&self) -> &str;

    /// Prepare the provider. Idempotent.
    ///
    /// # Errors
    /// - `ProviderInit` if client credentials are missing
    async fn initialize(&self) -> Result<()>;

    /// Obtain an access token. May be interactive.
    ///
    /// # Errors
    /// - `AuthFailed` if the user declined or the exchange failed
    async fn sign_in(&self) -> Result<()>;

    /// Drop stored credentials.
    async fn sign_out(&self) -> Result<()>;

    /// Whether usable credentials are present. Never performs I/O.
    fn is_authenticated(&self) -> bool;

    /// Metadata of the most recently modified snapshot, without its payload.
    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>>;

    /// Upload a new snapshot object and prune old ones.
    ///
    /// # Postconditions
    /// - A new object exists carrying `properties`
    /// - At most the retention count of snapshots remain (best effort)
    async fn upload_snapshot(
        &self,
        data: Vec<u8>,
        properties: &SnapshotProperties,
        progress: Option<Progress>,
    ) -> Result<SnapshotMetadata>;

    /// Download a snapshot payload by id.
    ///
    /// # Errors
    /// - `NotFound` if no snapshot has this id
    async fn download_snapshot(&self, id: &str, progress: Option<Progress>) -> Result<Vec<u8>>;

    /// Delete a snapshot by id.
    async fn delete_snapshot(&self, id: &str) -> Result<()>;

    /// All snapshots, newest first.
    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>>;
}

/// Delete all but the newest `keep` snapshots.
///
/// Returns the number deleted. Individual delete failures are logged and
/// skipped.
pub async fn prune_snapshots<S: SnapshotStore + ?Sized>(store: &S, keep: usize) -> Result<usize> {
    let snapshots = store.list_snapshots().await?;
    let mut deleted = 0;

    for old in snapshots.iter().skip(keep.max(1)) {
        match store.delete_snapshot(&old.id).await {
            Ok(()) => {
                debug!("Pruned snapshot {}", old.id);
                deleted += 1;
            }
            Err(e) => warn!("Failed to prune snapshot {}: {}", old.id, e),
        }
    }

    Ok(deleted)
}

/// Prune after an upload; failures never reach the caller.
pub(crate) async fn prune_after_upload<S: SnapshotStore + ?Sized>(store: &S, keep: usize) {
    if let Err(e) = prune_snapshots(store, keep).await {
        warn!("Snapshot pruning failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_map_roundtrip() {
        let props = SnapshotProperties {
            entry_count: 12,
            image_count: 3,
            content_hash: "abc".to_string(),
            encrypted: true,
            device_id: Some("dev-1".to_string()),
            schema_version: 1,
        };

        let map = props.to_map();
        assert_eq!(map.get("entryCount").map(String::as_str), Some("12"));
        assert_eq!(map.get("encrypted").map(String::as_str), Some("true"));
        assert_eq!(SnapshotProperties::from_map(&map), props);
    }

    #[test]
    fn test_properties_tolerate_garbage() {
        let mut map = HashMap::new();
        map.insert("entryCount".to_string(), "lots".to_string());
        map.insert("somethingElse".to_string(), "x".to_string());

        let props = SnapshotProperties::from_map(&map);
        assert_eq!(props.entry_count, 0);
        assert!(!props.encrypted);
        assert!(props.content_hash.is_empty());
        assert_eq!(props.schema_version, 1);
    }

    #[test]
    fn test_properties_parse_each_field_type() {
        let map: HashMap<String, String> = [
            ("entryCount", "7"),
            ("imageCount", "2"),
            ("contentHash", "ff00"),
            ("encrypted", "true"),
            ("schemaVersion", "4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let props = SnapshotProperties::from_map(&map);
        assert_eq!(props.entry_count, 7);
        assert_eq!(props.image_count, 2);
        assert_eq!(props.content_hash, "ff00");
        assert!(props.encrypted);
        assert_eq!(props.schema_version, 4);
        assert_eq!(props.device_id, None);
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = SnapshotMetadata {
            id: "snap-1".to_string(),
            modified_time: Utc::now(),
            size: 1024,
            properties: SnapshotProperties::default(),
        };

        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: SnapshotMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, metadata);
    }
}
