//! Local filesystem snapshot store.
//!
//! Each snapshot is `<id>.snapshot` next to an `<id>.json` sidecar holding
//! its metadata. Suitable for a directory mirrored by a desktop sync client.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use uuid::Uuid;

use notesync_common::{Error, Result};

use crate::provider::{
    prune_after_upload, report, Progress, SnapshotMetadata, SnapshotProperties, SnapshotStore,
    DEFAULT_RETENTION,
};

const DATA_EXT: &str = "snapshot";
const SIDECAR_EXT: &str = "json";
const READ_CHUNK: usize = 64 * 1024;

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

/// Configuration for [`LocalProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory holding the snapshots.
    pub root: PathBuf,
    #[serde(default = "default_retention")]
    pub retention: usize,
}

/// Snapshot store backed by a local directory.
pub struct LocalProvider {
    root: PathBuf,
    retention: usize,
}

impl LocalProvider {
    /// Create a provider rooted at `root`.
    ///
    /// The directory is created on [`SnapshotStore::initialize`].
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn from_config(config: LocalConfig) -> Self {
        Self {
            root: config.root,
            retention: config.retention,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str, ext: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::InvalidInput(format!("Invalid snapshot id: {}", id)));
        }
        Ok(self.root.join(format!("{}.{}", id, ext)))
    }

    async fn read_sidecar(path: &Path) -> Result<SnapshotMetadata> {
        let raw = fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl SnapshotStore for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn sign_in(&self) -> Result<()> {
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        Ok(self.list_snapshots().await?.into_iter().next())
    }

    async fn upload_snapshot(
        &self,
        data: Vec<u8>,
        properties: &SnapshotProperties,
        progress: Option<Progress>,
    ) -> Result<SnapshotMetadata> {
        self.initialize().await?;

        let id = Uuid::new_v4().to_string();
        let metadata = SnapshotMetadata {
            id: id.clone(),
            modified_time: Utc::now(),
            size: data.len() as u64,
            properties: properties.clone(),
        };

        report(&progress, 0.0);

        // Payload first: a sidecar without payload would look like a snapshot.
        let data_path = self.path_for(&id, DATA_EXT)?;
        let tmp = data_path.with_extension("tmp");
        fs::write(&tmp, &data).await?;
        fs::rename(&tmp, &data_path).await?;
        report(&progress, 0.9);

        let sidecar = serde_json::to_vec_pretty(&metadata)?;
        fs::write(self.path_for(&id, SIDECAR_EXT)?, sidecar).await?;
        report(&progress, 1.0);

        debug!("Wrote snapshot {} ({} bytes)", id, metadata.size);
        prune_after_upload(self, self.retention).await;
        Ok(metadata)
    }

    async fn download_snapshot(&self, id: &str, progress: Option<Progress>) -> Result<Vec<u8>> {
        let path = self.path_for(id, DATA_EXT)?;
        let mut file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Snapshot {}", id)))
            }
            Err(e) => return Err(e.into()),
        };

        let total = file.metadata().await?.len().max(1) as f64;
        let mut data = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            report(&progress, data.len() as f64 / total);
        }
        report(&progress, 1.0);

        Ok(data)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let data_path = self.path_for(id, DATA_EXT)?;
        let sidecar_path = self.path_for(id, SIDECAR_EXT)?;

        if !fs::try_exists(&sidecar_path).await? {
            return Err(Error::NotFound(format!("Snapshot {}", id)));
        }

        // Sidecar first so a half-deleted snapshot is invisible.
        fs::remove_file(&sidecar_path).await?;
        if let Err(e) = fs::remove_file(&data_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SIDECAR_EXT) {
                continue;
            }
            match Self::read_sidecar(&path).await {
                Ok(meta) => snapshots.push(meta),
                Err(e) => warn!("Ignoring unreadable sidecar {}: {}", path.display(), e),
            }
        }

        snapshots.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
        Ok(snapshots)
    }
}
