//! In-memory snapshot store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use notesync_common::{Error, Result};

use crate::provider::{
    prune_after_upload, report, Progress, SnapshotMetadata, SnapshotProperties, SnapshotStore,
    DEFAULT_RETENTION,
};

#[derive(Debug, Clone)]
struct Stored {
    seq: u64,
    metadata: SnapshotMetadata,
    data: Vec<u8>,
}

/// Failure injected into the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Transient transport failure (retryable).
    Network,
    /// Quota or permission rejection (not retryable).
    Quota,
}

impl InjectedFailure {
    fn to_error(self) -> Error {
        match self {
            InjectedFailure::Network => Error::Network("injected failure".to_string()),
            InjectedFailure::Quota => {
                Error::ProviderQuotaOrPermission("injected failure".to_string())
            }
        }
    }
}

#[derive(Default)]
struct Failures {
    metadata: Vec<InjectedFailure>,
    upload: Vec<InjectedFailure>,
    download: Vec<InjectedFailure>,
}

/// In-memory snapshot store.
///
/// Counts calls and supports failure injection and auth toggles. All data is
/// lost on drop.
pub struct MemoryProvider {
    snapshots: RwLock<Vec<Stored>>,
    failures: std::sync::Mutex<Failures>,
    authenticated: AtomicBool,
    sign_in_fails: AtomicBool,
    next_seq: AtomicU64,
    retention: usize,
    metadata_reads: AtomicUsize,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    sign_ins: AtomicUsize,
}

impl MemoryProvider {
    /// Create an empty, authenticated store.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            snapshots: RwLock::new(Vec::new()),
            failures: std::sync::Mutex::new(Failures::default()),
            authenticated: AtomicBool::new(true),
            sign_in_fails: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            retention,
            metadata_reads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            sign_ins: AtomicUsize::new(0),
        }
    }

    /// Place a snapshot with an explicit modification time, bypassing counters
    /// and pruning.
    pub async fn insert_snapshot(
        &self,
        data: Vec<u8>,
        properties: SnapshotProperties,
        modified_time: DateTime<Utc>,
    ) -> SnapshotMetadata {
        let metadata = SnapshotMetadata {
            id: Uuid::new_v4().to_string(),
            modified_time,
            size: data.len() as u64,
            properties,
        };
        self.snapshots.write().await.push(Stored {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            metadata: metadata.clone(),
            data,
        });
        metadata
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    /// Make subsequent `sign_in` calls fail.
    pub fn set_sign_in_fails(&self, fails: bool) {
        self.sign_in_fails.store(fails, Ordering::SeqCst);
    }

    /// Fail the next `count` metadata reads.
    pub fn fail_metadata(&self, failure: InjectedFailure, count: usize) {
        if let Ok(mut f) = self.failures.lock() {
            f.metadata.extend(std::iter::repeat(failure).take(count));
        }
    }

    /// Fail the next `count` uploads.
    pub fn fail_uploads(&self, failure: InjectedFailure, count: usize) {
        if let Ok(mut f) = self.failures.lock() {
            f.upload.extend(std::iter::repeat(failure).take(count));
        }
    }

    /// Fail the next `count` downloads.
    pub fn fail_downloads(&self, failure: InjectedFailure, count: usize) {
        if let Ok(mut f) = self.failures.lock() {
            f.download.extend(std::iter::repeat(failure).take(count));
        }
    }

    pub fn metadata_reads(&self) -> usize {
        self.metadata_reads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn sign_in_count(&self) -> usize {
        self.sign_ins.load(Ordering::SeqCst)
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Raw payload of a stored snapshot.
    pub async fn payload(&self, id: &str) -> Option<Vec<u8>> {
        self.snapshots
            .read()
            .await
            .iter()
            .find(|s| s.metadata.id == id)
            .map(|s| s.data.clone())
    }

    fn take_failure(&self, select: impl FnOnce(&mut Failures) -> &mut Vec<InjectedFailure>) -> Result<()> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| Error::Storage("Failure injection lock poisoned".to_string()))?;
        let queue = select(&mut failures);
        if queue.is_empty() {
            return Ok(());
        }
        Err(queue.remove(0).to_error())
    }

    fn require_auth(&self) -> Result<()> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::AuthRequired)
        }
    }

    async fn sorted(&self) -> Vec<Stored> {
        let mut all = self.snapshots.read().await.clone();
        all.sort_by(|a, b| {
            b.metadata
                .modified_time
                .cmp(&a.metadata.modified_time)
                .then(b.seq.cmp(&a.seq))
        });
        all
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn sign_in(&self) -> Result<()> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        if self.sign_in_fails.load(Ordering::SeqCst) {
            return Err(Error::AuthFailed("sign-in rejected".to_string()));
        }
        self.set_authenticated(true);
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_authenticated(false);
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        self.metadata_reads.fetch_add(1, Ordering::SeqCst);
        self.require_auth()?;
        self.take_failure(|f| &mut f.metadata)?;
        Ok(self.sorted().await.into_iter().next().map(|s| s.metadata))
    }

    async fn upload_snapshot(
        &self,
        data: Vec<u8>,
        properties: &SnapshotProperties,
        progress: Option<Progress>,
    ) -> Result<SnapshotMetadata> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.require_auth()?;
        self.take_failure(|f| &mut f.upload)?;

        report(&progress, 0.0);
        let metadata = self
            .insert_snapshot(data, properties.clone(), Utc::now())
            .await;
        report(&progress, 1.0);

        prune_after_upload(self, self.retention).await;
        Ok(metadata)
    }

    async fn download_snapshot(&self, id: &str, progress: Option<Progress>) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.require_auth()?;
        self.take_failure(|f| &mut f.download)?;

        let data = self
            .payload(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Snapshot {}", id)))?;
        report(&progress, 1.0);
        Ok(data)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.require_auth()?;
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|s| s.metadata.id != id);
        if snapshots.len() == before {
            return Err(Error::NotFound(format!("Snapshot {}", id)));
        }
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        self.require_auth()?;
        Ok(self.sorted().await.into_iter().map(|s| s.metadata).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Mutex};

    fn props(hash: &str) -> SnapshotProperties {
        SnapshotProperties {
            content_hash: hash.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upload_download() {
        let provider = MemoryProvider::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: Progress = Arc::new(move |p| sink.lock().unwrap().push(p));

        let meta = provider
            .upload_snapshot(b"payload".to_vec(), &props("h1"), Some(progress))
            .await
            .unwrap();

        assert_eq!(meta.size, 7);
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 1.0]);

        let data = provider.download_snapshot(&meta.id, None).await.unwrap();
        assert_eq!(data, b"payload");

        let latest = provider.latest_snapshot_metadata().await.unwrap().unwrap();
        assert_eq!(latest.id, meta.id);
        assert_eq!(latest.properties.content_hash, "h1");
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest() {
        let provider = MemoryProvider::new();
        assert!(provider.latest_snapshot_metadata().await.unwrap().is_none());
        assert!(matches!(
            provider.download_snapshot("missing", None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let provider = MemoryProvider::with_retention(2);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        provider
            .insert_snapshot(vec![1], props("old"), base)
            .await;
        provider
            .insert_snapshot(vec![2], props("mid"), base + Duration::hours(1))
            .await;

        provider
            .upload_snapshot(vec![3], &props("new"), None)
            .await
            .unwrap();

        let remaining = provider.list_snapshots().await.unwrap();
        let hashes: Vec<&str> = remaining
            .iter()
            .map(|s| s.properties.content_hash.as_str())
            .collect();
        assert_eq!(hashes, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let provider = MemoryProvider::new();
        provider.fail_metadata(InjectedFailure::Network, 1);

        assert!(matches!(
            provider.latest_snapshot_metadata().await,
            Err(Error::Network(_))
        ));
        assert!(provider.latest_snapshot_metadata().await.is_ok());
        assert_eq!(provider.metadata_reads(), 2);
    }

    #[tokio::test]
    async fn test_auth_toggle() {
        let provider = MemoryProvider::new();
        provider.set_authenticated(false);
        assert!(!provider.is_authenticated());
        assert!(matches!(
            provider.list_snapshots().await,
            Err(Error::AuthRequired)
        ));

        provider.set_sign_in_fails(true);
        assert!(matches!(provider.sign_in().await, Err(Error::AuthFailed(_))));

        provider.set_sign_in_fails(false);
        provider.sign_in().await.unwrap();
        assert!(provider.is_authenticated());
        assert_eq!(provider.sign_in_count(), 2);
    }
}
