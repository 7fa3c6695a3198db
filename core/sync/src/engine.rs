//! Core sync engine: one whole-snapshot last-writer-wins attempt at a time.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use notesync_common::{DeviceId, Error, Passphrase, Result, UserId};
use notesync_crypto::{envelope, KdfParams};
use notesync_replica::{ImportMode, LocalReplica};
use notesync_snapshot::{is_archive, SCHEMA_VERSION};
use notesync_storage::{Progress, SnapshotMetadata, SnapshotProperties, SnapshotStore};

use crate::config::SyncConfig;
use crate::conflict::{decide, ConflictDetails, Direction, Resolution};
use crate::metadata::{load_metadata, save_metadata, MetadataStore, SyncMetadata, METADATA_KEY};
use crate::network::NetworkMonitor;
use crate::queue::{OfflineQueue, PendingSyncRequest};
use crate::retry::RetryExecutor;
use crate::state::{StateHub, SubscriptionId, SyncState, SyncStatus};

/// How a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerOptions {
    /// Report failures through state only, never as `Err`.
    pub silent: bool,
    /// User-initiated. Queued when offline, bypasses network gating and
    /// may start an interactive sign-in.
    pub is_manual: bool,
    /// Force a direction instead of deciding from timestamps.
    pub resolution: Option<Resolution>,
}

impl TriggerOptions {
    /// Background trigger (timer, debounce, connectivity).
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    pub fn manual() -> Self {
        Self {
            is_manual: true,
            ..Self::default()
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }
}

/// Why a trigger did not start an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadySyncing,
    Offline,
    NetworkPolicy,
    AwaitingResolution,
    AuthRequired,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::AlreadySyncing => "a sync is already running",
            SkipReason::Offline => "device is offline",
            SkipReason::NetworkPolicy => "current network is not allowed",
            SkipReason::AwaitingResolution => "a conflict is awaiting resolution",
            SkipReason::AuthRequired => "not signed in",
        };
        f.write_str(reason)
    }
}

/// Result of [`SyncEngine::trigger_sync`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Remote snapshot merged into local data.
    Pulled(SnapshotMetadata),
    /// Local data uploaded as a new snapshot.
    Pushed(SnapshotMetadata),
    /// Local data already matches the remote snapshot.
    PushSkipped,
    UpToDate,
    Conflict(ConflictDetails),
    /// Offline manual request stored for the next online event.
    Queued(PendingSyncRequest),
    Skipped(SkipReason),
    /// Silent attempt failed. The error is also in [`SyncState::last_error`].
    Failed(String),
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Pulled(remote) => write!(f, "pulled snapshot {}", remote.id),
            SyncOutcome::Pushed(remote) => write!(f, "pushed snapshot {}", remote.id),
            SyncOutcome::PushSkipped => f.write_str("remote already up to date"),
            SyncOutcome::UpToDate => f.write_str("up to date"),
            SyncOutcome::Conflict(_) => f.write_str("conflict, resolution required"),
            SyncOutcome::Queued(request) => write!(f, "queued ({})", request.id),
            SyncOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            SyncOutcome::Failed(message) => write!(f, "failed: {}", message),
        }
    }
}

/// Clears the in-flight flag when an attempt ends.
struct AttemptGuard<'a>(&'a AtomicBool);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sync engine for one user's records.
///
/// Constructed once with its adapters and shared behind an `Arc`.
pub struct SyncEngine {
    user: UserId,
    store: Arc<dyn SnapshotStore>,
    replica: Arc<dyn LocalReplica>,
    metadata_store: Arc<dyn MetadataStore>,
    network: Arc<dyn NetworkMonitor>,
    config: SyncConfig,
    retry: RetryExecutor,
    kdf: KdfParams,
    passphrase: RwLock<Option<Passphrase>>,
    progress: Option<Progress>,
    metadata: Mutex<Option<SyncMetadata>>,
    queue: OfflineQueue,
    state: Arc<StateHub>,
    syncing: AtomicBool,
    /// Bumped by every attempt so a stale settle timer does nothing.
    generation: Arc<AtomicU64>,
}

impl SyncEngine {
    pub fn new(
        user: UserId,
        store: Arc<dyn SnapshotStore>,
        replica: Arc<dyn LocalReplica>,
        metadata_store: Arc<dyn MetadataStore>,
        network: Arc<dyn NetworkMonitor>,
        config: SyncConfig,
    ) -> Self {
        let initial = SyncState {
            is_online: network.is_online(),
            ..SyncState::default()
        };

        Self {
            user,
            store,
            replica,
            queue: OfflineQueue::new(Arc::clone(&metadata_store)),
            metadata_store,
            network,
            retry: RetryExecutor::new(config.retry_config()),
            config,
            kdf: KdfParams::standard(),
            passphrase: RwLock::new(None),
            progress: None,
            metadata: Mutex::new(None),
            state: Arc::new(StateHub::new(initial)),
            syncing: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Encrypt uploads and decrypt downloads with `passphrase`.
    pub fn with_passphrase(self, passphrase: Passphrase) -> Self {
        self.set_passphrase(Some(passphrase));
        self
    }

    /// Override the KDF cost. Every device must use the same parameters.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf = params;
        self
    }

    /// Receive transfer progress in `[0, 1]`.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn set_passphrase(&self, passphrase: Option<Passphrase>) {
        match self.passphrase.write() {
            Ok(mut current) => *current = passphrase,
            Err(_) => warn!("Passphrase lock poisoned, passphrase unchanged"),
        }
    }

    pub fn has_passphrase(&self) -> bool {
        self.passphrase
            .read()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// Initialize the provider and load (or create) the sync metadata.
    pub async fn initialize(&self) -> Result<SyncMetadata> {
        self.store.initialize().await?;
        let metadata = self.metadata().await?;
        let online = self.network.is_online();
        self.state.update(|s| {
            s.is_online = online;
            s.last_sync_time = metadata.last_sync_at;
        });
        info!(
            "Sync engine ready for {} on {} (device {})",
            self.user,
            self.store.name(),
            metadata.device_id
        );
        Ok(metadata)
    }

    /// Current metadata, created with a fresh device id on first use.
    pub async fn metadata(&self) -> Result<SyncMetadata> {
        let mut cached = self.metadata.lock().await;
        if let Some(metadata) = cached.as_ref() {
            return Ok(metadata.clone());
        }

        let metadata = match load_metadata(self.metadata_store.as_ref()).await? {
            Some(metadata) => metadata,
            None => {
                let metadata = SyncMetadata::new(DeviceId::generate());
                save_metadata(self.metadata_store.as_ref(), &metadata).await?;
                info!("Created sync metadata for device {}", metadata.device_id);
                metadata
            }
        };
        *cached = Some(metadata.clone());
        Ok(metadata)
    }

    async fn update_metadata<F>(&self, f: F) -> Result<SyncMetadata>
    where
        F: FnOnce(&mut SyncMetadata),
    {
        let mut metadata = self.metadata().await?;
        f(&mut metadata);
        save_metadata(self.metadata_store.as_ref(), &metadata).await?;
        *self.metadata.lock().await = Some(metadata.clone());
        Ok(metadata)
    }

    pub fn state(&self) -> SyncState {
        self.state.current()
    }

    /// Register a state listener. It receives the current state immediately.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SyncState) + Send + Sync + 'static,
    {
        self.state.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }

    pub fn watch(&self) -> watch::Receiver<SyncState> {
        self.state.watch()
    }

    pub async fn pending_queue_count(&self) -> Result<usize> {
        self.queue.len().await
    }

    pub async fn pending_requests(&self) -> Result<Vec<PendingSyncRequest>> {
        self.queue.list().await
    }

    /// Run one sync attempt.
    ///
    /// Manual triggers made while offline are queued. Background triggers are
    /// skipped when offline, on a disallowed network, while a conflict awaits
    /// resolution, or while another attempt runs.
    ///
    /// # Errors
    /// Only non-silent triggers return errors; the state moves to `Error` first.
    pub async fn trigger_sync(&self, options: TriggerOptions) -> Result<SyncOutcome> {
        if !self.network.is_online() {
            self.state.update(|s| s.is_online = false);
            if options.is_manual {
                let request = self.queue.enqueue(options).await?;
                info!("Offline, queued manual sync {}", request.id);
                return Ok(SyncOutcome::Queued(request));
            }
            debug!("Offline, skipping background sync");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }

        if !options.is_manual {
            let class = self.network.class();
            if !self.config.network_policy.allows(class) {
                debug!("Network {:?} not allowed by policy, skipping", class);
                return Ok(SyncOutcome::Skipped(SkipReason::NetworkPolicy));
            }
            if options.resolution.is_none() && self.state.current().status == SyncStatus::Conflict
            {
                debug!("Conflict pending, skipping background sync");
                return Ok(SyncOutcome::Skipped(SkipReason::AwaitingResolution));
            }
        }

        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in progress, dropping trigger");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
        }
        let _guard = AttemptGuard(&self.syncing);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.state.update(|s| {
            s.status = SyncStatus::Syncing;
            s.is_online = true;
            s.last_error = None;
        });

        match self.run_attempt(&options).await {
            Ok(SyncOutcome::Conflict(details)) => {
                warn!(
                    "Conflict: remote snapshot {} and local data both changed",
                    details.remote.id
                );
                self.state.update(|s| {
                    s.status = SyncStatus::Conflict;
                    s.conflict_details = Some(details.clone());
                });
                Ok(SyncOutcome::Conflict(details))
            }
            Ok(outcome) => {
                info!("Sync finished: {}", outcome);
                let last_sync = self.metadata().await.ok().and_then(|m| m.last_sync_at);
                self.state.update(|s| {
                    s.status = SyncStatus::Success;
                    s.last_sync_time = last_sync;
                    s.conflict_details = None;
                });
                self.schedule_settle(generation);
                Ok(outcome)
            }
            Err(err) => {
                let message = err.to_string();
                self.state.update(|s| {
                    s.status = SyncStatus::Error;
                    s.last_error = Some(message.clone());
                });
                self.schedule_settle(generation);

                if !options.silent {
                    error!("Sync failed: {}", message);
                    return Err(err);
                }
                if matches!(err, Error::AuthRequired) {
                    warn!("Background sync skipped: {}", message);
                    return Ok(SyncOutcome::Skipped(SkipReason::AuthRequired));
                }
                error!("Background sync failed: {}", message);
                Ok(SyncOutcome::Failed(message))
            }
        }
    }

    /// Replay queued requests, oldest first, then sync if nothing was queued.
    ///
    /// Queued requests were manual, so they replay as manual (silently) and
    /// bypass network gating. Each is removed before it runs and is not
    /// retried. Replay stops if connectivity drops again.
    pub async fn on_connectivity_restored(&self) -> Result<Vec<SyncOutcome>> {
        self.state.update(|s| s.is_online = true);

        let mut outcomes = Vec::new();
        while self.network.is_online() {
            let Some(request) = self.queue.pop_front().await? else {
                break;
            };
            info!(
                "Replaying sync {} queued at {}",
                request.id, request.timestamp
            );
            let options = TriggerOptions {
                silent: true,
                is_manual: true,
                resolution: request.options.resolution,
            };
            let outcome = match self.trigger_sync(options).await {
                Ok(outcome) => outcome,
                Err(e) => SyncOutcome::Failed(e.to_string()),
            };
            outcomes.push(outcome);
        }

        if outcomes.is_empty() {
            outcomes.push(self.trigger_sync(TriggerOptions::silent()).await?);
        }
        Ok(outcomes)
    }

    pub fn on_connectivity_lost(&self) {
        self.state.update(|s| s.is_online = false);
    }

    /// Forget sync history: metadata and the pending queue are deleted and
    /// fresh metadata with a new device id is created. Records are untouched.
    ///
    /// # Errors
    /// - `InvalidInput` while an attempt is running
    pub async fn reset(&self) -> Result<SyncMetadata> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::InvalidInput(
                "Cannot reset while a sync is running".to_string(),
            ));
        }
        let _guard = AttemptGuard(&self.syncing);
        self.generation.fetch_add(1, Ordering::SeqCst);

        self.metadata_store.remove(METADATA_KEY).await?;
        self.queue.clear().await?;

        let fresh = SyncMetadata::new(DeviceId::generate());
        save_metadata(self.metadata_store.as_ref(), &fresh).await?;
        *self.metadata.lock().await = Some(fresh.clone());

        self.state.update(|s| {
            s.status = SyncStatus::Idle;
            s.last_sync_time = None;
            s.last_error = None;
            s.conflict_details = None;
        });
        warn!("Sync state reset, new device id {}", fresh.device_id);
        Ok(fresh)
    }

    fn schedule_settle(&self, generation: u64) {
        let Some(delay) = self.config.settle_delay() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            let status = state.current().status;
            if matches!(status, SyncStatus::Success | SyncStatus::Error) {
                state.update(|s| s.status = SyncStatus::Idle);
            }
        });
    }

    async fn run_attempt(&self, options: &TriggerOptions) -> Result<SyncOutcome> {
        self.ensure_authenticated(options).await?;
        let metadata = self.metadata().await?;

        let remote = self
            .retry
            .execute(|| self.store.latest_snapshot_metadata())
            .await?;
        let local_changed_at = self.replica.latest_changed_timestamp(&self.user).await?;
        debug!(
            "Remote {:?}, local changed {:?}, last sync {:?}",
            remote.as_ref().map(|r| (&r.id, r.modified_time)),
            local_changed_at,
            metadata.last_sync_at
        );

        if let Some(resolution) = options.resolution {
            info!("Applying {} resolution", resolution);
            return match resolution {
                Resolution::Push => self.push(remote.as_ref(), &metadata, false).await,
                Resolution::Pull => {
                    let remote = remote.ok_or_else(|| {
                        Error::NotFound("No remote snapshot to pull".to_string())
                    })?;
                    self.pull(&remote).await
                }
            };
        }

        match (decide(remote.as_ref(), local_changed_at, &metadata), remote) {
            (Direction::Conflict, Some(remote)) => {
                let local = self.replica.data_summary(&self.user).await?;
                Ok(SyncOutcome::Conflict(ConflictDetails {
                    remote,
                    local,
                    last_sync_at: metadata.last_sync_at,
                    local_changed_at,
                    detected_at: Utc::now(),
                }))
            }
            (Direction::Pull, Some(remote)) => self.pull(&remote).await,
            (Direction::Push, remote) => self.push(remote.as_ref(), &metadata, true).await,
            _ => {
                self.update_metadata(|m| m.last_sync_at = Some(Utc::now()))
                    .await?;
                Ok(SyncOutcome::UpToDate)
            }
        }
    }

    async fn ensure_authenticated(&self, options: &TriggerOptions) -> Result<()> {
        self.store.initialize().await?;
        if self.store.is_authenticated() {
            return Ok(());
        }
        if !options.is_manual {
            return Err(Error::AuthRequired);
        }

        info!("Not signed in to {}, starting sign-in", self.store.name());
        self.store.sign_in().await.map_err(|e| match e {
            Error::AuthFailed(msg) => Error::AuthFailed(msg),
            other => Error::AuthFailed(other.to_string()),
        })?;

        if !self.store.is_authenticated() {
            return Err(Error::AuthFailed(
                "Sign-in completed without credentials".to_string(),
            ));
        }
        Ok(())
    }

    async fn pull(&self, remote: &SnapshotMetadata) -> Result<SyncOutcome> {
        info!("Pulling snapshot {} ({} bytes)", remote.id, remote.size);
        let payload = self
            .retry
            .execute(|| {
                self.store
                    .download_snapshot(&remote.id, self.progress.clone())
            })
            .await?;

        let archive = self.open_payload(payload, remote.properties.encrypted)?;
        self.replica
            .import_snapshot(&self.user, &archive, ImportMode::Merge)
            .await?;

        let remote_id = remote.id.clone();
        let modified_time = remote.modified_time;
        self.update_metadata(move |m| {
            m.last_sync_at = Some(modified_time);
            m.remote_snapshot_id = Some(remote_id);
            m.last_sync_device_id = Some(m.device_id.clone());
        })
        .await?;

        Ok(SyncOutcome::Pulled(remote.clone()))
    }

    async fn push(
        &self,
        remote: Option<&SnapshotMetadata>,
        metadata: &SyncMetadata,
        skip_unchanged: bool,
    ) -> Result<SyncOutcome> {
        let summary = self.replica.data_summary(&self.user).await?;

        if skip_unchanged {
            if let Some(remote) = remote.filter(|r| r.properties.content_hash == summary.content_hash)
            {
                info!("Local data matches snapshot {}, skipping upload", remote.id);
                let remote_id = remote.id.clone();
                self.update_metadata(move |m| {
                    m.last_sync_at = Some(Utc::now());
                    m.remote_snapshot_id = Some(remote_id);
                })
                .await?;
                return Ok(SyncOutcome::PushSkipped);
            }
        }

        let archive = self.replica.export_snapshot(&self.user).await?;
        let (payload, encrypted) = self.seal_payload(archive)?;
        let properties = SnapshotProperties {
            entry_count: summary.entry_count,
            image_count: summary.image_count,
            content_hash: summary.content_hash,
            encrypted,
            device_id: Some(metadata.device_id.to_string()),
            schema_version: SCHEMA_VERSION,
        };

        info!(
            "Pushing snapshot: {} entries, {} images, {} bytes{}",
            properties.entry_count,
            properties.image_count,
            payload.len(),
            if encrypted { ", encrypted" } else { "" }
        );
        let uploaded = self
            .retry
            .execute(|| {
                self.store
                    .upload_snapshot(payload.clone(), &properties, self.progress.clone())
            })
            .await?;

        let remote_id = uploaded.id.clone();
        let modified_time = uploaded.modified_time;
        self.update_metadata(move |m| {
            m.last_sync_at = Some(modified_time);
            m.remote_snapshot_id = Some(remote_id);
            m.last_sync_device_id = Some(m.device_id.clone());
        })
        .await?;

        Ok(SyncOutcome::Pushed(uploaded))
    }

    fn current_passphrase(&self) -> Result<Option<Passphrase>> {
        self.passphrase
            .read()
            .map(|p| p.clone())
            .map_err(|_| Error::Crypto("Passphrase lock poisoned".to_string()))
    }

    fn seal_payload(&self, archive: Vec<u8>) -> Result<(Vec<u8>, bool)> {
        match self.current_passphrase()? {
            Some(passphrase) => Ok((
                envelope::seal_with_params(&archive, &passphrase, &self.kdf)?,
                true,
            )),
            None => Ok((archive, false)),
        }
    }

    /// Unwrap a downloaded payload. Unflagged payloads that are not an
    /// archive are treated as encrypted.
    fn open_payload(&self, payload: Vec<u8>, flagged: bool) -> Result<Vec<u8>> {
        if !flagged && is_archive(&payload) {
            return Ok(payload);
        }

        let passphrase = self.current_passphrase()?.ok_or(Error::PasswordRequired)?;
        envelope::open_with_params(&payload, &passphrase, &self.kdf).map_err(|e| {
            debug!("Snapshot decryption failed: {}", e);
            Error::DecryptionFailed
        })
    }
}
