//! Offline queue of manual sync requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use notesync_common::Result;

use crate::engine::TriggerOptions;
use crate::metadata::{MetadataStore, PENDING_KEY};

/// A manual sync requested while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSyncRequest {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub options: TriggerOptions,
}

/// FIFO queue persisted under [`PENDING_KEY`].
///
/// Every mutation is a load-modify-store under one lock.
pub struct OfflineQueue {
    store: Arc<dyn MetadataStore>,
    lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Vec<PendingSyncRequest>> {
        match self.store.load(PENDING_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write(&self, items: &[PendingSyncRequest]) -> Result<()> {
        if items.is_empty() {
            return self.store.remove(PENDING_KEY).await;
        }
        self.store
            .store(PENDING_KEY, &serde_json::to_value(items)?)
            .await
    }

    /// Append a request and return it.
    pub async fn enqueue(&self, options: TriggerOptions) -> Result<PendingSyncRequest> {
        let _guard = self.lock.lock().await;
        let request = PendingSyncRequest {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            options,
        };

        let mut items = self.read().await?;
        items.push(request.clone());
        self.write(&items).await?;
        debug!("Queued sync request {} ({} pending)", request.id, items.len());
        Ok(request)
    }

    /// Remove and return the oldest request.
    pub async fn pop_front(&self) -> Result<Option<PendingSyncRequest>> {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        if items.is_empty() {
            return Ok(None);
        }
        let first = items.remove(0);
        self.write(&items).await?;
        Ok(Some(first))
    }

    /// Remove a request by id. Returns whether it was present.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut items = self.read().await?;
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(false);
        }
        self.write(&items).await?;
        Ok(true)
    }

    pub async fn list(&self) -> Result<Vec<PendingSyncRequest>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.remove(PENDING_KEY).await
    }
}
