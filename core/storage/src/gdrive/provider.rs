//! Google Drive snapshot store.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use notesync_common::{Error, Result};

use crate::provider::{
    prune_after_upload, Progress, SnapshotMetadata, SnapshotProperties, SnapshotStore,
    DEFAULT_RETENTION,
};

use super::auth::{AuthConfig, AuthManager, AuthorizationHandler, TokenManager, TokenStore};
use super::client::{DriveClient, DriveFile};

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

/// Google Drive provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GDriveConfig {
    #[serde(flatten)]
    pub auth: AuthConfig,
    /// Where tokens are persisted. `None` keeps them in memory only.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_retention")]
    pub retention: usize,
}

impl GDriveConfig {
    /// Default token location under the user's config directory.
    pub fn default_token_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("notesync").join("gdrive_token.json"))
    }
}

struct Session {
    tokens: Arc<TokenManager>,
    client: DriveClient,
}

/// Snapshot store in the Drive `appDataFolder` of the signed-in user.
pub struct GDriveProvider {
    config: GDriveConfig,
    handler: Option<Arc<dyn AuthorizationHandler>>,
    session: OnceCell<Session>,
}

impl GDriveProvider {
    /// Create a provider. Nothing is validated until [`SnapshotStore::initialize`].
    pub fn new(config: GDriveConfig) -> Self {
        Self {
            config,
            handler: None,
            session: OnceCell::new(),
        }
    }

    /// Attach the handler used by interactive sign-in.
    pub fn with_handler(mut self, handler: Arc<dyn AuthorizationHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    async fn session(&self) -> Result<&Session> {
        self.session
            .get_or_try_init(|| async {
                let auth = AuthManager::new(self.config.auth.clone())?;
                let tokens = Arc::new(TokenManager::new(
                    auth,
                    TokenStore::new(self.config.token_path.clone()),
                ));
                tokens.restore().await?;
                let client = DriveClient::new(Arc::clone(&tokens))?;
                info!("Google Drive provider initialized");
                Ok(Session { tokens, client })
            })
            .await
    }

    fn to_metadata(file: DriveFile) -> SnapshotMetadata {
        SnapshotMetadata {
            size: file.size_bytes().unwrap_or(0),
            modified_time: file.modified_time.unwrap_or_default(),
            properties: SnapshotProperties::from_map(&file.app_properties),
            id: file.id,
        }
    }

    fn snapshot_name() -> String {
        format!(
            "notesync-{}.snapshot",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        )
    }
}

#[async_trait]
impl SnapshotStore for GDriveProvider {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn initialize(&self) -> Result<()> {
        self.session().await.map(|_| ())
    }

    async fn sign_in(&self) -> Result<()> {
        let session = self.session().await?;
        let handler = self.handler.as_ref().ok_or_else(|| {
            Error::AuthFailed("Interactive sign-in is not available".to_string())
        })?;

        let auth = session.tokens.auth_manager();
        let pending = auth.begin_authorization();
        let response = handler
            .authorize(&pending.url)
            .await
            .map_err(|e| match e {
                Error::AuthFailed(msg) => Error::AuthFailed(msg),
                other => Error::AuthFailed(other.to_string()),
            })?;

        let tokens = auth.finish_authorization(pending, response).await?;
        session.tokens.set_tokens(tokens).await?;
        info!("Signed in to Google Drive");
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.session.get() else {
            return Ok(());
        };

        if let Some(tokens) = session.tokens.clear().await? {
            let token = tokens.refresh_token.unwrap_or(tokens.access_token);
            if let Err(e) = session.client.revoke(&token).await {
                warn!("Token revocation failed: {}", e);
            }
        }
        info!("Signed out of Google Drive");
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.session
            .get()
            .map(|s| s.tokens.has_tokens())
            .unwrap_or(false)
    }

    async fn latest_snapshot_metadata(&self) -> Result<Option<SnapshotMetadata>> {
        let session = self.session().await?;
        let files = session.client.list_files(Some(1)).await?;
        Ok(files.into_iter().next().map(Self::to_metadata))
    }

    async fn upload_snapshot(
        &self,
        data: Vec<u8>,
        properties: &SnapshotProperties,
        progress: Option<Progress>,
    ) -> Result<SnapshotMetadata> {
        let session = self.session().await?;
        let name = Self::snapshot_name();
        debug!("Uploading {} ({} bytes)", name, data.len());

        let file = session
            .client
            .upload_resumable(&name, &data, &properties.to_map(), &progress)
            .await?;

        let mut metadata = Self::to_metadata(file);
        // The upload response may omit appProperties.
        metadata.properties = properties.clone();
        if metadata.size == 0 {
            metadata.size = data.len() as u64;
        }

        prune_after_upload(self, self.config.retention).await;
        Ok(metadata)
    }

    async fn download_snapshot(&self, id: &str, progress: Option<Progress>) -> Result<Vec<u8>> {
        let session = self.session().await?;
        session.client.download(id, &progress).await
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        let session = self.session().await?;
        session.client.delete(id).await
    }

    async fn list_snapshots(&self) -> Result<Vec<SnapshotMetadata>> {
        let session = self.session().await?;
        let files = session.client.list_files(None).await?;
        Ok(files.into_iter().map(Self::to_metadata).collect())
    }
}

/// Create a Google Drive provider from JSON configuration.
pub fn create_gdrive_provider(
    config: serde_json::Value,
    handler: Option<Arc<dyn AuthorizationHandler>>,
) -> Result<Arc<dyn SnapshotStore>> {
    let gdrive_config: GDriveConfig = serde_json::from_value(config)
        .map_err(|e| Error::InvalidInput(format!("Invalid GDrive config: {}", e)))?;

    let provider = GDriveProvider::new(gdrive_config);
    Ok(match handler {
        Some(handler) => Arc::new(provider.with_handler(handler)),
        None => Arc::new(provider),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> GDriveConfig {
        GDriveConfig {
            auth: AuthConfig {
                client_id: "test_client".to_string(),
                client_secret: None,
                redirect_url: super::super::auth::DEFAULT_REDIRECT_URL.to_string(),
            },
            token_path: None,
            retention: 3,
        }
    }

    #[test]
    fn test_config_flattens_auth() {
        let json = serde_json::json!({ "client_id": "abc" });
        let config: GDriveConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.auth.client_id, "abc");
        assert_eq!(config.retention, DEFAULT_RETENTION);
        assert!(config.auth.redirect_url.starts_with("http://127.0.0.1"));
    }

    #[tokio::test]
    async fn test_initialize_without_client_id_fails() {
        let provider = GDriveProvider::new(GDriveConfig::default());
        assert!(matches!(
            provider.initialize().await,
            Err(Error::ProviderInit(_))
        ));
        assert!(!provider.is_authenticated());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let provider = GDriveProvider::new(test_config());
        provider.initialize().await.unwrap();
        provider.initialize().await.unwrap();
        assert!(!provider.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_in_without_handler_fails() {
        let provider = GDriveProvider::new(test_config());
        assert!(matches!(
            provider.sign_in().await,
            Err(Error::AuthFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthenticated_calls_require_auth() {
        let provider = GDriveProvider::new(test_config());
        assert!(matches!(
            provider.latest_snapshot_metadata().await,
            Err(Error::AuthRequired)
        ));
    }

    #[test]
    fn test_to_metadata() {
        let mut props = HashMap::new();
        props.insert("contentHash".to_string(), "h".to_string());
        props.insert("imageCount".to_string(), "2".to_string());

        let file = DriveFile {
            id: "file_id".to_string(),
            name: "notesync-x.snapshot".to_string(),
            size: Some("1024".to_string()),
            modified_time: Some(Utc::now()),
            app_properties: props,
        };

        let metadata = GDriveProvider::to_metadata(file);
        assert_eq!(metadata.id, "file_id");
        assert_eq!(metadata.size, 1024);
        assert_eq!(metadata.properties.content_hash, "h");
        assert_eq!(metadata.properties.image_count, 2);
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let result = create_gdrive_provider(serde_json::json!({ "retention": "many" }), None);
        assert!(result.is_err());
    }
}
