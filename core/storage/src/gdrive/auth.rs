//! OAuth2 authentication and token management for Google Drive.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use notesync_common::{Error, Result};

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Token revocation endpoint.
pub(crate) const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
/// Default loopback redirect for desktop apps.
pub const DEFAULT_REDIRECT_URL: &str = "http://127.0.0.1:8085/callback";

/// Hidden per-app folder; the app cannot see the user's other files.
const APPDATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    /// Installed-app clients may omit the secret when using PKCE.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_redirect")]
    pub redirect_url: String,
}

fn default_redirect() -> String {
    DEFAULT_REDIRECT_URL.to_string()
}

/// What the user's browser was redirected to after consent.
#[derive(Debug, Clone)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
}

/// Presents the consent URL to the user and captures the redirect.
#[async_trait]
pub trait AuthorizationHandler: Send + Sync {
    async fn authorize(&self, url: &str) -> Result<AuthorizationResponse>;
}

/// A consent URL with the secrets needed to finish the exchange.
pub struct PendingAuthorization {
    pub url: String,
    csrf: CsrfToken,
    verifier: oauth2::PkceCodeVerifier,
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: ConfiguredClient,
    http: oauth2::reqwest::Client,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// # Errors
    /// - `ProviderInit` if the client id is empty or a URL is invalid
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::ProviderInit(
                "Google Drive client id is not configured".to_string(),
            ));
        }

        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(GOOGLE_AUTH_URL.to_string())
                    .map_err(|e| Error::ProviderInit(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
                    .map_err(|e| Error::ProviderInit(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url.clone())
                    .map_err(|e| Error::ProviderInit(format!("Invalid redirect URL: {}", e)))?,
            );

        let client = match &config.client_secret {
            Some(secret) => client.set_client_secret(ClientSecret::new(secret.clone())),
            None => client,
        };

        // Token endpoints must not follow redirects (SSRF).
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::ProviderInit(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Build the consent URL with a fresh CSRF state and PKCE challenge.
    pub fn begin_authorization(&self) -> PendingAuthorization {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(APPDATA_SCOPE.to_string()))
            .set_pkce_challenge(challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        PendingAuthorization {
            url: url.to_string(),
            csrf,
            verifier,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - `AuthFailed` on state mismatch or a rejected exchange
    pub async fn finish_authorization(
        &self,
        pending: PendingAuthorization,
        response: AuthorizationResponse,
    ) -> Result<Tokens> {
        if response.state != *pending.csrf.secret() {
            return Err(Error::AuthFailed("OAuth state mismatch".to_string()));
        }

        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(response.code))
            .set_pkce_verifier(pending.verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::AuthFailed(format!("Token exchange failed: {}", e)))?;

        Ok(tokens_from(
            token_result.access_token().secret().clone(),
            token_result.refresh_token().map(|t| t.secret().clone()),
            token_result.expires_in(),
        ))
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - `AuthFailed` if the refresh token was revoked
    /// - `Network` on transport failure
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| match e {
                oauth2::RequestTokenError::Request(inner) => {
                    Error::Network(format!("Token refresh failed: {}", inner))
                }
                other => Error::AuthFailed(format!("Token refresh failed: {}", other)),
            })?;

        // Refresh tokens may or may not be returned in refresh response
        let refresh = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .or_else(|| Some(refresh_token.to_string()));

        Ok(tokens_from(
            token_result.access_token().secret().clone(),
            refresh,
            token_result.expires_in(),
        ))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

fn tokens_from(
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<std::time::Duration>,
) -> Tokens {
    let expires_in = expires_in.unwrap_or_else(|| std::time::Duration::from_secs(3600));
    let expires_at =
        Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));
    Tokens {
        access_token,
        refresh_token,
        expires_at,
    }
}

/// Persists tokens as JSON so sign-in survives restarts.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Store that never touches disk.
    pub fn ephemeral() -> Self {
        Self { path: None }
    }

    pub async fn load(&self) -> Result<Option<Tokens>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, tokens: &Tokens) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(tokens)?).await?;
        debug!("Saved tokens to {}", path.display());
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Token manager that automatically refreshes expired tokens.
pub struct TokenManager {
    auth_manager: AuthManager,
    store: TokenStore,
    tokens: RwLock<Option<Tokens>>,
    present: AtomicBool,
}

impl TokenManager {
    pub fn new(auth_manager: AuthManager, store: TokenStore) -> Self {
        Self {
            auth_manager,
            store,
            tokens: RwLock::new(None),
            present: AtomicBool::new(false),
        }
    }

    pub fn auth_manager(&self) -> &AuthManager {
        &self.auth_manager
    }

    /// Whether tokens are held. Synchronous.
    pub fn has_tokens(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Load persisted tokens, if any.
    pub async fn restore(&self) -> Result<()> {
        if let Some(tokens) = self.store.load().await? {
            info!("Restored Google Drive credentials");
            *self.tokens.write().await = Some(tokens);
            self.present.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Replace tokens and persist them.
    pub async fn set_tokens(&self, tokens: Tokens) -> Result<()> {
        self.store.save(&tokens).await?;
        *self.tokens.write().await = Some(tokens);
        self.present.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Forget tokens, returning the ones held.
    pub async fn clear(&self) -> Result<Option<Tokens>> {
        let previous = self.tokens.write().await.take();
        self.present.store(false, Ordering::SeqCst);
        self.store.clear().await?;
        Ok(previous)
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - `AuthRequired` if no tokens are held or they cannot be refreshed
    pub async fn get_access_token(&self) -> Result<String> {
        {
            let tokens = self.tokens.read().await;
            match tokens.as_ref() {
                None => return Err(Error::AuthRequired),
                Some(t) if !t.is_expired() => return Ok(t.access_token.clone()),
                Some(_) => {}
            }
        }

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        let refresh = match tokens.as_ref() {
            None => return Err(Error::AuthRequired),
            Some(t) if !t.is_expired() => return Ok(t.access_token.clone()),
            Some(t) => t.refresh_token.clone().ok_or(Error::AuthRequired)?,
        };

        info!("Refreshing expired access token");
        let new_tokens = match self.auth_manager.refresh_token(&refresh).await {
            Ok(t) => t,
            Err(Error::AuthFailed(msg)) => {
                warn!("Refresh token rejected: {}", msg);
                *tokens = None;
                self.present.store(false, Ordering::SeqCst);
                return Err(Error::AuthRequired);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.store.save(&new_tokens).await {
            warn!("Failed to persist refreshed tokens: {}", e);
        }
        let access = new_tokens.access_token.clone();
        *tokens = Some(new_tokens);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config() -> AuthConfig {
        AuthConfig {
            client_id: "test_id".to_string(),
            client_secret: Some("test_secret".to_string()),
            redirect_url: DEFAULT_REDIRECT_URL.to_string(),
        }
    }

    fn valid_tokens() -> Tokens {
        Tokens {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    #[test]
    fn test_tokens_expiration() {
        let mut tokens = valid_tokens();
        assert!(!tokens.is_expired());

        tokens.expires_at = Utc::now() - Duration::hours(1);
        assert!(tokens.is_expired());

        // Token expiring in 4 minutes should be considered expired (5 min buffer)
        tokens.expires_at = Utc::now() + Duration::minutes(4);
        assert!(tokens.is_expired());
    }

    #[test]
    fn test_missing_client_id_fails_init() {
        let result = AuthManager::new(AuthConfig::default());
        assert!(matches!(result, Err(Error::ProviderInit(_))));
    }

    #[test]
    fn test_authorization_url_generation() {
        let manager = AuthManager::new(test_config()).unwrap();
        let pending = manager.begin_authorization();

        assert!(pending.url.contains("accounts.google.com"));
        assert!(pending.url.contains("client_id=test_id"));
        assert!(pending.url.contains("drive.appdata"));
        assert!(pending.url.contains("code_challenge="));
        assert!(pending.url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn test_state_mismatch_rejected() {
        let manager = AuthManager::new(test_config()).unwrap();
        let pending = manager.begin_authorization();

        let result = manager
            .finish_authorization(
                pending,
                AuthorizationResponse {
                    code: "code".to_string(),
                    state: "forged".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_token_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TokenStore::new(Some(dir.path().join("nested").join("token.json")));

        assert!(store.load().await.unwrap().is_none());
        store.save(&valid_tokens()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_token_manager_lifecycle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        let manager = TokenManager::new(
            AuthManager::new(test_config()).unwrap(),
            TokenStore::new(Some(path.clone())),
        );

        assert!(!manager.has_tokens());
        assert!(matches!(
            manager.get_access_token().await,
            Err(Error::AuthRequired)
        ));

        manager.set_tokens(valid_tokens()).await.unwrap();
        assert!(manager.has_tokens());
        assert_eq!(manager.get_access_token().await.unwrap(), "access");

        let restored = TokenManager::new(
            AuthManager::new(test_config()).unwrap(),
            TokenStore::new(Some(path)),
        );
        restored.restore().await.unwrap();
        assert!(restored.has_tokens());

        restored.clear().await.unwrap();
        assert!(!restored.has_tokens());
    }

    #[tokio::test]
    async fn test_expired_without_refresh_requires_auth() {
        let manager = TokenManager::new(
            AuthManager::new(test_config()).unwrap(),
            TokenStore::ephemeral(),
        );
        manager
            .set_tokens(Tokens {
                access_token: "stale".to_string(),
                refresh_token: None,
                expires_at: Utc::now() - Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(matches!(
            manager.get_access_token().await,
            Err(Error::AuthRequired)
        ));
    }
}
