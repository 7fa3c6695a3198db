//! Google Drive snapshot store.
//!
//! - OAuth2 (authorization code + PKCE) with automatic token refresh
//! - Resumable uploads with per-chunk progress
//! - Snapshots live in the hidden `appDataFolder`

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{
    AuthConfig, AuthManager, AuthorizationHandler, AuthorizationResponse, TokenManager,
    TokenStore, Tokens,
};
pub use client::DriveClient;
pub use provider::{create_gdrive_provider, GDriveConfig, GDriveProvider};
