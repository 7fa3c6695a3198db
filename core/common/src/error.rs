//! Common error types for NoteSync.

use thiserror::Error;

/// Top-level error type for NoteSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The device has no connectivity. Raised before any I/O is attempted.
    #[error("Device is offline")]
    Offline,

    /// The remote provider has no usable credentials.
    #[error("Authentication required")]
    AuthRequired,

    /// Signing in (or refreshing a token) failed.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The provider could not be initialized (e.g. missing client credentials).
    #[error("Provider initialization failed: {0}")]
    ProviderInit(String),

    /// Transient network or transport failure. Retried with backoff.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider rejected the request for quota or permission reasons.
    #[error("Provider quota or permission error: {0}")]
    ProviderQuotaOrPermission(String),

    /// A snapshot archive could not be decoded.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// The snapshot is encrypted but no passphrase is configured.
    #[error("A passphrase is required to read this snapshot")]
    PasswordRequired,

    /// Decryption failed (wrong passphrase or tampered data).
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Cryptographic primitive failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Local record storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether an operation failing with this error may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }

    /// Whether this error means the user has to (re-)authenticate.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::AuthRequired | Error::AuthFailed(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("timeout".to_string()).is_retryable());
        assert!(Error::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!Error::ProviderQuotaOrPermission("quota".to_string()).is_retryable());
        assert!(!Error::CorruptArchive("bad".to_string()).is_retryable());
        assert!(!Error::AuthRequired.is_retryable());
    }

    #[test]
    fn test_auth_classification() {
        assert!(Error::AuthRequired.is_auth());
        assert!(Error::AuthFailed("denied".to_string()).is_auth());
        assert!(!Error::Offline.is_auth());
    }
}
