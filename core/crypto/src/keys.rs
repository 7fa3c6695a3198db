//! Key types with secure memory handling.
//!
//! Key material zeroizes its memory on drop so derived snapshot keys do not
//! linger after an upload or download completes.

use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use notesync_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the PBKDF2 salt in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of the AES-GCM initialization vector in bytes.
pub const IV_LENGTH: usize = 12;

/// AES-256 key derived from a snapshot passphrase.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SnapshotKey {
    key: [u8; KEY_LENGTH],
}

impl SnapshotKey {
    /// Create a snapshot key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapshotKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Result<Self> {
        Ok(Self(random_bytes()?))
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Initialization vector for one AES-GCM seal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; IV_LENGTH]);

impl Iv {
    /// Generate a random IV. A fresh one is drawn for every encryption.
    pub fn generate() -> Result<Self> {
        Ok(Self(random_bytes()?))
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; IV_LENGTH] {
        &self.0
    }
}

fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| Error::Crypto("System random source unavailable".to_string()))?;
    Ok(buf)
}
