//! Key derivation using PBKDF2-HMAC-SHA256.

use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use crate::keys::{Salt, SnapshotKey, KEY_LENGTH};
use notesync_common::{Error, Result};

/// Iteration count used for snapshot keys.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Parameters used on the wire. Every device must agree on these.
    pub fn standard() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Cheap parameters for tests. Never use for real snapshots.
    pub fn insecure_fast() -> Self {
        Self { iterations: 1 }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::standard()
    }
}

/// Derive a snapshot key from a passphrase and salt.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params.iterations` must be non-zero
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if passphrase is empty or iterations is zero
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<SnapshotKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }

    let iterations = NonZeroU32::new(params.iterations)
        .ok_or_else(|| Error::Crypto("KDF iterations must be non-zero".to_string()))?;

    let mut key_bytes = [0u8; KEY_LENGTH];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt.as_bytes(),
        passphrase,
        &mut key_bytes,
    );

    let key = SnapshotKey::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}
