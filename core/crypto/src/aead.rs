//! Authenticated encryption using AES-256-GCM.
//!
//! The 12-byte IV is supplied by the caller and must never repeat for a key.
//! Snapshot keys are derived with a fresh salt per upload, so a random IV per
//! seal is sufficient.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};

use crate::keys::{Iv, SnapshotKey};
use notesync_common::{Error, Result};

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

fn cipher(key: &SnapshotKey) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| Error::Crypto("Invalid AES-256 key".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Postconditions
/// - Returns ciphertext || tag (plaintext length + TAG_SIZE bytes)
///
/// # Errors
/// - Returns error if sealing fails
pub fn encrypt(key: &SnapshotKey, iv: &Iv, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;
    let mut in_out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    in_out.extend_from_slice(plaintext);

    cipher
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(*iv.as_bytes()),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| Error::Crypto("Encryption failed".to_string()))?;

    Ok(in_out)
}

/// Decrypt ciphertext || tag using AES-256-GCM.
///
/// # Errors
/// - `DecryptionFailed` if the input is too short or authentication fails
///   (wrong key or tampered data)
pub fn decrypt(key: &SnapshotKey, iv: &Iv, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let cipher = cipher(key)?;
    let mut in_out = ciphertext.to_vec();

    let plaintext_len = cipher
        .open_in_place(
            Nonce::assume_unique_for_key(*iv.as_bytes()),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| Error::DecryptionFailed)?
        .len();

    in_out.truncate(plaintext_len);
    Ok(in_out)
}
