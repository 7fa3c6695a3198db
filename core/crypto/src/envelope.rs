//! Passphrase envelope for snapshot bytes.
//!
//! Wire format: `salt(16) || iv(12) || ciphertext || tag(16)`.
//! The salt is fresh per envelope, so every upload derives a new key.

use crate::aead::{self, TAG_SIZE};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{Iv, Salt, IV_LENGTH, SALT_LENGTH};
use notesync_common::{Error, Passphrase, Result};

/// Size of the envelope header preceding the ciphertext.
pub const HEADER_SIZE: usize = SALT_LENGTH + IV_LENGTH;

/// Smallest possible envelope (empty plaintext).
pub const MIN_ENVELOPE_SIZE: usize = HEADER_SIZE + TAG_SIZE;

/// Encrypt `plaintext` under `passphrase` with the standard KDF parameters.
pub fn seal(plaintext: &[u8], passphrase: &Passphrase) -> Result<Vec<u8>> {
    seal_with_params(plaintext, passphrase, &KdfParams::standard())
}

/// Decrypt an envelope produced by [`seal`].
///
/// # Errors
/// - `DecryptionFailed` for a wrong passphrase, truncated or tampered input
pub fn open(envelope: &[u8], passphrase: &Passphrase) -> Result<Vec<u8>> {
    open_with_params(envelope, passphrase, &KdfParams::standard())
}

/// [`seal`] with explicit KDF parameters.
pub fn seal_with_params(
    plaintext: &[u8],
    passphrase: &Passphrase,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    let salt = Salt::generate()?;
    let iv = Iv::generate()?;
    let key = derive_key(passphrase.as_bytes(), &salt, params)?;

    let ciphertext = aead::encrypt(&key, &iv, plaintext)?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(salt.as_bytes());
    out.extend_from_slice(iv.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// [`open`] with explicit KDF parameters.
pub fn open_with_params(
    envelope: &[u8],
    passphrase: &Passphrase,
    params: &KdfParams,
) -> Result<Vec<u8>> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let (salt_bytes, rest) = envelope.split_at(SALT_LENGTH);
    let (iv_bytes, ciphertext) = rest.split_at(IV_LENGTH);

    let mut salt = [0u8; SALT_LENGTH];
    salt.copy_from_slice(salt_bytes);
    let mut iv = [0u8; IV_LENGTH];
    iv.copy_from_slice(iv_bytes);

    let key = derive_key(passphrase.as_bytes(), &Salt::from_bytes(salt), params)?;
    aead::decrypt(&key, &Iv::from_bytes(iv), ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pass(s: &str) -> Passphrase {
        Passphrase::new(s).unwrap()
    }

    #[test]
    fn test_roundtrip_standard_params() {
        let sealed = seal(b"snapshot bytes", &pass("open sesame")).unwrap();
        assert_eq!(open(&sealed, &pass("open sesame")).unwrap(), b"snapshot bytes");
    }

    #[test]
    fn test_layout() {
        let sealed = seal_with_params(b"abc", &pass("p"), &KdfParams::insecure_fast()).unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE + 3 + TAG_SIZE);
    }

    #[test]
    fn test_wrong_passphrase() {
        let params = KdfParams::insecure_fast();
        let sealed = seal_with_params(b"data", &pass("right"), &params).unwrap();

        assert!(matches!(
            open_with_params(&sealed, &pass("wrong"), &params),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_envelope() {
        assert!(matches!(
            open(&[0u8; MIN_ENVELOPE_SIZE - 1], &pass("p")),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_same_plaintext_differs_each_time() {
        let params = KdfParams::insecure_fast();
        let a = seal_with_params(b"same", &pass("p"), &params).unwrap();
        let b = seal_with_params(b"same", &pass("p"), &params).unwrap();
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_open_inverts_seal(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let params = KdfParams::insecure_fast();
            let sealed = seal_with_params(&data, &pass("prop"), &params).unwrap();
            prop_assert_eq!(open_with_params(&sealed, &pass("prop"), &params).unwrap(), data);
        }
    }
}
