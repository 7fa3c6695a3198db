//! Cryptographic primitives for NoteSync.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using AES-256-GCM
//! - The passphrase envelope wrapped around uploaded snapshots
//!
//! # Security Guarantees
//! - Derived key material is zeroized on drop
//! - No plaintext, passphrase or key material is ever logged

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use envelope::{open, seal};
pub use kdf::{derive_key, KdfParams};
pub use keys::{Iv, Salt, SnapshotKey};
