//! Common utilities and types shared across NoteSync modules.
//!
//! This module provides the error taxonomy and the identifier types used by
//! every other crate in the workspace.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DeviceId, Passphrase, UserId};
