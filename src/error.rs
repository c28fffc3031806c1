//! Typed errors shared by every vault component.
//!
//! Mirrors §7 of the vault specification: crypto and parse failures are never
//! swallowed — they propagate as one of these variants so a caller (CLI or
//! agent) can map them to a short message and an exit/reply code.

use thiserror::Error;

/// Errors surfaced by the codec, keystore, vault store, and vault API.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Shape or magic mismatch on read (bad JSON, wrong `Salted__` prefix,
    /// truncated ciphertext, iteration count below the floor, ...).
    #[error("corrupt vault: {0}")]
    CorruptVault(String),

    /// An item, field, or security level could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The keystore (or agent session) has no unwrapped key available.
    #[error("vault is locked")]
    Locked,

    /// Wrong password, bad validator, or malformed ciphertext.
    #[error("decrypt failed: {0}")]
    DecryptError(String),

    /// A pattern matched more than one item where exactly one was required.
    #[error("ambiguous match: {0} items matched")]
    Ambiguous(usize),

    /// Underlying filesystem or socket failure.
    #[error("io error: {0}")]
    IoError(String),

    /// The advisory write lock is held by another process.
    #[error("vault locked by another process")]
    Conflict,

    /// The item is a tombstone; its content is permanently gone and cannot
    /// be restored. Not one of the literal §7 kinds — added because §8
    /// scenario 3 requires `restore` on a tombstoned item to error, and none
    /// of the named kinds describe "permanently, intentionally unrecoverable".
    #[error("item is a tombstone and cannot be restored")]
    Tombstoned,
}

pub type VaultResult<T> = Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::CorruptVault(e.to_string())
    }
}
