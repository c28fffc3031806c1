//! Core cryptosystem, persistence, and unlock-agent for an Agile Keychain
//! format password vault.
//!
//! This crate implements the pieces that are hard to get right and must
//! behave identically for every caller:
//!
//! - [`codec`] — base64, PBKDF2-HMAC-SHA1, OpenSSL `EVP_BytesToKey`, AES-128-CBC
//! - [`keystore`] — per-security-level wrapped keys, unlock, rewrap
//! - [`item_crypto`] — per-item payload encryption/decryption
//! - [`model`] — the `Item`/`IndexEntry`/`ItemContent` data model
//! - [`vault_store`] — on-disk layout, the `contents.js` index, atomic writes
//! - [`vault_api`] — list/load/lookup/add/update/remove/trash/restore/rewrap
//! - [`agent`] — the local unlock daemon and its client stub
//!
//! Everything else — interactive command dispatch, argument parsing,
//! terminal prompts, the clipboard backend, templated item-creation
//! prompts, config file persistence, and JSON import/export — is an
//! external collaborator that drives this crate through [`vault_api::VaultApi`]
//! and [`agent::client::AgentClient`]. It is not reproduced here.
//!
//! # Architecture
//!
//! ```text
//! CLI / external collaborator
//!     │
//!     ▼
//! vault_api::VaultApi<K>  ─── list/load/add/save/remove/trash/restore
//!     │                  \
//!     │                   `── K: keystore::CryptoProvider
//!     ▼                        ├── keystore::LocalKeyStore   (in-process)
//! vault_store::VaultStore      └── agent::client::AgentClient (daemon-backed)
//!     │                              │
//!     ▼                              ▼
//! Disk (contents.js, *.1password)   agent::server::Agent (holds unwrapped keys)
//! ```

pub mod agent;
pub mod codec;
pub mod error;
pub mod item_crypto;
pub mod keystore;
pub mod model;
pub mod vault_api;
pub mod vault_store;

pub use error::{VaultError, VaultResult};
