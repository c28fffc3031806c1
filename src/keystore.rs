//! C2 — KeyStore: per-security-level wrapped keys, unlock, and rewrap.
//!
//! An Agile Keychain vault holds one `SecurityLevel` per protection tier
//! (`SL3`, `SL5`). Each level stores an iteration count, a 1024-byte wrapped
//! key (salted and framed as a `Salted__` blob), and a validator — the
//! wrapped key re-encrypted with itself via the OpenSSL KDF, which lets
//! `unlock` confirm the password without a separate MAC. The unwrapped key
//! only ever lives in memory.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::codec;
use crate::error::{VaultError, VaultResult};

/// Floor on PBKDF2 iteration counts. A vault claiming fewer is malformed —
/// real Agile Keychain vaults always use four digits or more.
pub const MIN_ITERATIONS: u32 = 1000;

/// Default iteration count used by `VaultStore::create` for new vaults.
pub const DEFAULT_ITERATIONS: u32 = 17_000;

/// Number of random bytes making up a level's wrapped key material.
pub const WRAPPED_KEY_LEN: usize = 1024;

/// Identifies which protection tier a security level is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityLevelId {
    #[serde(rename = "SL3")]
    Sl3,
    #[serde(rename = "SL5")]
    Sl5,
}

impl SecurityLevelId {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLevelId::Sl3 => "SL3",
            SecurityLevelId::Sl5 => "SL5",
        }
    }
}

/// The on-disk representation of one security level, as stored in the
/// `list` array of `encryptionKeys.js`. Base64 fields hold raw bytes.
///
/// There is no separate salt field: the PBKDF2 salt is the 8 bytes framed
/// into the `data` blob itself (`Salted__` || salt || ciphertext, per
/// §4.1), the same way every other `Salted__` blob in this format carries
/// its own salt. A record with a standalone salt slot would not match a
/// real vault's `encryptionKeys.js` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityLevelRecord {
    pub level: SecurityLevelId,
    /// Opaque hex identifier distinguishing this level instance; referenced
    /// by the top-level `SL3`/`SL5` keys in `encryptionKeys.js`.
    pub identifier: String,
    pub iterations: u32,
    /// Base64 `Salted__` blob of the 1024 bytes of wrapped key material.
    pub data: String,
    /// Base64 `Salted__` blob of the validator (the wrapped key
    /// re-encrypted with itself through the OpenSSL KDF).
    pub validation: String,
}

/// The full contents of `encryptionKeys.js`: every level record plus the
/// `SL3`/`SL5` identifier pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionKeys {
    pub list: Vec<SecurityLevelRecord>,
    #[serde(rename = "SL3", skip_serializing_if = "Option::is_none")]
    pub sl3: Option<String>,
    #[serde(rename = "SL5", skip_serializing_if = "Option::is_none")]
    pub sl5: Option<String>,
}

impl EncryptionKeys {
    pub fn record_for(&self, level: SecurityLevelId) -> VaultResult<&SecurityLevelRecord> {
        let identifier = match level {
            SecurityLevelId::Sl3 => self.sl3.as_deref(),
            SecurityLevelId::Sl5 => self.sl5.as_deref(),
        }
        .ok_or_else(|| VaultError::NotFound(format!("security level {}", level.as_str())))?;

        self.list
            .iter()
            .find(|r| r.identifier == identifier)
            .ok_or_else(|| {
                VaultError::CorruptVault(format!(
                    "encryptionKeys.js references missing identifier {identifier}"
                ))
            })
    }

    pub fn replace_record(&mut self, updated: SecurityLevelRecord) {
        if let Some(existing) = self
            .list
            .iter_mut()
            .find(|r| r.identifier == updated.identifier)
        {
            *existing = updated;
        } else {
            self.list.push(updated);
        }
    }
}

/// An unwrapped, in-memory security level. `key` is zeroized on drop.
pub struct UnlockedLevel {
    pub level: SecurityLevelId,
    pub key: Zeroizing<[u8; WRAPPED_KEY_LEN]>,
}

fn random_identifier() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    hex::encode(bytes)
}

/// Generates a fresh security level's wrapped-key record for `password`.
///
/// The wrapped key is 1024 bytes of random key material, encrypted under the
/// password-derived key/IV via the master PBKDF2 derivation, then framed as a
/// `Salted__` blob. The validator re-encrypts the *unwrapped* key material
/// with itself (as key material to the OpenSSL KDF, with a fresh salt) so a
/// future `unlock` can verify the password without ever storing a MAC.
pub fn create_level(
    level: SecurityLevelId,
    password: &str,
    iterations: u32,
) -> VaultResult<SecurityLevelRecord> {
    if iterations < MIN_ITERATIONS {
        return Err(VaultError::CorruptVault(format!(
            "iteration count {iterations} below floor of {MIN_ITERATIONS}"
        )));
    }

    let mut key_material = [0u8; WRAPPED_KEY_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key_material);

    let salt = codec::random_salt();
    let (key, iv) = codec::derive_key(password, &salt, iterations);
    let wrapped = codec::aes_cbc_encrypt(&key, &iv, &key_material);
    let data = codec::frame_and_encode(&salt, &wrapped);

    let validator_salt = codec::random_salt();
    let (vkey, viv) = codec::openssl_kdf(&key_material, &validator_salt);
    let validated = codec::aes_cbc_encrypt(&vkey, &viv, &key_material);
    let validation = codec::frame_and_encode(&validator_salt, &validated);

    Ok(SecurityLevelRecord {
        level,
        identifier: random_identifier(),
        iterations,
        data,
        validation,
    })
}

/// Unwraps a security level's key given the master password, verifying the
/// validator matches. Returns `DecryptError` on a wrong password or a
/// validator mismatch.
pub fn unlock(record: &SecurityLevelRecord, password: &str) -> VaultResult<UnlockedLevel> {
    if record.iterations < MIN_ITERATIONS {
        return Err(VaultError::CorruptVault(format!(
            "iteration count {} below floor of {MIN_ITERATIONS}",
            record.iterations
        )));
    }

    let (salt, wrapped) = codec::decode_and_unframe(&record.data)?;
    let (key, iv) = codec::derive_key(password, &salt, record.iterations);
    let unwrapped = codec::aes_cbc_decrypt(&key, &iv, &wrapped)?;

    if unwrapped.len() != WRAPPED_KEY_LEN {
        return Err(VaultError::CorruptVault(format!(
            "unwrapped key material was {} bytes, expected {WRAPPED_KEY_LEN}",
            unwrapped.len()
        )));
    }
    let mut key_material = [0u8; WRAPPED_KEY_LEN];
    key_material.copy_from_slice(&unwrapped);

    let (validator_salt, validated) = codec::decode_and_unframe(&record.validation)?;
    let (vkey, viv) = codec::openssl_kdf(&key_material, &validator_salt);
    let recovered = codec::aes_cbc_decrypt(&vkey, &viv, &validated)?;
    if recovered != key_material {
        return Err(VaultError::DecryptError(
            "validator mismatch: wrong master password".into(),
        ));
    }

    Ok(UnlockedLevel {
        level: record.level,
        key: Zeroizing::new(key_material),
    })
}

/// Re-wraps an already-unwrapped level under a new password, keeping the
/// same key material and identifier (so item ciphertext encrypted under this
/// level does not need to change). Used by `set_master_password`.
pub fn rewrap(
    level: &UnlockedLevel,
    identifier: &str,
    new_password: &str,
    iterations: u32,
) -> VaultResult<SecurityLevelRecord> {
    if iterations < MIN_ITERATIONS {
        return Err(VaultError::CorruptVault(format!(
            "iteration count {iterations} below floor of {MIN_ITERATIONS}"
        )));
    }

    let salt = codec::random_salt();
    let (key, iv) = codec::derive_key(new_password, &salt, iterations);
    let wrapped = codec::aes_cbc_encrypt(&key, &iv, level.key.as_ref());
    let data = codec::frame_and_encode(&salt, &wrapped);

    let validator_salt = codec::random_salt();
    let (vkey, viv) = codec::openssl_kdf(level.key.as_ref(), &validator_salt);
    let validated = codec::aes_cbc_encrypt(&vkey, &viv, level.key.as_ref());
    let validation = codec::frame_and_encode(&validator_salt, &validated);

    Ok(SecurityLevelRecord {
        level: level.level,
        identifier: identifier.to_string(),
        iterations,
        data,
        validation,
    })
}

/// Whatever can perform item encryption/decryption for a given security
/// level: a local, in-process keystore, or a client stub that forwards the
/// request to the agent's `encrypt`/`decrypt` ops. `VaultApi` is generic
/// over this so the same code path works with or without the agent daemon
/// running, and so unwrapped key material never needs to cross a process
/// boundary — only ciphertext and plaintext payloads do.
pub trait CryptoProvider {
    fn encrypt(&self, level: SecurityLevelId, plaintext: &[u8]) -> VaultResult<String>;
    fn decrypt(&self, level: SecurityLevelId, blob: &str) -> VaultResult<Vec<u8>>;
}

/// All security levels of a single vault, unwrapped in-process. This is
/// what a direct (non-agent) caller uses, and it is also what the agent
/// daemon itself holds per open vault.
pub struct LocalKeyStore {
    levels: std::collections::HashMap<SecurityLevelId, UnlockedLevel>,
}

impl LocalKeyStore {
    /// Unlocks every level in `keys` with `password`. Fails with
    /// `DecryptError` as soon as any level's validator does not match —
    /// partial unlock is not a supported state.
    pub fn unlock(keys: &EncryptionKeys, password: &str) -> VaultResult<Self> {
        let mut levels = std::collections::HashMap::new();
        for record in &keys.list {
            let unlocked = unlock(record, password)?;
            levels.insert(unlocked.level, unlocked);
        }
        Ok(LocalKeyStore { levels })
    }

    pub fn is_locked(&self) -> bool {
        self.levels.is_empty()
    }

    /// Zeroes and drops every unwrapped level, returning to the `Locked`
    /// state.
    pub fn lock(&mut self) {
        self.levels.clear();
    }

    /// Returns the unwrapped key for `level`, or `Locked` if not unlocked.
    /// Internal to the keystore/agent — never handed to a remote caller;
    /// `CryptoProvider` is the boundary a `VaultApi` actually depends on.
    pub fn level_key(&self, level: SecurityLevelId) -> VaultResult<&[u8; WRAPPED_KEY_LEN]> {
        self.levels
            .get(&level)
            .map(|l| l.key.as_ref())
            .ok_or(VaultError::Locked)
    }

    /// Re-wraps every held level under `new_password`, using `keys` to
    /// recover each level's stable identifier. Does not mutate `self` — the
    /// caller persists the result and may choose to keep the old session.
    pub fn rewrap_all(
        &self,
        keys: &EncryptionKeys,
        new_password: &str,
        iterations: u32,
    ) -> VaultResult<EncryptionKeys> {
        let mut updated = keys.clone();
        for record in &keys.list {
            let level = self
                .levels
                .get(&record.level)
                .ok_or(VaultError::Locked)?;
            let rewrapped = rewrap(level, &record.identifier, new_password, iterations)?;
            updated.replace_record(rewrapped);
        }
        Ok(updated)
    }
}

impl CryptoProvider for LocalKeyStore {
    fn encrypt(&self, level: SecurityLevelId, plaintext: &[u8]) -> VaultResult<String> {
        let key = self.level_key(level)?;
        Ok(crate::item_crypto::encrypt_payload(key, plaintext))
    }

    fn decrypt(&self, level: SecurityLevelId, blob: &str) -> VaultResult<Vec<u8>> {
        let key = self.level_key(level)?;
        crate::item_crypto::decrypt_payload(key, blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_unlock_round_trip() {
        let record = create_level(SecurityLevelId::Sl5, "correct horse", 1000).unwrap();
        let unlocked = unlock(&record, "correct horse").unwrap();
        assert_eq!(unlocked.level, SecurityLevelId::Sl5);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let record = create_level(SecurityLevelId::Sl5, "correct horse", 1000).unwrap();
        let err = unlock(&record, "wrong password").unwrap_err();
        assert!(matches!(
            err,
            VaultError::DecryptError(_) | VaultError::CorruptVault(_)
        ));
    }

    #[test]
    fn rejects_iteration_floor() {
        let err = create_level(SecurityLevelId::Sl5, "pw", 10).unwrap_err();
        assert!(matches!(err, VaultError::CorruptVault(_)));
    }

    #[test]
    fn rewrap_preserves_key_material() {
        let record = create_level(SecurityLevelId::Sl5, "old-pw", 1000).unwrap();
        let unlocked = unlock(&record, "old-pw").unwrap();
        let rewrapped = rewrap(&unlocked, &record.identifier, "new-pw", 1000).unwrap();
        let unlocked2 = unlock(&rewrapped, "new-pw").unwrap();
        assert_eq!(unlocked.key.as_ref(), unlocked2.key.as_ref());
    }
}
