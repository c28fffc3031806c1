//! C3 — ItemCrypto: encrypts and decrypts a single item's payload under a
//! level key, per §4.3. Distinct from the keystore's own wrapping: item
//! payloads use the level key directly as OpenSSL-KDF key material, never
//! PBKDF2 (PBKDF2 is reserved for deriving a key from the master password).

use crate::codec;
use crate::error::VaultResult;

/// Encrypts `plaintext` under `level_key`, producing a base64
/// `Salted__`-framed blob suitable for an item's `encrypted` field.
pub fn encrypt_payload(level_key: &[u8], plaintext: &[u8]) -> String {
    let salt = codec::random_salt();
    let (key, iv) = codec::openssl_kdf(level_key, &salt);
    let ciphertext = codec::aes_cbc_encrypt(&key, &iv, plaintext);
    codec::frame_and_encode(&salt, &ciphertext)
}

/// Decrypts a blob previously produced by `encrypt_payload`. Padding
/// failures and malformed framing surface as `VaultError::DecryptError` /
/// `VaultError::CorruptVault` respectively.
pub fn decrypt_payload(level_key: &[u8], blob: &str) -> VaultResult<Vec<u8>> {
    let (salt, ciphertext) = codec::decode_and_unframe(blob)?;
    let (key, iv) = codec::openssl_kdf(level_key, &salt);
    codec::aes_cbc_decrypt(&key, &iv, &ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let level_key = [3u8; 1024];
        let plaintext = br#"{"notes":"hello vault"}"#;
        let blob = encrypt_payload(&level_key, plaintext);
        let recovered = decrypt_payload(&level_key, &blob).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let level_key = [3u8; 1024];
        let other_key = [9u8; 1024];
        let blob = encrypt_payload(&level_key, b"secret");
        let err = decrypt_payload(&other_key, &blob);
        assert!(err.is_err());
    }
}
