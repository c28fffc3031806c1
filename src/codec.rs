//! Cryptographic primitives shared by the keystore and item-crypto layers.
//!
//! Everything here is deliberately compatible with the legacy OpenSSL
//! `enc`/`EVP_BytesToKey` conventions the Agile Keychain format is built on:
//! PBKDF2-HMAC-SHA1 for the master-password derivation, an MD5-based
//! `EVP_BytesToKey` expansion for item payloads and wrapped keys, and
//! AES-128-CBC with PKCS#7 padding for the cipher itself. Every on-disk blob
//! is `base64("Salted__" || salt(8) || ciphertext)`.

use crate::error::{VaultError, VaultResult};
use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::Hmac;
use md5::{Digest as Md5Digest, Md5};
use rand::RngCore;
use sha1::Sha1;

const SALTED_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Derives `out_len` bytes from `password`/`salt` using PBKDF2-HMAC-SHA1.
///
/// The caller splits the output into a key and an IV (the Agile Keychain
/// master-password derivation produces a 32-byte block: 16 bytes of key
/// followed by 16 bytes of IV).
pub fn pbkdf2_hmac_sha1(password: &[u8], salt: &[u8], iterations: u32, out_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_len];
    pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iterations, &mut out)
        .expect("pbkdf2 output length is always valid for HMAC-SHA1");
    out
}

/// Derives a master key/IV pair from the user's password.
///
/// Returns `(key, iv)`, each 16 bytes, per §4.1.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> ([u8; 16], [u8; 16]) {
    let derived = pbkdf2_hmac_sha1(password.as_bytes(), salt, iterations, 32);
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&derived[..16]);
    iv.copy_from_slice(&derived[16..]);
    (key, iv)
}

/// OpenSSL `EVP_BytesToKey`-compatible expansion: MD5, a single iteration,
/// producing a 16-byte key and a 16-byte IV from arbitrary key material and
/// an 8-byte salt. Used for item payloads and for wrapped-key ciphertext.
pub fn openssl_kdf(key_material: &[u8], salt: &[u8; SALT_LEN]) -> ([u8; 16], [u8; 16]) {
    let mut d = Vec::new();
    let mut prev: Vec<u8> = Vec::new();
    while d.len() < 32 {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(key_material);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        d.extend_from_slice(&prev);
    }
    let mut key = [0u8; 16];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&d[..16]);
    iv.copy_from_slice(&d[16..32]);
    (key, iv)
}

/// AES-128-CBC encrypt with PKCS#7 padding.
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-128-CBC decrypt with PKCS#7 padding. A padding failure (wrong key or
/// truncated/tampered ciphertext) surfaces as `VaultError::DecryptError`.
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> VaultResult<Vec<u8>> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| VaultError::DecryptError(format!("padding error: {e}")))
}

/// Generates a random 8-byte salt for a `Salted__` blob.
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Wraps ciphertext in the OpenSSL `Salted__` framing and base64-encodes it.
pub fn frame_and_encode(salt: &[u8; SALT_LEN], ciphertext: &[u8]) -> String {
    let mut blob = Vec::with_capacity(SALTED_MAGIC.len() + SALT_LEN + ciphertext.len());
    blob.extend_from_slice(SALTED_MAGIC);
    blob.extend_from_slice(salt);
    blob.extend_from_slice(ciphertext);
    base64_encode(&blob)
}

/// Decodes a base64 `Salted__` blob, returning `(salt, ciphertext)`.
///
/// Rejects inputs whose decoded length is under 16 bytes or whose first 8
/// bytes are not the literal `Salted__` magic, per §4.1.
pub fn decode_and_unframe(blob: &str) -> VaultResult<([u8; SALT_LEN], Vec<u8>)> {
    let raw = base64_decode(blob)?;
    if raw.len() < 16 {
        return Err(VaultError::CorruptVault(
            "encrypted blob shorter than 16 bytes".into(),
        ));
    }
    if raw.len() < SALTED_MAGIC.len() + SALT_LEN || &raw[..SALTED_MAGIC.len()] != SALTED_MAGIC {
        return Err(VaultError::CorruptVault(
            "blob is missing the Salted__ prefix".into(),
        ));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&raw[SALTED_MAGIC.len()..SALTED_MAGIC.len() + SALT_LEN]);
    let ciphertext = raw[SALTED_MAGIC.len() + SALT_LEN..].to_vec();
    Ok((salt, ciphertext))
}

pub fn base64_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD.encode(data)
}

pub fn base64_decode(input: &str) -> VaultResult<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    STANDARD
        .decode(input.trim())
        .map_err(|e| VaultError::CorruptVault(format!("invalid base64: {e}")))
}
