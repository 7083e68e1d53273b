//! Field-level encryption for `secret`-typed attributes (spec §4.2 item 3).
//!
//! Each secret field is encrypted independently with AES-256-GCM using a
//! key derived from the database passphrase via HKDF-SHA256, so that two
//! fields never share a (key, nonce) pair even when both are empty
//! strings encrypted at the same instant.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("no passphrase configured for secret field {field:?}")]
    NoPassphrase { field: String },
    #[error("failed to encrypt field {field:?}")]
    EncryptFailed { field: String },
    #[error("failed to decrypt field {field:?}")]
    DecryptFailed { field: String },
    #[error("malformed ciphertext for field {field:?}")]
    Malformed { field: String },
}

/// Derive a per-field AES-256 key from a database passphrase and salt.
/// Binding the field path into the HKDF `info` means the same plaintext
/// in two different fields never produces the same ciphertext key.
fn derive_key(passphrase: &str, salt: &[u8], field: &str) -> Key<Aes256Gcm> {
    let hk = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
    let mut key_bytes = [0u8; 32];
    hk.expand(field.as_bytes(), &mut key_bytes).expect("32 bytes is a valid HKDF output length");
    *Key::<Aes256Gcm>::from_slice(&key_bytes)
}

/// Encrypt a secret field's plaintext string, returning a base64 blob of
/// `nonce || ciphertext` suitable for storage as a single metadata value.
pub fn encrypt_field(passphrase: &str, salt: &[u8], field: &str, plaintext: &str) -> Result<String, CryptoError> {
    let key = derive_key(passphrase, salt, field);
    let cipher = Aes256Gcm::new(&key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::EncryptFailed { field: field.to_string() })?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(combined))
}

/// Decrypt a blob produced by [`encrypt_field`]. Callers (the codec's
/// `decode`) must catch this per-field and tag the record with
/// `_decryptionFailed` rather than aborting the whole decode (spec §4.2
/// item 6, §7 `DecryptionFailed`).
pub fn decrypt_field(passphrase: &str, salt: &[u8], field: &str, encoded: &str) -> Result<String, CryptoError> {
    let combined = BASE64.decode(encoded).map_err(|_| CryptoError::Malformed { field: field.to_string() })?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::Malformed { field: field.to_string() });
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt, field);
    let cipher = Aes256Gcm::new(&key);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptFailed { field: field.to_string() })?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed { field: field.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips() {
        let encoded = encrypt_field("hunter2", b"salt", "ssn", "123-45-6789").unwrap();
        let decoded = decrypt_field("hunter2", b"salt", "ssn", &encoded).unwrap();
        assert_eq!(decoded, "123-45-6789");
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let encoded = encrypt_field("hunter2", b"salt", "ssn", "123-45-6789").unwrap();
        let result = decrypt_field("wrong", b"salt", "ssn", &encoded);
        assert!(result.is_err());
    }

    #[test]
    fn different_fields_with_same_plaintext_produce_different_ciphertext() {
        let a = encrypt_field("hunter2", b"salt", "ssn", "same").unwrap();
        let b = encrypt_field("hunter2", b"salt", "tax_id", "same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let result = decrypt_field("hunter2", b"salt", "ssn", "not base64!!");
        assert!(matches!(result, Err(CryptoError::Malformed { .. })));
    }
}
