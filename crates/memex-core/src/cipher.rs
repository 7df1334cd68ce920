//! # Cipher
//!
//! Deterministic, scope-keyed symmetric encryption of values, plus the
//! BLAKE3 digest used for content hashes and secret chaining.
//!
//! # Algorithms
//!
//! - **Key**: BLAKE3 `derive_key` over `(secret, path)`. The same plaintext
//!   under the same secret at two paths yields unrelated ciphertext.
//! - **Nonce**: synthetic, the first 12 bytes of a BLAKE3 keyed hash of the
//!   plaintext. Equal inputs give equal blobs, so snapshots re-export
//!   byte-for-byte; distinct plaintexts never share a nonce under one key.
//! - **Encryption**: ChaCha20-Poly1305. A wrong key fails authentication and
//!   decrypts to `None` instead of garbage.
//!
//! Blob layout: `base64(nonce || ciphertext || tag)` inside `Value::Ciphertext`.

use crate::{MemexError, SemanticPath, Value};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

const KEY_CONTEXT: &str = "memex 2024-05 scope cipher v1";

// =============================================================================
// DIGESTS
// =============================================================================

/// BLAKE3 hex digest of a string.
#[must_use]
pub fn digest_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

// =============================================================================
// ENCRYPTION
// =============================================================================

fn scope_key(secret: &str, path: &SemanticPath) -> [u8; 32] {
    let path_key = path.key();
    let mut material = Vec::with_capacity(secret.len() + path_key.len() + 1);
    material.extend_from_slice(secret.as_bytes());
    material.push(0);
    material.extend_from_slice(path_key.as_bytes());
    blake3::derive_key(KEY_CONTEXT, &material)
}

/// Encrypt a value under `(secret, path)`.
///
/// Deterministic: the same inputs always produce the same blob.
pub fn encrypt(value: &Value, secret: &str, path: &SemanticPath) -> Result<Value, MemexError> {
    let plaintext =
        postcard::to_allocvec(value).map_err(|e| MemexError::SerializationError(e.to_string()))?;

    let key = scope_key(secret, path);
    let synthetic = blake3::keyed_hash(&key, &plaintext);
    let nonce = &synthetic.as_bytes()[..NONCE_LEN];

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let sealed = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext.as_slice())
        .map_err(|e| MemexError::SerializationError(format!("Encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(nonce);
    blob.extend_from_slice(&sealed);
    Ok(Value::Ciphertext(STANDARD.encode(blob)))
}

/// Decrypt a blob under `(secret, path)`.
///
/// Returns `None` for non-blobs, malformed blobs and authentication failures.
pub fn decrypt(blob: &Value, secret: &str, path: &SemanticPath) -> Option<Value> {
    let bytes = blob_bytes(blob)?;
    let (nonce, sealed) = bytes.split_at(NONCE_LEN);

    let key = scope_key(secret, path);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let Ok(plaintext) = cipher.decrypt(Nonce::from_slice(nonce), sealed) else {
        tracing::warn!(path = %path, "cipher blob failed authentication");
        return None;
    };
    postcard::from_bytes(&plaintext).ok()
}

/// True when `value` has the shape of a cipher blob.
#[must_use]
pub fn is_encrypted_blob(value: &Value) -> bool {
    blob_bytes(value).is_some()
}

fn blob_bytes(value: &Value) -> Option<Vec<u8>> {
    let Value::Ciphertext(text) = value else {
        return None;
    };
    let bytes = STANDARD.decode(text).ok()?;
    (bytes.len() >= NONCE_LEN + AUTH_TAG_LEN).then_some(bytes)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> Value {
        let mut map = BTreeMap::new();
        map.insert("fuel_price".to_string(), Value::Number(24.5));
        Value::Object(map)
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let path = SemanticPath::canonical("finance");
        let blob = encrypt(&sample(), "s3cret", &path).expect("encrypt");
        assert!(is_encrypted_blob(&blob));
        assert_eq!(decrypt(&blob, "s3cret", &path), Some(sample()));
    }

    #[test]
    fn encryption_is_deterministic() {
        let path = SemanticPath::canonical("a.b");
        let first = encrypt(&sample(), "k", &path).expect("encrypt");
        let second = encrypt(&sample(), "k", &path).expect("encrypt");
        assert_eq!(first, second);
    }

    #[test]
    fn path_changes_ciphertext() {
        let a = encrypt(&sample(), "k", &SemanticPath::canonical("a")).expect("encrypt");
        let b = encrypt(&sample(), "k", &SemanticPath::canonical("b")).expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_or_path_is_rejected() {
        let path = SemanticPath::canonical("wallet");
        let blob = encrypt(&sample(), "right", &path).expect("encrypt");
        assert_eq!(decrypt(&blob, "wrong", &path), None);
        assert_eq!(
            decrypt(&blob, "right", &SemanticPath::canonical("other")),
            None
        );
    }

    #[test]
    fn plain_data_is_not_a_blob() {
        assert!(!is_encrypted_blob(&Value::text("aGVsbG8=")));
        assert!(!is_encrypted_blob(&Value::Ciphertext("not base64!".into())));
        assert!(!is_encrypted_blob(&Value::Ciphertext("aGk=".into())));
    }

    #[test]
    fn digest_is_hex_blake3() {
        let digest = digest_hex("root::secret");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, digest_hex("root::secret"));
    }
}
