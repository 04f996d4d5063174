//! crates/hbd_core/src/crypto.rs
//!
//! The envelope crypto service: one-way lookup hashes for equality search and
//! XChaCha20-Poly1305 authenticated encryption for values that must be
//! recovered later (bot tokens, chat ids, retained secrets).

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Nonce length of XChaCha20-Poly1305 (192 bits).
pub const NONCE_LEN: usize = 24;
/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;
/// Master keys and generated secrets are 256 bits.
pub const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Encryption failed")]
    Encryption,
    /// Wrong key, truncated input, malformed encoding or a failed tag check.
    #[error("Decryption failed")]
    Decryption,
}

//=========================================================================================
// Master Key
//=========================================================================================

/// The process-wide master key. Loaded once at startup and never persisted.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Parses a 64-character hex string into a master key.
    pub fn from_hex(value: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(value.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not valid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derives the HMAC key used to sign session tokens so the raw master key
    /// is never handed to the token library.
    pub fn token_signing_key(&self) -> [u8; KEY_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(b"hbd-session-token-v1");
        hasher.update(self.0);
        hasher.finalize().into()
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

//=========================================================================================
// Hashing and AEAD
//=========================================================================================

/// SHA-256 of `input`, lowercase hex. Used only for equality lookups.
pub fn hash(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}

/// Encrypts `plaintext` under `key` and returns `hex(nonce || ciphertext || tag)`.
pub fn encrypt(key: &MasterKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(hex::encode(combined))
}

/// Reverses [`encrypt`]. Fails closed; there is no partial plaintext on error.
pub fn decrypt(key: &MasterKey, ciphertext_hex: &str) -> Result<Vec<u8>, CryptoError> {
    let combined = hex::decode(ciphertext_hex).map_err(|_| CryptoError::Decryption)?;
    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// [`decrypt`] for values that were UTF-8 text when encrypted.
pub fn decrypt_string(key: &MasterKey, ciphertext_hex: &str) -> Result<String, CryptoError> {
    let plaintext = decrypt(key, ciphertext_hex)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decryption)
}

/// A fresh random 256-bit secret, hex-encoded, for users who want the service
/// to pick their secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encrypt_uses_fresh_nonce_each_call() {
        let key = MasterKey::generate();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let sealed = encrypt(&MasterKey::generate(), b"chat-42").unwrap();
        let result = decrypt(&MasterKey::generate(), &sealed);
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn decrypt_rejects_truncated_and_malformed_input() {
        let key = MasterKey::generate();
        let sealed = encrypt(&key, b"chat-42").unwrap();

        assert!(decrypt(&key, &sealed[..sealed.len() - 2]).is_err());
        assert!(decrypt(&key, &sealed[..(NONCE_LEN * 2)]).is_err());
        assert!(decrypt(&key, "").is_err());
        assert!(decrypt(&key, "not hex at all").is_err());
    }

    #[test]
    fn hash_is_deterministic_and_fixed_length() {
        assert_eq!(hash(b"example@hbd.wtf"), hash(b"example@hbd.wtf"));
        assert_eq!(hash(b"").len(), 64);
        assert_eq!(
            hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn master_key_rejects_wrong_length() {
        assert!(MasterKey::from_hex("abcd").is_err());
        assert!(MasterKey::from_hex(&"zz".repeat(32)).is_err());
        assert!(MasterKey::from_hex(&generate_secret()).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn encrypt_then_decrypt_returns_plaintext(data in prop::collection::vec(any::<u8>(), 0..512)) {
            let key = MasterKey::generate();
            let sealed = encrypt(&key, &data).unwrap();
            prop_assert_eq!(decrypt(&key, &sealed).unwrap(), data);
        }

        #[test]
        fn any_flipped_byte_fails_decryption(
            data in prop::collection::vec(any::<u8>(), 0..128),
            position in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let key = MasterKey::generate();
            let mut bytes = hex::decode(encrypt(&key, &data).unwrap()).unwrap();
            let i = position.index(bytes.len());
            bytes[i] ^= mask;
            prop_assert!(matches!(decrypt(&key, &hex::encode(bytes)), Err(CryptoError::Decryption)));
        }

        #[test]
        fn any_truncation_fails_decryption(
            data in prop::collection::vec(any::<u8>(), 0..128),
            cut in any::<prop::sample::Index>(),
        ) {
            let key = MasterKey::generate();
            let bytes = hex::decode(encrypt(&key, &data).unwrap()).unwrap();
            let keep = cut.index(bytes.len());
            prop_assert!(matches!(decrypt(&key, &hex::encode(&bytes[..keep])), Err(CryptoError::Decryption)));
        }

        #[test]
        fn distinct_inputs_hash_differently(
            a in prop::collection::vec(any::<u8>(), 0..256),
            b in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(hash(&a), hash(&b));
            prop_assert_eq!(hash(&a), hash(&a));
        }
    }
}
