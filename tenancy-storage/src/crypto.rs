//! Field-level encryption for tenant PII.
//!
//! The contact email is sealed with AES-256-GCM under a process-wide key.
//! Each encryption draws a fresh random 12-byte nonce, stored next to the
//! ciphertext.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// AES-GCM tag size in bytes
pub const TAG_SIZE: usize = 16;

/// A 256-bit encryption key, zeroed from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from its base64 encoding.
    ///
    /// # Errors
    ///
    /// Returns an error unless the input decodes to exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Encryption(format!("Encryption key is not valid base64: {}", e)))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(Error::Encryption(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_SIZE, len
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(key))
    }

    /// Generate a random key
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| Error::Encryption("Failed to generate encryption key".to_string()))?;
        Ok(Self(key))
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Ciphertext (with appended tag) and the nonce it was sealed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedField {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// AES-256-GCM cipher for the tenant contact email.
pub struct EmailCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl EmailCipher {
    pub fn new(key: &EncryptionKey) -> Result<Self> {
        let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
            .map_err(|_| Error::Encryption("Invalid AES-256-GCM key".to_string()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt a plaintext field under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<SealedField> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| Error::Encryption("Failed to generate nonce".to_string()))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| Error::Encryption("Failed to encrypt field".to_string()))?;

        Ok(SealedField {
            ciphertext: in_out,
            nonce: nonce.to_vec(),
        })
    }

    /// Decrypt a field sealed by [`EmailCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Fails if the nonce has the wrong length, the ciphertext was tampered
    /// with, the key differs, or the plaintext is not UTF-8.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
            Error::Encryption(format!(
                "Nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce.len()
            ))
        })?;
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Encryption("Ciphertext is too short".to_string()));
        }

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| Error::Encryption("Failed to decrypt field".to_string()))?;

        let result = String::from_utf8(plaintext.to_vec())
            .map_err(|_| Error::Encryption("Decrypted field is not valid UTF-8".to_string()));
        in_out.zeroize();
        result
    }

    /// Decrypt an optional sealed field.
    ///
    /// Empty ciphertext or nonce means no value was stored.
    pub fn decrypt_optional(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<Option<String>> {
        if ciphertext.is_empty() || nonce.is_empty() {
            return Ok(None);
        }
        self.decrypt(ciphertext, nonce).map(Some)
    }
}

impl fmt::Debug for EmailCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailCipher").finish_non_exhaustive()
    }
}
