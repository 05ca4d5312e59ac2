//! Credential encryption at rest.
//!
//! Credentials are stored as `base64(nonce || ciphertext)` under AES-256-GCM
//! with a process-wide key. This crate is the only place plaintext credential
//! material is handled; everything above it sees either the opaque form or
//! the masked display form.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("vault key must be {KEY_SIZE} bytes, got {0}")]
    KeySize(usize),
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext is truncated")]
    Truncated,
    #[error("decryption failed (tampered data or wrong key)")]
    Decrypt,
    #[error("decrypted credential is not utf-8")]
    Utf8,
}

#[derive(Clone)]
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> VaultResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(VaultError::KeySize(key.len()));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(CredentialVault {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Construct from the base64 key form kept in the config file.
    pub fn from_base64_key(encoded: &str) -> VaultResult<Self> {
        let key = BASE64.decode(encoded).map_err(|_| VaultError::Encoding)?;
        CredentialVault::new(&key)
    }

    /// Generate a fresh random key, returned in the base64 form the config
    /// file stores.
    pub fn generate_key() -> String {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        BASE64.encode(key)
    }

    /// Empty input encrypts to the empty string so optional credential
    /// columns stay visibly empty.
    pub fn encrypt(&self, plaintext: &str) -> VaultResult<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Decrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, opaque: &str) -> VaultResult<String> {
        if opaque.is_empty() {
            return Ok(String::new());
        }
        let raw = BASE64.decode(opaque).map_err(|_| VaultError::Encoding)?;
        if raw.len() <= NONCE_SIZE {
            return Err(VaultError::Truncated);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Utf8)
    }
}

/// Display form for a credential: first 4 + ellipsis + last 4 characters.
/// Short values collapse to `****`; empty stays empty.
pub fn mask(plaintext: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = plaintext.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
