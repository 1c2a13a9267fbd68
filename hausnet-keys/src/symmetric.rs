//! Symmetric session-cipher helpers.
//!
//! Intention:
//! * Encrypt/decrypt session traffic with AES-GCM-256 using negotiated
//!   session key material and an explicit per-message nonce.
//! * Derive fresh random session keys for the session layer.

use crate::error::{KeyError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

pub const SYMMETRIC_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Generate fresh random key material for a new session.
pub fn generate_key() -> [u8; SYMMETRIC_KEY_LEN] {
    let mut key = [0u8; SYMMETRIC_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn encrypt(
    key: &[u8; SYMMETRIC_KEY_LEN],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::CryptoError(format!("AES init failed: {e}")))?;
    let nonce: [u8; NONCE_LEN] = Aes256Gcm::generate_nonce(&mut OsRng).into();
    let ciphertext = cipher
        .encrypt(&nonce.into(), plaintext)
        .map_err(|_| KeyError::EncryptionError("session encryption failed".to_string()))?;
    Ok((ciphertext, nonce))
}

pub fn decrypt(
    key: &[u8; SYMMETRIC_KEY_LEN],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| KeyError::CryptoError(format!("AES init failed: {e}")))?;
    let nonce_ref: &Nonce<aes_gcm::aead::generic_array::typenum::U12> = nonce.into();
    cipher
        .decrypt(nonce_ref, ciphertext)
        .map_err(|_| KeyError::DecryptionError("session decryption failed".to_string()))
}
