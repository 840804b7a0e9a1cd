//! Per-message symmetric encryption using AES-256-GCM.
//!
//! Every message gets a fresh random key and IV. The key is wrapped for the
//! recipient by the caller, so an IV is never reused under the same key.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const IV_SIZE: usize = 12; // 96-bit nonce for AES-256-GCM
pub const KEY_SIZE: usize = 32; // 256-bit key

/// A 32-byte AES-256 key that is securely zeroed on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey {
    bytes: [u8; KEY_SIZE],
}

impl MessageKey {
    pub fn random() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::DecryptionFailed(format!(
                "message key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Output of [`seal`]: ciphertext with tag appended, the IV, and the key.
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub key: MessageKey,
}

/// Encrypt `plaintext` under a freshly generated key and IV.
pub fn seal(plaintext: &[u8]) -> Result<SealedPayload, CryptoError> {
    let key = MessageKey::random();
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(format!("cipher init: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("aes-gcm: {e}")))?;

    Ok(SealedPayload { ciphertext, iv, key })
}

/// Decrypt and authenticate `ciphertext` (tag appended).
pub fn open(key: &MessageKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "iv must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailed(format!("cipher init: {e}")))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|e| CryptoError::DecryptionFailed(format!("aes-gcm: {e}")))
}
