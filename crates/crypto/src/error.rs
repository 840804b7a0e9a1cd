//! Error types for the chatty-crypto crate.

use chatty_shared::error::CodecError;
use chatty_shared::ids::UserId;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur during identity, trust, and message operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided key material is invalid (wrong length, malformed, etc.).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Keypair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption or key wrapping failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (wrong key, corrupted ciphertext, etc.).
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// The signature does not match the payload and the sender's trusted key.
    #[error("signature verification failed")]
    VerificationFailed,

    /// No trusted signing key exists for the sender; the conversation must be
    /// re-established before its messages can be read.
    #[error("no trusted signing key for {peer}")]
    MissingKey { peer: UserId },

    /// A signing key is already trusted for this peer.
    #[error("signing key already trusted for {peer}")]
    AlreadyTrusted { peer: UserId },

    /// Persisted identity material exists but is incomplete or unreadable.
    #[error("identity corrupted: {0}")]
    IdentityCorrupted(String),

    /// Wire encoding error.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Key-value storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for CryptoError {
    fn from(err: serde_json::Error) -> Self {
        CryptoError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_human_readable() {
        let err = CryptoError::InvalidKey("bad key data".into());
        assert!(err.to_string().contains("bad key data"));

        let peer = UserId::new();
        let err = CryptoError::MissingKey { peer };
        assert!(err.to_string().contains(&peer.to_string()));

        let err = CryptoError::VerificationFailed;
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn from_serde_json_error_converts_to_serialization_error() {
        let json_err: serde_json::Error = serde_json::from_str::<String>("not json").unwrap_err();
        let crypto_err: CryptoError = json_err.into();
        match crypto_err {
            CryptoError::SerializationError(_) => {}
            other => panic!("expected SerializationError, got: {other:?}"),
        }
    }

    #[test]
    fn from_codec_error_is_transparent() {
        let crypto_err: CryptoError = CodecError::Decode("truncated".into()).into();
        assert!(matches!(crypto_err, CryptoError::Codec(_)));
        assert_eq!(crypto_err.to_string(), "decode error: truncated");
    }

    #[test]
    fn from_storage_error_converts() {
        let crypto_err: CryptoError = StorageError::Backend("disk full".into()).into();
        assert!(matches!(crypto_err, CryptoError::Storage(_)));
    }

    #[test]
    fn all_variants_impl_error() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(CryptoError::InvalidKey("k".into())),
            Box::new(CryptoError::KeyGeneration("g".into())),
            Box::new(CryptoError::EncryptionFailed("e".into())),
            Box::new(CryptoError::DecryptionFailed("d".into())),
            Box::new(CryptoError::VerificationFailed),
            Box::new(CryptoError::MissingKey { peer: UserId::new() }),
            Box::new(CryptoError::AlreadyTrusted { peer: UserId::new() }),
            Box::new(CryptoError::IdentityCorrupted("i".into())),
            Box::new(CryptoError::SerializationError("s".into())),
        ];
        for e in &errors {
            let _ = e.to_string();
        }
    }
}
