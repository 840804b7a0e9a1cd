//! Identity keypair management for chatty-crypto.
//!
//! An identity is an RSA encryption keypair (OAEP with SHA-512) and an ECDSA
//! signing keypair over P-521 (SHA-512), bound to the local user id. It is
//! generated on first run, persisted through the key-value store, and never
//! rotated. Private halves are only reachable from inside this crate.

use std::sync::Arc;

use aes_gcm::aead::OsRng;
use chatty_shared::codec::{decode_binary, encode_binary};
use chatty_shared::constants::MIN_RSA_KEY_BITS;
use chatty_shared::ids::UserId;
use p521::ecdsa::signature::{Signer, Verifier};
use p521::ecdsa::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::fingerprint::Fingerprint;
use crate::storage::{keys, KeyValueStore};

/// A peer's (or our own) RSA encryption public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptPublicKey(RsaPublicKey);

impl EncryptPublicKey {
    /// Canonical encoding: SubjectPublicKeyInfo DER.
    pub fn to_der(&self) -> Result<Vec<u8>, CryptoError> {
        let doc = self
            .0
            .to_public_key_der()
            .map_err(|e| CryptoError::InvalidKey(format!("encode encryption key: {e}")))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("encryption key: {e}")))
    }

    /// Wire form used by `updatePub` and `pubKey` frames.
    pub fn to_base64(&self) -> Result<String, CryptoError> {
        Ok(encode_binary(&self.to_der()?))
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        Self::from_der(&decode_binary(text)?)
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, CryptoError> {
        Ok(Fingerprint::of(&self.to_der()?))
    }

    /// Encrypt a symmetric key for the owner of this public key.
    pub fn wrap_key(&self, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.0
            .encrypt(&mut OsRng, Oaep::new::<Sha512>(), key)
            .map_err(|e| CryptoError::EncryptionFailed(format!("key wrap: {e}")))
    }
}

/// A peer's (or our own) ECDSA P-521 verifying key.
#[derive(Clone)]
pub struct SignPublicKey(VerifyingKey);

// `p521::ecdsa::VerifyingKey` does not implement `Debug`.
impl std::fmt::Debug for SignPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SignPublicKey").field(&self.to_sec1()).finish()
    }
}

impl SignPublicKey {
    /// Canonical encoding: uncompressed SEC1 point.
    pub fn to_sec1(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn from_sec1(bytes: &[u8]) -> Result<Self, CryptoError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(format!("signing key: {e}")))
    }

    /// Wire form used by `updateSign` and `signKey` frames.
    pub fn to_base64(&self) -> String {
        encode_binary(&self.to_sec1())
    }

    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        Self::from_sec1(&decode_binary(text)?)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.to_sec1())
    }

    /// Check a fixed-size (r ‖ s) signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::VerificationFailed)?;
        self.0
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl PartialEq for SignPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_sec1() == other.to_sec1()
    }
}

impl Eq for SignPublicKey {}

/// The local user's keys.
#[derive(Clone)]
pub struct Identity {
    user_id: UserId,
    encrypt_private: RsaPrivateKey,
    encrypt_public: EncryptPublicKey,
    sign_private: SigningKey,
    sign_public: SignPublicKey,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("sign_fingerprint", &self.fingerprint().to_string())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Generate a fresh identity. RSA generation is CPU-heavy; async callers
    /// should go through [`generate_or_load_identity`], which runs it on the
    /// blocking pool.
    pub fn generate(user_id: UserId, rsa_bits: usize) -> Result<Self, CryptoError> {
        if rsa_bits < MIN_RSA_KEY_BITS {
            return Err(CryptoError::KeyGeneration(format!(
                "RSA modulus of {rsa_bits} bits is below the {MIN_RSA_KEY_BITS}-bit minimum"
            )));
        }
        let encrypt_private = RsaPrivateKey::new(&mut OsRng, rsa_bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let sign_private = SigningKey::random(&mut OsRng);
        Ok(Self::from_parts(user_id, encrypt_private, sign_private))
    }

    fn from_parts(user_id: UserId, encrypt_private: RsaPrivateKey, sign_private: SigningKey) -> Self {
        let encrypt_public = EncryptPublicKey(RsaPublicKey::from(&encrypt_private));
        let sign_public = SignPublicKey(VerifyingKey::from(&sign_private));
        Self {
            user_id,
            encrypt_private,
            encrypt_public,
            sign_private,
            sign_public,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn encrypt_public_key(&self) -> &EncryptPublicKey {
        &self.encrypt_public
    }

    pub fn sign_public_key(&self) -> &SignPublicKey {
        &self.sign_public
    }

    /// Safety number of our own signing key, for reading out to peers.
    pub fn fingerprint(&self) -> Fingerprint {
        self.sign_public.fingerprint()
    }

    /// ECDSA P-521 / SHA-512 signature in fixed-size (r ‖ s) form.
    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.sign_private.sign(message);
        signature.to_bytes().to_vec()
    }

    /// Recover a symmetric key wrapped with our encryption public key.
    pub(crate) fn unwrap_key(&self, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.encrypt_private
            .decrypt(Oaep::new::<Sha512>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|e| CryptoError::DecryptionFailed(format!("key unwrap: {e}")))
    }

    async fn persist(&self, store: &dyn KeyValueStore) -> Result<(), CryptoError> {
        let encrypt_der = self
            .encrypt_private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::InvalidKey(format!("encode private key: {e}")))?;
        let encrypt_b64 = Zeroizing::new(encode_binary(encrypt_der.as_bytes()));
        let sign_bytes = Zeroizing::new(self.sign_private.to_bytes().to_vec());
        let sign_b64 = Zeroizing::new(encode_binary(&sign_bytes));

        // The user id goes last so a partial write is detected as corruption
        // instead of being mistaken for a complete identity.
        store.set(keys::ENCRYPT_KEY, &encrypt_b64).await?;
        store.set(keys::SIGN_KEY, &sign_b64).await?;
        store.set(keys::USER_ID, &self.user_id.to_string()).await?;
        Ok(())
    }

    fn decode(user_id: &str, encrypt_b64: &str, sign_b64: &str) -> Result<Self, CryptoError> {
        let user_id: UserId = user_id
            .parse()
            .map_err(|e| CryptoError::IdentityCorrupted(format!("user id: {e}")))?;

        let encrypt_der = Zeroizing::new(
            decode_binary(encrypt_b64)
                .map_err(|e| CryptoError::IdentityCorrupted(format!("encryption key: {e}")))?,
        );
        let encrypt_private = RsaPrivateKey::from_pkcs8_der(&encrypt_der)
            .map_err(|e| CryptoError::IdentityCorrupted(format!("encryption key: {e}")))?;

        let sign_bytes = Zeroizing::new(
            decode_binary(sign_b64)
                .map_err(|e| CryptoError::IdentityCorrupted(format!("signing key: {e}")))?,
        );
        let sign_private = SigningKey::from_slice(&sign_bytes)
            .map_err(|e| CryptoError::IdentityCorrupted(format!("signing key: {e}")))?;

        Ok(Self::from_parts(user_id, encrypt_private, sign_private))
    }
}

/// Load the persisted identity, or generate and persist one on first run.
///
/// The user id is written last, so key material without a user id is an
/// unfinished first run and is replaced by a fresh identity. A stored user id
/// with missing or undecodable keys is reported as
/// [`CryptoError::IdentityCorrupted`] and left untouched.
pub async fn generate_or_load_identity(
    store: Arc<dyn KeyValueStore>,
    rsa_bits: usize,
) -> Result<Identity, CryptoError> {
    let user_id = store.get(keys::USER_ID).await?;
    let encrypt = store.get(keys::ENCRYPT_KEY).await?.map(Zeroizing::new);
    let sign = store.get(keys::SIGN_KEY).await?.map(Zeroizing::new);

    match (user_id, encrypt, sign) {
        (Some(user_id), Some(encrypt), Some(sign)) => {
            let identity = Identity::decode(&user_id, &encrypt, &sign)?;
            tracing::debug!(user_id = %identity.user_id, "loaded identity");
            Ok(identity)
        }
        (None, encrypt, sign) => {
            if encrypt.is_some() || sign.is_some() {
                tracing::warn!("discarding key material of an unfinished identity setup");
            }
            let identity = tokio::task::spawn_blocking(move || {
                Identity::generate(UserId::new(), rsa_bits)
            })
            .await
            .map_err(|e| CryptoError::KeyGeneration(format!("generation task failed: {e}")))??;
            if let Err(e) = identity.persist(store.as_ref()).await {
                discard_partial_identity(store.as_ref()).await;
                return Err(e);
            }
            tracing::info!(user_id = %identity.user_id, "generated new identity");
            Ok(identity)
        }
        _ => Err(CryptoError::IdentityCorrupted(
            "identity is only partially stored".into(),
        )),
    }
}

/// Best-effort removal of keys left behind by a failed first-run write.
async fn discard_partial_identity(store: &dyn KeyValueStore) {
    for key in [keys::ENCRYPT_KEY, keys::SIGN_KEY] {
        if let Err(e) = store.delete(key).await {
            tracing::warn!(key, error = %e, "could not remove partial identity");
        }
    }
}
