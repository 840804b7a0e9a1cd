//! Hybrid encrypt-and-sign message protocol.
//!
//! A message body is compressed, sealed with a one-time AES-256-GCM key, and
//! the key is wrapped with the recipient's RSA-OAEP public key. The sender
//! then signs a canonical serialization of every transmitted field with its
//! P-521 key. Receivers verify the signature against the sender's trusted key
//! before any decryption takes place.

use chatty_shared::api::ws::{ClientAction, ServerFrame};
use chatty_shared::codec::{compress, decode_binary, decompress, encode_binary};
use chatty_shared::constants::SEND_TEXT_ACTION;
use chatty_shared::ids::{ConversationId, UserId};
use serde::Serialize;

use crate::error::CryptoError;
use crate::identity::{EncryptPublicKey, Identity, SignPublicKey};
use crate::symmetric::{self, MessageKey};

/// The fields covered by a message signature.
///
/// Field order is fixed by declaration order; the canonical bytes are its
/// compact JSON serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignablePayload {
    pub data: String,
    pub iv: String,
    pub gid: ConversationId,
    pub id: UserId,
    pub key: String,
    pub act: String,
}

impl SignablePayload {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An encrypted, signed message ready to be sent as a `sendTxt` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCiphertextBundle {
    pub payload: SignablePayload,
    pub sig: String,
}

impl SignedCiphertextBundle {
    pub fn into_frame(self) -> ClientAction {
        let SignablePayload {
            data,
            iv,
            gid,
            id,
            key,
            ..
        } = self.payload;
        ClientAction::SendTxt {
            data,
            iv,
            gid,
            id,
            key,
            sig: self.sig,
        }
    }
}

/// A received `txtMsg`, still encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCiphertext {
    pub data: String,
    pub iv: String,
    pub conversation_id: ConversationId,
    pub sender: UserId,
    pub target: UserId,
    pub key: String,
    pub sig: String,
}

impl IncomingCiphertext {
    /// Extract the message from a `txtMsg` frame; other frames yield `None`.
    pub fn from_frame(frame: ServerFrame) -> Option<Self> {
        match frame {
            ServerFrame::TxtMsg {
                data,
                iv,
                gid,
                uid,
                target,
                key,
                sig,
            } => Some(Self {
                data,
                iv,
                conversation_id: gid,
                sender: uid,
                target,
                key,
                sig,
            }),
            _ => None,
        }
    }

    /// The payload the sender signed, rebuilt from the received fields.
    fn signable(&self) -> SignablePayload {
        SignablePayload {
            data: self.data.clone(),
            iv: self.iv.clone(),
            gid: self.conversation_id,
            id: self.target,
            key: self.key.clone(),
            act: SEND_TEXT_ACTION.to_string(),
        }
    }
}

/// Encrypt `plaintext` for `recipient_id` and sign it with our identity.
pub fn encrypt_and_sign(
    plaintext: &str,
    conversation_id: ConversationId,
    recipient_id: UserId,
    recipient_key: &EncryptPublicKey,
    identity: &Identity,
) -> Result<SignedCiphertextBundle, CryptoError> {
    let sealed = symmetric::seal(&compress(plaintext)?)?;
    let wrapped_key = recipient_key.wrap_key(sealed.key.as_bytes())?;

    let payload = SignablePayload {
        data: encode_binary(&sealed.ciphertext),
        iv: encode_binary(&sealed.iv),
        gid: conversation_id,
        id: recipient_id,
        key: encode_binary(&wrapped_key),
        act: SEND_TEXT_ACTION.to_string(),
    };
    let signature = identity.sign(&payload.canonical_bytes()?);

    Ok(SignedCiphertextBundle {
        payload,
        sig: encode_binary(&signature),
    })
}

/// Verify the sender's signature, then decrypt the message body.
///
/// Nothing is decrypted unless the signature checks out against
/// `trusted_key`. Without a trusted key the message cannot be read at all.
pub fn verify_and_decrypt(
    incoming: &IncomingCiphertext,
    identity: &Identity,
    trusted_key: Option<&SignPublicKey>,
) -> Result<String, CryptoError> {
    let trusted_key = trusted_key.ok_or(CryptoError::MissingKey {
        peer: incoming.sender,
    })?;

    let signature = decode_binary(&incoming.sig).map_err(|_| CryptoError::VerificationFailed)?;
    trusted_key.verify(&incoming.signable().canonical_bytes()?, &signature)?;

    let wrapped_key = decode_binary(&incoming.key)?;
    let key = MessageKey::from_slice(&identity.unwrap_key(&wrapped_key)?)?;
    let iv = decode_binary(&incoming.iv)?;
    let ciphertext = decode_binary(&incoming.data)?;

    let compressed = symmetric::open(&key, &iv, &ciphertext)?;
    Ok(decompress(&compressed)?)
}
