//! Error types for the chatty-client crate.

use chatty_crypto::error::CryptoError;
use chatty_crypto::storage::StorageError;
use chatty_shared::error::CodecError;
use chatty_shared::ids::{ConversationId, UserId};
use thiserror::Error;

/// Failures of the relay link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The link's outbound queue is gone or full.
    #[error("link closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

/// Errors returned to callers of the session and conversation store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session is not connected; nothing was queued or stored.
    #[error("not connected to the relay")]
    NotConnected,

    #[error("message is empty")]
    EmptyMessage,

    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// The conversation has no peer to deliver to.
    #[error("conversation {0} has no participant")]
    NoParticipant(ConversationId),

    #[error("no verification pending for {peer}")]
    NoPendingVerification { peer: UserId },

    /// The session task has stopped.
    #[error("session closed")]
    SessionClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
