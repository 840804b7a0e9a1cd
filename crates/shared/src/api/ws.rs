use crate::ids::{ConversationId, UserId};
use serde::{Deserialize, Serialize};

/// Frames sent from the client to the relay.
///
/// Every frame except the initial authentication frame carries an `act`
/// discriminator, so the authentication frame is modeled as the untagged
/// fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientFrame {
    Action(ClientAction),
    Auth { uid: UserId },
}

/// Client frames distinguished by their `act` field.
///
/// Binary fields are base64 text; see [`crate::codec::encode_binary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "act", rename_all = "camelCase")]
pub enum ClientAction {
    /// Announce the local encryption public key.
    UpdatePub { key: String },
    /// Announce the local signing public key.
    UpdateSign { key: String },
    Ping,
    /// Signed, encrypted message for the user `id` in conversation `gid`.
    SendTxt {
        data: String,
        iv: String,
        gid: ConversationId,
        id: UserId,
        key: String,
        sig: String,
    },
    /// Fetch the encryption public key of `uid`.
    GetPub { uid: UserId },
    /// Fetch the signing public key of `target`.
    GetSignPub { target: UserId },
}

/// Frames sent from the relay to the client, distinguished by `resp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resp", rename_all = "camelCase")]
pub enum ServerFrame {
    Pong,
    /// Message from `uid` addressed to `target` in conversation `gid`.
    TxtMsg {
        data: String,
        iv: String,
        gid: ConversationId,
        uid: UserId,
        target: UserId,
        key: String,
        sig: String,
    },
    /// Answer to [`ClientAction::GetPub`].
    PubKey {
        uid: UserId,
        #[serde(rename = "pub")]
        public_key: String,
    },
    /// Answer to [`ClientAction::GetSignPub`].
    SignKey {
        uid: UserId,
        #[serde(rename = "pub")]
        public_key: String,
    },
}

impl From<ClientAction> for ClientFrame {
    fn from(action: ClientAction) -> Self {
        ClientFrame::Action(action)
    }
}
