//! Session with the relay.
//!
//! One task owns the identity, the trust table, the peer key caches, and the
//! conversation store. Callers talk to it through a [`SessionHandle`];
//! connection state and latency are published on watch channels and
//! everything the user should see arrives as [`SessionEvent`]s.

mod connection;
mod dispatch;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatty_crypto::fingerprint::Fingerprint;
use chatty_crypto::identity::{EncryptPublicKey, Identity};
use chatty_crypto::message::IncomingCiphertext;
use chatty_crypto::peer_keys::{PeerKeyCache, PendingRequests};
use chatty_crypto::trust::{TrustStore, VerificationRequest};
use chatty_shared::constants::{
    HEARTBEAT_INTERVAL_SECS, KEY_REQUEST_TIMEOUT_SECS, RECONNECT_DELAY_SECS,
};
use chatty_shared::ids::{ConversationId, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::conversations::{ConversationStore, ConversationSummary, MessageEntry};
use crate::error::ClientError;
use crate::transport::Connector;

/// Commands queued by handles before the session task picks them up.
const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    /// The connection failed or broke; a reconnect is scheduled.
    Error,
    /// The relay closed the connection; a reconnect is scheduled.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub key_request_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            key_request_timeout: Duration::from_secs(KEY_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Why a message could not be delivered or sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The sender's signing key is not trusted; the conversation has to be
    /// re-established.
    MissingKey,
    /// The signature did not match. The message was discarded unread.
    VerificationFailed,
    /// The peer key never arrived.
    KeyRequestTimedOut,
    /// Authentic but unreadable (bad key wrap, ciphertext, or compression).
    Undecryptable(String),
    /// The frame could not be handed to the relay link.
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An incoming message opened a conversation we did not know.
    ConversationCreated {
        conversation: ConversationId,
        peer: UserId,
    },
    MessageReceived {
        conversation: ConversationId,
        entry: MessageEntry,
    },
    /// A signing key arrived for an untrusted peer. Compare the fingerprint
    /// out of band, then accept or reject it.
    VerificationRequested {
        peer: UserId,
        fingerprint: Fingerprint,
    },
    DeliveryFailed {
        conversation: ConversationId,
        sender: UserId,
        reason: FailureReason,
    },
    SendFailed {
        conversation: ConversationId,
        recipient: UserId,
        reason: FailureReason,
    },
}

/// What happened to a message accepted by [`SessionHandle::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Encrypted and handed to the relay.
    Sent,
    /// Stored; it goes out once the recipient's key arrives.
    AwaitingKey,
}

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

pub(crate) enum Command {
    SendMessage {
        conversation: ConversationId,
        text: String,
        reply: Reply<SendOutcome>,
    },
    AddConversation {
        title: String,
        peer: UserId,
        reply: Reply<ConversationId>,
    },
    RenameConversation {
        conversation: ConversationId,
        title: String,
        reply: Reply<()>,
    },
    RemoveConversation {
        conversation: ConversationId,
        reply: Reply<()>,
    },
    Conversations {
        reply: Reply<Vec<ConversationSummary>>,
    },
    SearchConversations {
        query: String,
        reply: Reply<Vec<ConversationSummary>>,
    },
    Messages {
        conversation: ConversationId,
        reply: Reply<Vec<MessageEntry>>,
    },
    AcceptVerification {
        peer: UserId,
        reply: Reply<()>,
    },
    RejectVerification {
        peer: UserId,
        reply: Reply<()>,
    },
    RemoveTrust {
        peer: UserId,
        reply: Reply<bool>,
    },
    Shutdown,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    latency: watch::Receiver<Option<Duration>>,
    user_id: UserId,
    fingerprint: Fingerprint,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| ClientError::SessionClosed)?;
        response.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Store and send a message. Fails with [`ClientError::NotConnected`]
    /// without storing anything while the session is not connected.
    pub async fn send_message(
        &self,
        conversation: ConversationId,
        text: impl Into<String>,
    ) -> Result<SendOutcome, ClientError> {
        let text = text.into();
        self.request(|reply| Command::SendMessage {
            conversation,
            text,
            reply,
        })
        .await
    }

    /// Start a conversation with `peer`. The peer's signing key is fetched
    /// right away so verification can happen before the first message.
    pub async fn add_conversation(
        &self,
        title: impl Into<String>,
        peer: UserId,
    ) -> Result<ConversationId, ClientError> {
        let title = title.into();
        self.request(|reply| Command::AddConversation { title, peer, reply })
            .await
    }

    pub async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: impl Into<String>,
    ) -> Result<(), ClientError> {
        let title = title.into();
        self.request(|reply| Command::RenameConversation {
            conversation,
            title,
            reply,
        })
        .await
    }

    pub async fn remove_conversation(&self, conversation: ConversationId) -> Result<(), ClientError> {
        self.request(|reply| Command::RemoveConversation {
            conversation,
            reply,
        })
        .await
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        self.request(|reply| Command::Conversations { reply }).await
    }

    pub async fn search_conversations(
        &self,
        query: impl Into<String>,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        let query = query.into();
        self.request(|reply| Command::SearchConversations { query, reply })
            .await
    }

    pub async fn messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<MessageEntry>, ClientError> {
        self.request(|reply| Command::Messages {
            conversation,
            reply,
        })
        .await
    }

    /// Trust the signing key offered in the pending verification for `peer`.
    /// Messages held back for that peer are then decrypted.
    pub async fn accept_verification(&self, peer: UserId) -> Result<(), ClientError> {
        self.request(|reply| Command::AcceptVerification { peer, reply })
            .await
    }

    pub async fn reject_verification(&self, peer: UserId) -> Result<(), ClientError> {
        self.request(|reply| Command::RejectVerification { peer, reply })
            .await
    }

    /// Forget the trusted signing key of `peer`. Returns whether one existed.
    pub async fn remove_trust(&self, peer: UserId) -> Result<bool, ClientError> {
        self.request(|reply| Command::RemoveTrust { peer, reply })
            .await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Last measured ping round trip, if any.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.borrow()
    }

    pub fn latency_changes(&self) -> watch::Receiver<Option<Duration>> {
        self.latency.clone()
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Our own safety number, to read out to peers.
    pub fn own_fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Stop the session. Pending conversation writes are flushed first.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// A message waiting for its recipient's encryption key.
#[derive(Debug, Clone)]
pub(crate) struct OutgoingMessage {
    conversation: ConversationId,
    recipient: UserId,
    text: String,
}

/// A verification prompt and the messages held back until it is answered.
pub(crate) struct AwaitingVerification {
    request: VerificationRequest,
    queued: Vec<IncomingCiphertext>,
}

pub(crate) struct Session {
    timing: SessionTiming,
    identity: Identity,
    trust: TrustStore,
    conversations: ConversationStore,
    connector: Arc<dyn Connector>,
    encrypt_keys: PeerKeyCache<EncryptPublicKey, OutgoingMessage>,
    sign_requests: PendingRequests<IncomingCiphertext>,
    awaiting_verification: HashMap<UserId, AwaitingVerification>,
    outbound: Option<mpsc::Sender<String>>,
    last_ping: Option<tokio::time::Instant>,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<SessionState>,
    latency: watch::Sender<Option<Duration>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Start the session task. It connects immediately and keeps reconnecting
/// until [`SessionHandle::shutdown`] is called or every handle is dropped.
pub fn spawn(
    timing: SessionTiming,
    identity: Identity,
    trust: TrustStore,
    conversations: ConversationStore,
    connector: Arc<dyn Connector>,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<SessionEvent>,
    JoinHandle<()>,
) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (latency_tx, latency_rx) = watch::channel(None);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let handle = SessionHandle {
        commands: command_tx,
        state: state_rx,
        latency: latency_rx,
        user_id: identity.user_id(),
        fingerprint: identity.fingerprint(),
    };

    let session = Session {
        timing,
        identity,
        trust,
        conversations,
        connector,
        encrypt_keys: PeerKeyCache::new(timing.key_request_timeout),
        sign_requests: PendingRequests::new(timing.key_request_timeout),
        awaiting_verification: HashMap::new(),
        outbound: None,
        last_ping: None,
        commands: command_rx,
        state: state_tx,
        latency: latency_tx,
        events: event_tx,
    };

    let task = tokio::spawn(session.run());
    (handle, event_rx, task)
}

impl Session {
    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = ?previous, to = ?next, "session state changed");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
