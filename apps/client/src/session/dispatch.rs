//! Inbound frame routing and command handling.

use chatty_crypto::error::CryptoError;
use chatty_crypto::identity::{EncryptPublicKey, SignPublicKey};
use chatty_crypto::message::{encrypt_and_sign, verify_and_decrypt, IncomingCiphertext};
use chatty_crypto::peer_keys::{Registration, Resolution};
use chatty_shared::api::ws::{ClientAction, ServerFrame};
use chatty_shared::codec::parse_envelope;
use chatty_shared::ids::{ConversationId, UserId};
use tokio::time::Instant;

use super::{
    AwaitingVerification, Command, FailureReason, OutgoingMessage, SendOutcome, Session,
    SessionEvent,
};
use crate::conversations::MessageEntry;
use crate::error::ClientError;

impl From<&CryptoError> for FailureReason {
    fn from(err: &CryptoError) -> Self {
        match err {
            CryptoError::MissingKey { .. } => FailureReason::MissingKey,
            CryptoError::VerificationFailed => FailureReason::VerificationFailed,
            other => FailureReason::Undecryptable(other.to_string()),
        }
    }
}

impl Session {
    pub(crate) async fn handle_frame(&mut self, text: &str) {
        let frame: ServerFrame = match parse_envelope(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::Pong => self.on_pong(),
            ServerFrame::PubKey { uid, public_key } => self.on_encrypt_key(uid, &public_key),
            ServerFrame::SignKey { uid, public_key } => self.on_sign_key(uid, &public_key).await,
            frame @ ServerFrame::TxtMsg { .. } => {
                if let Some(incoming) = IncomingCiphertext::from_frame(frame) {
                    self.on_message(incoming).await;
                }
            }
        }
    }

    async fn on_message(&mut self, incoming: IncomingCiphertext) {
        let local = self.identity.user_id();
        if incoming.target != local {
            tracing::debug!(recipient = %incoming.target, "dropping message addressed to another user");
            return;
        }

        let conversation = incoming.conversation_id;
        let sender = incoming.sender;
        let known = self.conversations.get(&conversation).is_some();
        if let Err(e) = self.conversations.ensure_for_sender(conversation, sender).await {
            tracing::warn!(conversation = %conversation, error = %e, "conversation not saved");
        }
        if !known && self.conversations.get(&conversation).is_some() {
            self.emit(SessionEvent::ConversationCreated {
                conversation,
                peer: sender,
            });
        }

        if self.trust.is_trusted(&sender) {
            self.deliver(incoming).await;
            return;
        }

        // Hold the message until the user decides on the sender's key.
        if let Some(awaiting) = self.awaiting_verification.get_mut(&sender) {
            awaiting.queued.push(incoming);
            return;
        }
        let now = Instant::now().into_std();
        if self.sign_requests.register(sender, Some(incoming), now) == Registration::Requested {
            tracing::debug!(peer = %sender, "requesting signing key of unverified sender");
            if let Err(e) = self.transmit_action(ClientAction::GetSignPub { target: sender }) {
                tracing::warn!(peer = %sender, error = %e, "signing key request not sent");
            }
        }
    }

    /// Verify, decrypt, and store a message from a trusted sender.
    async fn deliver(&mut self, incoming: IncomingCiphertext) {
        let conversation = incoming.conversation_id;
        let sender = incoming.sender;
        let text = match verify_and_decrypt(
            &incoming,
            &self.identity,
            self.trust.trusted_key(&sender),
        ) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(peer = %sender, conversation = %conversation, error = %e, "message rejected");
                self.emit(SessionEvent::DeliveryFailed {
                    conversation,
                    sender,
                    reason: FailureReason::from(&e),
                });
                return;
            }
        };

        let entry = match self.conversations.append(conversation, sender, &text).await {
            Ok(entry) => Some(entry),
            Err(ClientError::Storage(e)) => {
                tracing::warn!(conversation = %conversation, error = %e, "message kept in memory only");
                self.last_entry(conversation)
            }
            Err(e) => {
                tracing::warn!(conversation = %conversation, error = %e, "message not stored");
                None
            }
        };
        if let Some(entry) = entry {
            self.emit(SessionEvent::MessageReceived {
                conversation,
                entry,
            });
        }
    }

    fn last_entry(&self, conversation: ConversationId) -> Option<MessageEntry> {
        self.conversations
            .get(&conversation)
            .and_then(|c| c.messages.last().cloned())
    }

    fn on_encrypt_key(&mut self, peer: UserId, encoded: &str) {
        let key = match EncryptPublicKey::from_base64(encoded) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "ignoring malformed encryption key");
                return;
            }
        };

        for message in self.encrypt_keys.on_key_received(peer, key.clone()) {
            let conversation = message.conversation;
            if let Err(e) = self.send_encrypted(message, &key) {
                tracing::warn!(peer = %peer, error = %e, "queued message not sent");
                self.emit(SessionEvent::SendFailed {
                    conversation,
                    recipient: peer,
                    reason: send_failure(&e),
                });
            }
        }
    }

    async fn on_sign_key(&mut self, peer: UserId, encoded: &str) {
        let candidate = match SignPublicKey::from_base64(encoded) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "ignoring malformed signing key");
                return;
            }
        };

        if self.trust.is_trusted(&peer) {
            // The stored key wins; anything waiting is checked against it.
            tracing::debug!(peer = %peer, "signing key announcement for trusted peer ignored");
            for incoming in self.sign_requests.take(&peer) {
                self.deliver(incoming).await;
            }
            return;
        }

        if let Some(awaiting) = self.awaiting_verification.get_mut(&peer) {
            tracing::debug!(peer = %peer, "verification already pending");
            awaiting.queued.extend(self.sign_requests.take(&peer));
            return;
        }

        let Some(request) = self.trust.begin_verification(peer, candidate) else {
            return;
        };
        let queued = self.sign_requests.take(&peer);
        tracing::info!(peer = %peer, held = queued.len(), "signing key awaiting verification");
        self.emit(SessionEvent::VerificationRequested {
            peer,
            fingerprint: request.fingerprint.clone(),
        });
        self.awaiting_verification
            .insert(peer, AwaitingVerification { request, queued });
    }

    async fn accept_verification(&mut self, peer: UserId) -> Result<(), ClientError> {
        let awaiting = self
            .awaiting_verification
            .remove(&peer)
            .ok_or(ClientError::NoPendingVerification { peer })?;

        match self.trust.accept_verification(&awaiting.request).await {
            Ok(()) => {}
            Err(CryptoError::AlreadyTrusted { .. }) => {
                tracing::debug!(peer = %peer, "peer became trusted meanwhile");
            }
            Err(e) => {
                // Nothing was committed; the prompt stays open for a retry.
                self.awaiting_verification.insert(peer, awaiting);
                return Err(e.into());
            }
        }

        for incoming in awaiting.queued {
            self.deliver(incoming).await;
        }
        Ok(())
    }

    fn reject_verification(&mut self, peer: UserId) -> Result<(), ClientError> {
        let awaiting = self
            .awaiting_verification
            .remove(&peer)
            .ok_or(ClientError::NoPendingVerification { peer })?;
        self.trust.reject_verification(&awaiting.request);

        for incoming in awaiting.queued {
            self.emit(SessionEvent::DeliveryFailed {
                conversation: incoming.conversation_id,
                sender: peer,
                reason: FailureReason::MissingKey,
            });
        }
        Ok(())
    }

    async fn send_message(
        &mut self,
        conversation: ConversationId,
        text: String,
    ) -> Result<SendOutcome, ClientError> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if self.outbound.is_none() {
            return Err(ClientError::NotConnected);
        }
        let recipient = self
            .conversations
            .get(&conversation)
            .ok_or(ClientError::UnknownConversation(conversation))?
            .peer()
            .ok_or(ClientError::NoParticipant(conversation))?;

        match self
            .conversations
            .append(conversation, self.identity.user_id(), &text)
            .await
        {
            Ok(_) => {}
            Err(ClientError::Storage(e)) => {
                tracing::warn!(conversation = %conversation, error = %e, "sent message kept in memory only");
            }
            Err(e) => return Err(e),
        }

        let message = OutgoingMessage {
            conversation,
            recipient,
            text,
        };
        let now = Instant::now().into_std();
        match self.encrypt_keys.resolve(recipient, message, now) {
            Resolution::Ready { key, action } => {
                self.send_encrypted(action, &key)?;
                Ok(SendOutcome::Sent)
            }
            Resolution::Requested => {
                tracing::debug!(peer = %recipient, "requesting encryption key");
                if let Err(e) = self.transmit_action(ClientAction::GetPub { uid: recipient }) {
                    tracing::warn!(peer = %recipient, error = %e, "encryption key request not sent");
                }
                Ok(SendOutcome::AwaitingKey)
            }
            Resolution::Attached => Ok(SendOutcome::AwaitingKey),
        }
    }

    fn send_encrypted(
        &self,
        message: OutgoingMessage,
        key: &EncryptPublicKey,
    ) -> Result<(), ClientError> {
        let bundle = encrypt_and_sign(
            &message.text,
            message.conversation,
            message.recipient,
            key,
            &self.identity,
        )?;
        self.transmit_action(bundle.into_frame())?;
        tracing::debug!(conversation = %message.conversation, peer = %message.recipient, "message sent");
        Ok(())
    }

    async fn add_conversation(
        &mut self,
        title: String,
        peer: UserId,
    ) -> Result<ConversationId, ClientError> {
        let id = self.conversations.create(&title, peer).await?;
        if !self.trust.is_trusted(&peer) && !self.awaiting_verification.contains_key(&peer) {
            let now = Instant::now().into_std();
            if self.sign_requests.register(peer, None, now) == Registration::Requested {
                // Offline requests go out on the next connect.
                if let Err(e) = self.transmit_action(ClientAction::GetSignPub { target: peer }) {
                    tracing::debug!(peer = %peer, error = %e, "signing key request deferred");
                }
            }
        }
        Ok(id)
    }

    /// Fail queued work whose key fetch went unanswered for too long.
    pub(crate) fn expire_key_requests(&mut self) {
        let now = Instant::now().into_std();

        for (peer, messages) in self.encrypt_keys.pending_mut().expire(now) {
            tracing::warn!(peer = %peer, queued = messages.len(), "encryption key request timed out");
            for message in messages {
                self.emit(SessionEvent::SendFailed {
                    conversation: message.conversation,
                    recipient: peer,
                    reason: FailureReason::KeyRequestTimedOut,
                });
            }
        }

        for (peer, held) in self.sign_requests.expire(now) {
            tracing::warn!(peer = %peer, queued = held.len(), "signing key request timed out");
            for incoming in held {
                self.emit(SessionEvent::DeliveryFailed {
                    conversation: incoming.conversation_id,
                    sender: peer,
                    reason: FailureReason::KeyRequestTimedOut,
                });
            }
        }
    }

    pub(crate) async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SendMessage {
                conversation,
                text,
                reply,
            } => {
                let _ = reply.send(self.send_message(conversation, text).await);
            }
            Command::AddConversation { title, peer, reply } => {
                let _ = reply.send(self.add_conversation(title, peer).await);
            }
            Command::RenameConversation {
                conversation,
                title,
                reply,
            } => {
                let _ = reply.send(self.conversations.rename(conversation, &title).await);
            }
            Command::RemoveConversation {
                conversation,
                reply,
            } => {
                let _ = reply.send(self.conversations.remove(conversation).await);
            }
            Command::Conversations { reply } => {
                let _ = reply.send(Ok(self.conversations.list()));
            }
            Command::SearchConversations { query, reply } => {
                let _ = reply.send(Ok(self.conversations.search(&query)));
            }
            Command::Messages {
                conversation,
                reply,
            } => {
                let result = self
                    .conversations
                    .get(&conversation)
                    .map(|c| c.messages.clone())
                    .ok_or(ClientError::UnknownConversation(conversation));
                let _ = reply.send(result);
            }
            Command::AcceptVerification { peer, reply } => {
                let _ = reply.send(self.accept_verification(peer).await);
            }
            Command::RejectVerification { peer, reply } => {
                let _ = reply.send(self.reject_verification(peer));
            }
            Command::RemoveTrust { peer, reply } => {
                let result = self.trust.remove(&peer).await.map_err(ClientError::from);
                let _ = reply.send(result);
            }
            // Intercepted by the run loop.
            Command::Shutdown => {}
        }
    }
}

fn send_failure(err: &ClientError) -> FailureReason {
    match err {
        ClientError::Crypto(e) => FailureReason::from(e),
        other => FailureReason::Transport(other.to_string()),
    }
}
