//! Conversation list and per-conversation message logs.
//!
//! The index (id, title, participants) is one snapshot under `chats`; every
//! conversation's messages are a separate snapshot under `chatData:<id>`.
//! Mutations apply in memory first and mark the touched snapshots dirty. A
//! failed write is returned to the caller but the change is kept, and the
//! dirty snapshots are rewritten on the next mutation or [`ConversationStore::sync`].

use std::collections::HashSet;
use std::sync::Arc;

use chatty_crypto::storage::{get_json, keys, set_json, KeyValueStore, StorageError};
use chatty_shared::constants::UNKNOWN_CHAT_TITLE;
use chatty_shared::ids::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub sender: UserId,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Index entry of a conversation, without its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub participants: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    /// The first participant is the peer messages are delivered to.
    pub participants: Vec<UserId>,
    pub messages: Vec<MessageEntry>,
}

impl Conversation {
    pub fn peer(&self) -> Option<UserId> {
        self.participants.first().copied()
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            title: self.title.clone(),
            participants: self.participants.clone(),
        }
    }
}

pub struct ConversationStore {
    conversations: Vec<Conversation>,
    store: Arc<dyn KeyValueStore>,
    index_dirty: bool,
    dirty_logs: HashSet<ConversationId>,
    pending_deletes: HashSet<ConversationId>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations.len())
            .field("index_dirty", &self.index_dirty)
            .field("dirty_logs", &self.dirty_logs.len())
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Load the index and every conversation log. Conversations whose log is
    /// missing or unreadable start empty; an unreadable log stays in storage
    /// until the conversation is next written. Only a corrupt index fails.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let index: Vec<ConversationSummary> = get_json(store.as_ref(), keys::CONVERSATIONS)
            .await?
            .unwrap_or_default();

        let mut conversations = Vec::with_capacity(index.len());
        for summary in index {
            let messages: Vec<MessageEntry> =
                match get_json(store.as_ref(), &keys::conversation_log(&summary.id)).await {
                    Ok(messages) => messages.unwrap_or_default(),
                    Err(e @ StorageError::Corrupt { .. }) => {
                        tracing::warn!(conversation = %summary.id, error = %e, "skipping unreadable conversation log");
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };
            conversations.push(Conversation {
                id: summary.id,
                title: summary.title,
                participants: summary.participants,
                messages,
            });
        }
        tracing::debug!(count = conversations.len(), "loaded conversations");

        Ok(Self {
            conversations,
            store,
            index_dirty: false,
            dirty_logs: HashSet::new(),
            pending_deletes: HashSet::new(),
        })
    }

    /// Start a conversation with `peer` under a fresh random id.
    pub async fn create(
        &mut self,
        title: &str,
        peer: UserId,
    ) -> Result<ConversationId, ClientError> {
        let id = ConversationId::new();
        self.insert(id, title.to_string(), peer);
        self.sync().await?;
        Ok(id)
    }

    /// Make sure a conversation exists for an incoming message. Returns
    /// whether it had to be created.
    pub async fn ensure_for_sender(
        &mut self,
        id: ConversationId,
        sender: UserId,
    ) -> Result<bool, ClientError> {
        if self.get(&id).is_some() {
            return Ok(false);
        }
        self.insert(id, UNKNOWN_CHAT_TITLE.to_string(), sender);
        tracing::info!(conversation = %id, sender = %sender, "conversation created by incoming message");
        self.sync().await?;
        Ok(true)
    }

    fn insert(&mut self, id: ConversationId, title: String, peer: UserId) {
        self.pending_deletes.remove(&id);
        self.conversations.push(Conversation {
            id,
            title,
            participants: vec![peer],
            messages: Vec::new(),
        });
        self.index_dirty = true;
        self.dirty_logs.insert(id);
    }

    pub async fn append(
        &mut self,
        id: ConversationId,
        sender: UserId,
        text: &str,
    ) -> Result<MessageEntry, ClientError> {
        let conversation = self
            .get_mut(&id)
            .ok_or(ClientError::UnknownConversation(id))?;
        let entry = MessageEntry {
            sender,
            text: text.to_string(),
            at: Utc::now(),
        };
        conversation.messages.push(entry.clone());
        self.dirty_logs.insert(id);
        self.sync().await?;
        Ok(entry)
    }

    pub async fn rename(&mut self, id: ConversationId, title: &str) -> Result<(), ClientError> {
        let conversation = self
            .get_mut(&id)
            .ok_or(ClientError::UnknownConversation(id))?;
        conversation.title = title.to_string();
        self.index_dirty = true;
        self.sync().await
    }

    /// Drop a conversation and purge its persisted log.
    pub async fn remove(&mut self, id: ConversationId) -> Result<(), ClientError> {
        let position = self
            .conversations
            .iter()
            .position(|c| c.id == id)
            .ok_or(ClientError::UnknownConversation(id))?;
        self.conversations.remove(position);
        self.index_dirty = true;
        self.dirty_logs.remove(&id);
        self.pending_deletes.insert(id);
        self.sync().await
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == *id)
    }

    fn get_mut(&mut self, id: &ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == *id)
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn list(&self) -> Vec<ConversationSummary> {
        self.conversations.iter().map(Conversation::summary).collect()
    }

    /// Conversations whose title contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<ConversationSummary> {
        let query = query.to_lowercase();
        self.conversations
            .iter()
            .filter(|c| c.title.to_lowercase().contains(&query))
            .map(Conversation::summary)
            .collect()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.index_dirty || !self.dirty_logs.is_empty() || !self.pending_deletes.is_empty()
    }

    /// Write every dirty snapshot. Each key is attempted even if an earlier
    /// one fails; the first failure is returned and the failed keys stay dirty.
    pub async fn sync(&mut self) -> Result<(), ClientError> {
        let mut first_error: Option<StorageError> = None;

        for id in self.pending_deletes.clone() {
            match self.store.delete(&keys::conversation_log(&id)).await {
                Ok(()) => {
                    self.pending_deletes.remove(&id);
                }
                Err(e) => {
                    tracing::warn!(conversation = %id, error = %e, "failed to delete conversation log");
                    first_error.get_or_insert(e);
                }
            }
        }

        for id in self.dirty_logs.clone() {
            let Some(conversation) = self.get(&id) else {
                self.dirty_logs.remove(&id);
                continue;
            };
            let result = set_json(
                self.store.as_ref(),
                &keys::conversation_log(&id),
                &conversation.messages,
            )
            .await;
            match result {
                Ok(()) => {
                    self.dirty_logs.remove(&id);
                }
                Err(e) => {
                    tracing::warn!(conversation = %id, error = %e, "failed to persist conversation log");
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.index_dirty {
            match set_json(self.store.as_ref(), keys::CONVERSATIONS, &self.list()).await {
                Ok(()) => self.index_dirty = false,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to persist conversation index");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
