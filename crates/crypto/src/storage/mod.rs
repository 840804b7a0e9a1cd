//! Key-value persistence consumed by the identity, trust, and conversation
//! stores.
//!
//! The core never touches a database directly; it reads and writes whole
//! string values through [`KeyValueStore`]. Two backends ship with the crate:
//! [`memory::MemoryStore`] for tests and ephemeral sessions, and
//! [`sqlite::SqliteStore`] for on-disk persistence.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Well-known keys under which the core persists its state.
pub mod keys {
    /// Local user identifier.
    pub const USER_ID: &str = "uid";
    /// RSA private key (PKCS#8 DER, base64).
    pub const ENCRYPT_KEY: &str = "encryptKey";
    /// P-521 private scalar (base64).
    pub const SIGN_KEY: &str = "signKey";
    /// Trusted signing key table (JSON object, user id → base64 key).
    pub const TRUSTED_SIGN_KEYS: &str = "signKeys";
    /// Conversation index (JSON array).
    pub const CONVERSATIONS: &str = "chats";
    /// Prefix of per-conversation message logs.
    pub const CONVERSATION_LOG_PREFIX: &str = "chatData:";

    /// Key of the message log for one conversation.
    pub fn conversation_log(conversation_id: &impl std::fmt::Display) -> String {
        format!("{CONVERSATION_LOG_PREFIX}{conversation_id}")
    }
}

/// Errors from a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend failed to read or write.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value exists but cannot be interpreted.
    #[error("corrupt value under {key}: {detail}")]
    Corrupt { key: String, detail: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Asynchronous string key-value store.
///
/// Values are whole snapshots; writers always replace the full value.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and deserialize a JSON value, mapping malformed content to
/// [`StorageError::Corrupt`].
pub async fn get_json<T: serde::de::DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Serialize a value as JSON and write it under `key`.
pub async fn set_json<T: serde::Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        detail: e.to_string(),
    })?;
    store.set(key, &raw).await
}
