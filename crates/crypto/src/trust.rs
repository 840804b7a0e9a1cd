//! Trust-on-first-use table of peer signing keys.
//!
//! A peer's signing key enters the table only after the user has compared
//! its fingerprint out of band and accepted it. Later announcements for a
//! trusted peer never replace the stored key; [`TrustStore::remove`] is the
//! only way to re-verify a peer.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chatty_shared::ids::UserId;

use crate::error::CryptoError;
use crate::fingerprint::Fingerprint;
use crate::identity::SignPublicKey;
use crate::storage::{get_json, keys, set_json, KeyValueStore};

/// A signing key announced for an untrusted peer, awaiting a user decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub peer: UserId,
    pub candidate: SignPublicKey,
    pub fingerprint: Fingerprint,
}

pub struct TrustStore {
    keys: HashMap<UserId, SignPublicKey>,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("trusted", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl TrustStore {
    /// Load the persisted table. Entries that no longer decode are skipped,
    /// so the affected peers go through verification again.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, CryptoError> {
        let snapshot: HashMap<UserId, String> = get_json(store.as_ref(), keys::TRUSTED_SIGN_KEYS)
            .await?
            .unwrap_or_default();

        let mut keys = HashMap::with_capacity(snapshot.len());
        for (peer, encoded) in snapshot {
            match SignPublicKey::from_base64(&encoded) {
                Ok(key) => {
                    keys.insert(peer, key);
                }
                Err(e) => tracing::warn!(peer = %peer, error = %e, "dropping unreadable trusted key"),
            }
        }
        tracing::debug!(count = keys.len(), "loaded trusted signing keys");

        Ok(Self { keys, store })
    }

    pub fn is_trusted(&self, peer: &UserId) -> bool {
        self.keys.contains_key(peer)
    }

    pub fn trusted_key(&self, peer: &UserId) -> Option<&SignPublicKey> {
        self.keys.get(peer)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Start verification of an announced key.
    ///
    /// Returns `None` when the peer is already trusted: the announcement is
    /// ignored and the stored key stays in place.
    pub fn begin_verification(
        &self,
        peer: UserId,
        candidate: SignPublicKey,
    ) -> Option<VerificationRequest> {
        if self.is_trusted(&peer) {
            tracing::debug!(peer = %peer, "ignoring signing key announcement for trusted peer");
            return None;
        }
        let fingerprint = candidate.fingerprint();
        Some(VerificationRequest {
            peer,
            candidate,
            fingerprint,
        })
    }

    /// Trust the candidate key. The snapshot is persisted before the
    /// in-memory table changes, so a storage failure leaves both untouched.
    pub async fn accept_verification(
        &mut self,
        request: &VerificationRequest,
    ) -> Result<(), CryptoError> {
        if self.is_trusted(&request.peer) {
            return Err(CryptoError::AlreadyTrusted { peer: request.peer });
        }

        let mut snapshot = self.snapshot();
        snapshot.insert(request.peer.to_string(), request.candidate.to_base64());
        set_json(self.store.as_ref(), keys::TRUSTED_SIGN_KEYS, &snapshot).await?;

        self.keys.insert(request.peer, request.candidate.clone());
        tracing::info!(peer = %request.peer, "signing key trusted");
        Ok(())
    }

    /// Decline the candidate key. Nothing is recorded.
    pub fn reject_verification(&self, request: &VerificationRequest) {
        tracing::info!(peer = %request.peer, "signing key rejected");
    }

    /// Forget a peer's trusted key so its next announcement is verified again.
    /// Returns whether a key was removed.
    pub async fn remove(&mut self, peer: &UserId) -> Result<bool, CryptoError> {
        if !self.is_trusted(peer) {
            return Ok(false);
        }

        let mut snapshot = self.snapshot();
        snapshot.remove(&peer.to_string());
        set_json(self.store.as_ref(), keys::TRUSTED_SIGN_KEYS, &snapshot).await?;

        self.keys.remove(peer);
        tracing::info!(peer = %peer, "trusted signing key removed");
        Ok(true)
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        self.keys
            .iter()
            .map(|(peer, key)| (peer.to_string(), key.to_base64()))
            .collect()
    }
}
