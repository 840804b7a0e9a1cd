//! Peer key cache and pending key request correlation.
//!
//! Key fetches are asynchronous round trips through the relay. Work that
//! needs a peer key while the fetch is in flight is queued against the peer,
//! and only the first lookup for a peer puts a request on the wire. When the
//! key arrives every queued action is handed back exactly once, in the order
//! it was queued.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chatty_shared::ids::UserId;

/// Outcome of registering interest in a peer's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No fetch was outstanding; the caller must send the request.
    Requested,
    /// A fetch is already in flight; the action joined its queue.
    Attached,
}

#[derive(Debug)]
struct PendingRequest<A> {
    requested_at: Instant,
    queued: Vec<A>,
}

/// Outstanding key fetches, at most one per peer.
#[derive(Debug)]
pub struct PendingRequests<A> {
    entries: HashMap<UserId, PendingRequest<A>>,
    timeout: Duration,
}

impl<A> PendingRequests<A> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
        }
    }

    /// Queue `action` (if any) behind the fetch for `peer`.
    pub fn register(&mut self, peer: UserId, action: Option<A>, now: Instant) -> Registration {
        match self.entries.get_mut(&peer) {
            Some(entry) => {
                entry.queued.extend(action);
                Registration::Attached
            }
            None => {
                self.entries.insert(
                    peer,
                    PendingRequest {
                        requested_at: now,
                        queued: action.into_iter().collect(),
                    },
                );
                Registration::Requested
            }
        }
    }

    /// Close the fetch for `peer` and return its queued actions.
    pub fn take(&mut self, peer: &UserId) -> Vec<A> {
        self.entries
            .remove(peer)
            .map(|entry| entry.queued)
            .unwrap_or_default()
    }

    pub fn contains(&self, peer: &UserId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove fetches older than the timeout, returning their queued actions.
    pub fn expire(&mut self, now: Instant) -> Vec<(UserId, Vec<A>)> {
        let timeout = self.timeout;
        let expired: Vec<UserId> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.requested_at) >= timeout)
            .map(|(peer, _)| *peer)
            .collect();

        expired
            .into_iter()
            .filter_map(|peer| self.entries.remove(&peer).map(|entry| (peer, entry.queued)))
            .collect()
    }

    /// Peers with a fetch in flight.
    pub fn outstanding(&self) -> Vec<UserId> {
        self.entries.keys().copied().collect()
    }

    /// Restart every timeout clock, after the requests were sent again.
    pub fn refresh(&mut self, now: Instant) {
        for entry in self.entries.values_mut() {
            entry.requested_at = now;
        }
    }
}

/// Result of asking the cache for a peer key.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<K, A> {
    /// The key is cached; run the action now.
    Ready { key: K, action: A },
    /// First lookup: the caller must send the fetch.
    Requested,
    /// A fetch is already in flight; the action was queued.
    Attached,
}

/// Cache of fetched peer keys in front of a [`PendingRequests`] table.
#[derive(Debug)]
pub struct PeerKeyCache<K, A> {
    keys: HashMap<UserId, K>,
    pending: PendingRequests<A>,
}

impl<K: Clone, A> PeerKeyCache<K, A> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            keys: HashMap::new(),
            pending: PendingRequests::new(timeout),
        }
    }

    pub fn cached(&self, peer: &UserId) -> Option<&K> {
        self.keys.get(peer)
    }

    pub fn resolve(&mut self, peer: UserId, action: A, now: Instant) -> Resolution<K, A> {
        if let Some(key) = self.keys.get(&peer) {
            return Resolution::Ready {
                key: key.clone(),
                action,
            };
        }
        match self.pending.register(peer, Some(action), now) {
            Registration::Requested => Resolution::Requested,
            Registration::Attached => Resolution::Attached,
        }
    }

    /// Cache `key` and return every action queued for `peer`.
    pub fn on_key_received(&mut self, peer: UserId, key: K) -> Vec<A> {
        self.keys.insert(peer, key);
        self.pending.take(&peer)
    }

    pub fn pending(&self) -> &PendingRequests<A> {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingRequests<A> {
        &mut self.pending
    }
}
