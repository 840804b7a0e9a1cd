//! chatty-crypto: identities, trust, and the hybrid message protocol for Chatty.
//!
//! Provides RSA-OAEP encryption and ECDSA P-521 signing identities, safety
//! number fingerprints, the trust-on-first-use signing key table, the
//! encrypt-and-sign / verify-and-decrypt message engine over AES-256-GCM,
//! the peer key cache with pending request correlation, and the key-value
//! storage interface (in-memory and SQLite backends).

pub mod error;
pub mod storage;
pub mod identity;
pub mod fingerprint;
pub mod trust;
pub mod symmetric;
pub mod message;
pub mod peer_keys;
