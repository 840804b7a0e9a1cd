//! Relay wire protocol.

pub mod ws;
