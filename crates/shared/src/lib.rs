//! Chatty shared library: typed ids, wire frames, and the text codec used by
//! both the crypto engine and the relay session.

pub mod api;
pub mod codec;
pub mod constants;
pub mod error;
pub mod ids;
