//! chatty-client: the relay session, conversation store, and transport for
//! the Chatty secure messenger.

pub mod config;
pub mod conversations;
pub mod error;
pub mod session;
pub mod transport;
