//! FICS client: transport, framing, sanitizing, decoding and the session
//! state machine.
pub mod codec;
pub mod connection;
pub mod message;
pub mod sanitize;
pub mod session;
