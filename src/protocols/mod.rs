//! Protocol implementations.
//!
//! - `irc`: inbound line framing and the connection read loop
//! - `ident`: single-shot identification protocol responder

pub mod ident;
pub mod irc;
