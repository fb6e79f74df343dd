//! Identification protocol (ident) responder.
//!
//! Many IRC servers query port 113 on a connecting host to learn the user
//! behind the TCP connection, and some refuse clients that give no answer.
//! This responder fakes that answer for exactly one query:
//!
//! ```text
//! Request:  6667, 54321\r\n
//! Response: 6667, 54321 : USERID : UNIX : <identity>\r\n
//! ```
//!
//! It binds once, answers at most one connection, and shuts itself down after
//! replying or when the overall timeout runs out, whichever comes first.
//! Failing to bind (port taken, no privilege) is logged and otherwise ignored.

pub mod reply;
pub mod server;

pub use server::{IdentConfig, IdentOutcome, IdentServer, IDENT_PORT};
