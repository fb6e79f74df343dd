//! ircline: connection core for IRC-style line protocol clients.
//!
//! Features:
//! - Line framing across arbitrary read boundaries (CRLF or bare LF)
//! - Per-chunk encoding detection with a configurable fallback
//! - Idle keepalive PINGs and a single, race-free teardown path
//! - One-shot ident (port 113) responder
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod connection;
pub mod protocols;

pub use connection::{ReaderState, SessionControl};
