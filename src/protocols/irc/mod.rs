//! IRC-style line protocol plumbing.
//!
//! Inbound bytes flow through a fixed pipeline:
//!
//! ```text
//! socket -> encoding detection -> decode -> line framing -> LineHandler
//! ```
//!
//! ## Line Format
//!
//! ```text
//! :server 001 bob :Welcome\r\n     CRLF terminated
//! PING :server\n                   bare LF accepted
//! ```
//!
//! Blank lines are dropped. Outbound lines are written by [`RawLineWriter`]
//! with a CRLF appended. After a quiet period the reader pings the server
//! with `PING <unix-seconds>`.

pub mod encoding;
pub mod framer;
pub mod reader;
pub mod writer;

pub use encoding::{EncodingDetector, NoDetection, Utf8Detector};
pub use framer::{LineBuffer, MAX_LINE_LENGTH};
pub use reader::{ConnectionReader, HandlerError, LineHandler, ReaderConfig, ReaderHandle};
pub use writer::RawLineWriter;
