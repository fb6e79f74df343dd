//! Ident query/reply formatting.

use bytes::BytesMut;

const REPLY_SUFFIX: &str = " : USERID : UNIX : ";

/// Position of the first line terminator, either `\r` or `\n`.
///
/// A lone CR ends the query; the peer need not follow it with LF.
pub fn line_end(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\r' || b == b'\n')
}

/// Build the reply for a query: `<query> : USERID : UNIX : <identity>\r\n`.
///
/// The query bytes are echoed back verbatim, whatever they contain.
pub fn format_reply(query: &[u8], identity: &str) -> BytesMut {
    let mut reply = BytesMut::with_capacity(query.len() + REPLY_SUFFIX.len() + identity.len() + 2);
    reply.extend_from_slice(query);
    reply.extend_from_slice(REPLY_SUFFIX.as_bytes());
    reply.extend_from_slice(identity.as_bytes());
    reply.extend_from_slice(b"\r\n");
    reply
}
