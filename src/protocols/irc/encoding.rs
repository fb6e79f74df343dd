//! Character encoding selection and decoding for inbound chunks.
//!
//! Each raw chunk is offered to an [`EncodingDetector`]. A confident answer
//! names the encoding by WHATWG label (`"UTF-8"`, `"windows-1252"`,
//! `"koi8-r"`, ...); no answer, or a label `encoding_rs` does not know, falls
//! back to the session default.

use encoding_rs::{CoderResult, Decoder, Encoding};
use tracing::debug;

/// Guesses the text encoding of a raw chunk.
///
/// Must be side-effect free and must not block.
pub trait EncodingDetector: Send {
    /// Return an encoding label, or `None` when unsure.
    fn detect(&self, raw: &[u8]) -> Option<String>;
}

impl<F> EncodingDetector for F
where
    F: Fn(&[u8]) -> Option<String> + Send,
{
    fn detect(&self, raw: &[u8]) -> Option<String> {
        self(raw)
    }
}

/// Never confident; every chunk uses the session default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDetection;

impl EncodingDetector for NoDetection {
    fn detect(&self, _raw: &[u8]) -> Option<String> {
        None
    }
}

/// Answers `UTF-8` for chunks that are valid UTF-8.
///
/// A chunk may start or end in the middle of a multi-byte sequence because
/// reads are fixed-size, so up to three leading continuation bytes and a
/// truncated trailing sequence are tolerated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Detector;

impl EncodingDetector for Utf8Detector {
    fn detect(&self, raw: &[u8]) -> Option<String> {
        let skip = raw
            .iter()
            .take(3)
            .take_while(|b| (**b & 0xC0) == 0x80)
            .count();

        match std::str::from_utf8(&raw[skip..]) {
            Ok(_) => Some("UTF-8".to_string()),
            Err(e) if e.error_len().is_none() => Some("UTF-8".to_string()),
            Err(_) => None,
        }
    }
}

/// Look up an encoding by label.
pub fn resolve(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.as_bytes())
}

/// Streaming decoder for one session.
///
/// The underlying decoder is kept while consecutive chunks select the same
/// encoding, so a character split across two reads decodes intact. Selecting
/// a different encoding flushes the old decoder and starts a fresh one.
pub struct ChunkDecoder {
    default: &'static Encoding,
    decoder: Option<Decoder>,
}

impl ChunkDecoder {
    /// Create a decoder falling back to `default`.
    pub fn new(default: &'static Encoding) -> Self {
        Self {
            default,
            decoder: None,
        }
    }

    /// Pick the encoding for a chunk given the detector's answer.
    pub fn select(&self, detected: Option<&str>) -> &'static Encoding {
        detected.and_then(resolve).unwrap_or(self.default)
    }

    /// Decode a raw chunk. Malformed input becomes U+FFFD.
    ///
    /// On an encoding switch, bytes still pending in the previous decoder
    /// are flushed as U+FFFD ahead of the new chunk's text.
    pub fn decode(&mut self, encoding: &'static Encoding, raw: &[u8]) -> String {
        let mut text = String::new();
        let decoder = match self.decoder.take() {
            Some(decoder) if decoder.encoding() == encoding => decoder,
            Some(mut previous) => {
                decode_into(&mut previous, &[], true, &mut text);
                if !text.is_empty() {
                    debug!(
                        from = previous.encoding().name(),
                        to = encoding.name(),
                        "Flushed incomplete sequence on encoding switch"
                    );
                }
                encoding.new_decoder_without_bom_handling()
            }
            None => encoding.new_decoder_without_bom_handling(),
        };
        let decoder = self.decoder.insert(decoder);

        decode_into(decoder, raw, false, &mut text);
        text
    }
}

fn decode_into(decoder: &mut Decoder, raw: &[u8], last: bool, text: &mut String) {
    let capacity = decoder
        .max_utf8_buffer_length(raw.len())
        .unwrap_or(raw.len() * 3 + 16);
    text.reserve(capacity);
    let mut consumed = 0;

    loop {
        let (result, read, _replaced) = decoder.decode_to_string(&raw[consumed..], text, last);
        consumed += read;
        match result {
            CoderResult::InputEmpty => break,
            CoderResult::OutputFull => text.reserve(raw.len() - consumed + 16),
        }
    }
}

impl std::fmt::Debug for ChunkDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDecoder")
            .field("default", &self.default.name())
            .field("active", &self.decoder.as_ref().map(|d| d.encoding().name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{UTF_8, WINDOWS_1252};

    #[test]
    fn test_utf8_detector() {
        let detector = Utf8Detector;
        assert_eq!(detector.detect(b"PING :abc\r\n").as_deref(), Some("UTF-8"));
        assert_eq!(detector.detect("caf\u{e9}".as_bytes()).as_deref(), Some("UTF-8"));
        // Latin-1 e-acute followed by ASCII is not UTF-8
        assert_eq!(detector.detect(b"caf\xe9 ok"), None);
    }

    #[test]
    fn test_utf8_detector_tolerates_chunk_edges() {
        let detector = Utf8Detector;
        assert_eq!(detector.detect(b"caf\xc3").as_deref(), Some("UTF-8"));
        assert_eq!(detector.detect(b"\xa9 ok\r\n").as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_closure_detector() {
        let detector = |raw: &[u8]| raw.starts_with(b"\x1b").then(|| "iso-2022-jp".to_string());
        assert_eq!(detector.detect(b"plain"), None);
        assert_eq!(detector.detect(b"\x1b$B").as_deref(), Some("iso-2022-jp"));
    }

    #[test]
    fn test_select_falls_back_to_default() {
        let decoder = ChunkDecoder::new(WINDOWS_1252);
        assert_eq!(decoder.select(None), WINDOWS_1252);
        assert_eq!(decoder.select(Some("no-such-charset")), WINDOWS_1252);
        assert_eq!(decoder.select(Some("utf8")), UTF_8);
    }

    #[test]
    fn test_decode_with_default() {
        let mut decoder = ChunkDecoder::new(WINDOWS_1252);
        let encoding = decoder.select(NoDetection.detect(b"caf\xe9\r\n").as_deref());
        assert_eq!(decoder.decode(encoding, b"caf\xe9\r\n"), "caf\u{e9}\r\n");
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut decoder = ChunkDecoder::new(UTF_8);
        let first = decoder.decode(UTF_8, b"caf\xc3");
        let second = decoder.decode(UTF_8, b"\xa9\r\n");
        assert_eq!(format!("{first}{second}"), "caf\u{e9}\r\n");
    }

    #[test]
    fn test_switching_encoding_restarts_decoder() {
        let mut decoder = ChunkDecoder::new(UTF_8);
        assert_eq!(decoder.decode(UTF_8, b"ok "), "ok ");
        assert_eq!(decoder.decode(WINDOWS_1252, b"\xe9"), "\u{e9}");
        assert_eq!(decoder.decode(UTF_8, "\u{e9}".as_bytes()), "\u{e9}");
    }

    #[test]
    fn test_switch_flushes_pending_bytes() {
        let mut decoder = ChunkDecoder::new(UTF_8);
        assert_eq!(decoder.decode(UTF_8, b"ab\xc3"), "ab");
        // The dangling lead byte surfaces instead of vanishing
        assert_eq!(decoder.decode(WINDOWS_1252, b"\xe9"), "\u{FFFD}\u{e9}");
    }
}
