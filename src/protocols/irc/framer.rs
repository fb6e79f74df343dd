//! Line framing for the inbound text stream.
//!
//! Decoded text arrives in arbitrary chunks. Each chunk is joined with the
//! partial line left over from the previous read, split on `\r?\n`, and the
//! trailing partial line (if any) is carried forward again.

/// Soft maximum length of a protocol line in bytes, terminator included.
///
/// Used for sizing read buffers only; the framer does not enforce it.
pub const MAX_LINE_LENGTH: usize = 512;

/// Partial line carried between consecutive reads of one session.
///
/// Never contains `\n`. Empty whenever the last chunk ended on a line boundary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineBuffer {
    remainder: String,
}

impl LineBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The partial line waiting for its terminator.
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// Check if no partial line is pending.
    pub fn is_empty(&self) -> bool {
        self.remainder.is_empty()
    }

    /// Frame a decoded chunk against the carried remainder.
    ///
    /// Returns the complete, non-blank lines in stream order.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        let carried = std::mem::take(&mut self.remainder);
        let (lines, remainder) = frame(&carried, chunk);
        self.remainder = remainder;
        lines
    }
}

/// Split `remainder + chunk` into complete lines and a new remainder.
///
/// A line ends at `\n`, optionally preceded by `\r`. A lone `\r` is kept as
/// part of the line. Lines that are blank after trimming are dropped.
pub fn frame(remainder: &str, chunk: &str) -> (Vec<String>, String) {
    let mut text = String::with_capacity(remainder.len() + chunk.len());
    text.push_str(remainder);
    text.push_str(chunk);

    // Everything after the last LF is incomplete
    let (complete, rest) = match text.rfind('\n') {
        Some(pos) => (&text[..pos], &text[pos + 1..]),
        None => return (Vec::new(), text),
    };

    let lines = complete
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(String::from)
        .collect();

    (lines, rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&str]) -> (Vec<String>, String) {
        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(buffer.push(chunk));
        }
        (lines, buffer.remainder().to_string())
    }

    #[test]
    fn test_mixed_terminators() {
        let (lines, rest) = frame("", "NICK bob\r\nJOIN #x\n");
        assert_eq!(lines, vec!["NICK bob", "JOIN #x"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_line_split_across_chunks() {
        let (lines, rest) = feed(&["NICK b", "ob\r\n"]);
        assert_eq!(lines, vec!["NICK bob"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_partial_only() {
        let (lines, rest) = frame("", ":server 001 bob :Wel");
        assert!(lines.is_empty());
        assert_eq!(rest, ":server 001 bob :Wel");
    }

    #[test]
    fn test_blank_lines_dropped() {
        let (lines, rest) = frame("", "\r\n\n   \r\nPING :x\n\t\n");
        assert_eq!(lines, vec!["PING :x"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_lone_cr_is_not_a_terminator() {
        let (lines, rest) = frame("", "a\rb\nc\r");
        assert_eq!(lines, vec!["a\rb"]);
        assert_eq!(rest, "c\r");
    }

    #[test]
    fn test_crlf_split_between_chunks() {
        let (lines, rest) = feed(&["PRIVMSG #x :hi\r", "\nPING :y\r\n"]);
        assert_eq!(lines, vec!["PRIVMSG #x :hi", "PING :y"]);
        assert_eq!(rest, "");
    }

    #[test]
    fn test_dispatched_line_is_not_trimmed() {
        let (lines, _) = frame("", "  PRIVMSG #x : spaced  \n");
        assert_eq!(lines, vec!["  PRIVMSG #x : spaced  "]);
    }

    #[test]
    fn test_remainder_carries_into_next_chunk() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push("PRIV").is_empty());
        assert_eq!(buffer.remainder(), "PRIV");
        assert!(buffer.push("MSG #x").is_empty());
        assert_eq!(buffer.push(" :hi\nNEXT"), vec!["PRIVMSG #x :hi"]);
        assert_eq!(buffer.remainder(), "NEXT");
        assert!(buffer.push("").is_empty());
        assert_eq!(buffer.remainder(), "NEXT");
    }

    #[test]
    fn test_split_offset_does_not_change_output() {
        let input = ":a!b@c PRIVMSG #chan :hello\r\n\r\nPING :123\nNOTICE x :y z\r\n:tail";
        let (expected, expected_rest) = feed(&[input]);
        assert_eq!(expected.len(), 3);

        for at in 0..=input.len() {
            let (head, tail) = input.split_at(at);
            let (lines, rest) = feed(&[head, tail]);
            assert_eq!(lines, expected, "split at {at}");
            assert_eq!(rest, expected_rest, "split at {at}");
        }
    }

    #[test]
    fn test_lines_and_remainder_reassemble_input() {
        let chunks = ["JOIN #a\r\nPRIV", "MSG #a :x\n", "QUIT :bye"];
        let (lines, rest) = feed(&chunks);

        let mut rebuilt = lines.join("\n");
        rebuilt.push('\n');
        rebuilt.push_str(&rest);

        let normalized = chunks.concat().replace("\r\n", "\n");
        assert_eq!(rebuilt, normalized);
        assert!(!rest.contains('\n'));
    }
}
