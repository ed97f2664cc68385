//! Decoding of live board output.
//!
//! REPL output arrives in arbitrary chunks that can split multi-byte UTF-8
//! sequences, and it is sprinkled with the control bytes the raw-REPL
//! protocol itself uses. [`StreamDecoder`] reassembles text across chunk
//! boundaries; [`printable`] makes a decoded string safe to print to a
//! terminal.

/// Incremental UTF-8 decoder for a byte stream.
///
/// Invalid sequences become U+FFFD and decoding continues; an incomplete
/// sequence at the end of the input is held back until the next push.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and get back everything decodable so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                },
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or(""));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        },
                        None => {
                            // Incomplete tail: keep it for the next chunk.
                            self.pending.drain(..valid);
                            break;
                        },
                    }
                },
            }
        }
        out
    }

    /// Number of bytes held back waiting for the rest of a sequence.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Filter decoded text down to what a terminal can safely display.
///
/// `\r\n` and bare `\r` both become `\n`; tabs and newlines pass through;
/// every other control character (including raw-REPL markers like Ctrl-D)
/// is dropped.
pub fn printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            },
            '\n' | '\t' => out.push(ch),
            _ if ch.is_control() => {},
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"hello"), "hello");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_reassembles_split_sequences() {
        // '你' is 0xE4 0xBD 0xA0; split it across two chunks.
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&[0xE4, 0xBD]), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.push(&[0xA0, b'!']), "你!");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes_and_continues() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(&[0xFF, b'A', 0xFE, b'B']), "\u{FFFD}A\u{FFFD}B");
    }

    #[test]
    fn test_decoder_mixed_text_before_incomplete_tail() {
        let mut decoder = StreamDecoder::new();
        let mut input = b"ok ".to_vec();
        input.extend_from_slice(&[0xE4, 0xBD]);
        assert_eq!(decoder.push(&input), "ok ");
        assert_eq!(decoder.pending_len(), 2);
    }

    #[test]
    fn test_printable_normalizes_line_endings() {
        assert_eq!(printable("a\r\nb\rc\nd"), "a\nb\nc\nd");
    }

    #[test]
    fn test_printable_drops_repl_control_bytes() {
        assert_eq!(printable("x\u{4}y\u{1}z\u{7}"), "xyz");
        assert_eq!(printable("keep\ttabs\nand lines"), "keep\ttabs\nand lines");
    }
}
