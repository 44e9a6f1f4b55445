/// Incremental byte-to-line decoder.
///
/// Bytes are buffered until a `\n` arrives, so a line (or a multi-byte UTF-8
/// character) split across any number of chunks is reassembled before it is
/// decoded. After every [`LineDecoder::decode`] call `pending` holds exactly the
/// bytes of the unterminated trailing line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every line it completed, in arrival order.
    ///
    /// Line terminators (`\n` and a preceding `\r`) are stripped. Blank lines
    /// are returned as empty strings because block-oriented parsers need them
    /// as separators.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::stream::LineDecoder;
    ///
    /// let mut decoder = LineDecoder::new();
    /// assert!(decoder.decode(b"data: {\"a\"").is_empty());
    /// assert_eq!(decoder.decode(b":1}\n\ndata"), vec!["data: {\"a\":1}", ""]);
    /// assert_eq!(decoder.flush().as_deref(), Some("data"));
    /// ```
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        let mut rest = chunk;
        while let Some(pos) = find_newline(rest) {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            if self.pending.is_empty() {
                push_line(&mut lines, head.to_vec());
            } else {
                let mut line = std::mem::take(&mut self.pending);
                line.extend_from_slice(head);
                push_line(&mut lines, line);
            }
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Emits the buffered trailing content as a final line, even though no
    /// terminator arrived. Call once when the byte source closes.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let mut lines = Vec::with_capacity(1);
        push_line(&mut lines, std::mem::take(&mut self.pending));
        lines.pop()
    }

    /// Drops any buffered partial line without emitting it.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|b| *b == b'\n')
}

fn push_line(lines: &mut Vec<String>, mut line: Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(text) => lines.push(text),
        Err(err) => {
            tracing::warn!(error = %err, "skipping stream line with invalid UTF-8");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_without_newline_is_buffered() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(b"data: par").is_empty());
        assert!(decoder.decode(b"tial").is_empty());
        assert_eq!(decoder.pending_len(), "data: partial".len());
        assert_eq!(decoder.decode(b"\n"), vec!["data: partial"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn many_lines_in_one_chunk_keep_order() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.decode(b"one\ntwo\r\n\nthree");
        assert_eq!(lines, vec!["one", "two", ""]);
        assert_eq!(decoder.flush().as_deref(), Some("three"));
        assert!(decoder.flush().is_none());
    }

    #[test]
    fn empty_chunk_leaves_pending_untouched() {
        let mut decoder = LineDecoder::new();
        decoder.decode(b"abc");
        assert!(decoder.decode(b"").is_empty());
        assert_eq!(decoder.decode(b"def\n"), vec!["abcdef"]);
    }

    #[test]
    fn multi_byte_characters_survive_any_split() {
        let text = "data: 你好，世界\n";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = LineDecoder::new();
            let mut lines = decoder.decode(&bytes[..split]);
            lines.extend(decoder.decode(&bytes[split..]));
            assert_eq!(lines, vec!["data: 你好，世界"], "split at {split}");
        }
    }

    #[test]
    fn crlf_split_between_chunks_is_stripped() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(b"line\r").is_empty());
        assert_eq!(decoder.decode(b"\n"), vec!["line"]);
    }

    #[test]
    fn invalid_utf8_line_is_skipped() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.decode(b"ok\n\xff\xfe\nnext\n");
        assert_eq!(lines, vec!["ok", "next"]);
    }

    #[test]
    fn reset_discards_partial_line() {
        let mut decoder = LineDecoder::new();
        decoder.decode(b"dangling");
        decoder.reset();
        assert!(decoder.flush().is_none());
    }
}
