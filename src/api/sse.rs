/// Incremental Server-Sent-Events decoder.
///
/// Network chunks respect neither line boundaries nor UTF-8 character
/// boundaries, so the decoder buffers both the trailing partial line and any
/// trailing incomplete byte sequence between `feed` calls, and only emits
/// complete lines: `data:` prefixes are stripped, a literal `[DONE]`
/// terminates the stream, `:` comment lines and blank lines are skipped, and
/// every other non-empty line is handed to the caller as one event payload.
pub struct SseDecoder {
    pending: String,
    /// Bytes that do not yet form a complete UTF-8 character.
    tail: Vec<u8>,
    done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// One event payload, expected to be a JSON chunk object.
    Data(String),
    /// The `[DONE]` sentinel; nothing follows.
    Done,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            pending: String::new(),
            tail: Vec::new(),
            done: false,
        }
    }

    /// Feeds raw bytes from the response body, returning the events completed
    /// by this chunk. Events after `[DONE]` are discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.absorb(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(event) = Self::decode_line(line.trim_end_matches(['\n', '\r'])) {
                let is_done = event == SseEvent::Done;
                events.push(event);
                if is_done {
                    self.done = true;
                    break;
                }
            }
        }
        events
    }

    /// Flushes a trailing line the stream ended without terminating.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.done {
            return None;
        }
        if !self.tail.is_empty() {
            // The stream ended mid-character; nothing more will arrive.
            let tail = std::mem::take(&mut self.tail);
            self.pending.push_str(&String::from_utf8_lossy(&tail));
        }
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Self::decode_line(line.trim_end_matches('\r'))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Appends the chunk to the line buffer, decoding the longest valid UTF-8
    /// prefix and carrying an incomplete trailing character to the next call.
    /// Genuinely invalid sequences decode to U+FFFD.
    fn absorb(&mut self, bytes: &[u8]) {
        self.tail.extend_from_slice(bytes);
        loop {
            match std::str::from_utf8(&self.tail) {
                Ok(text) => {
                    self.pending.push_str(text);
                    self.tail.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.pending
                        .push_str(&String::from_utf8_lossy(&self.tail[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            self.pending.push('\u{FFFD}');
                            self.tail.drain(..valid + invalid);
                        }
                        None => {
                            self.tail.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn decode_line(line: &str) -> Option<SseEvent> {
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        // At most one leading space follows the field name.
        let payload = line
            .strip_prefix("data:")
            .map_or(line, |rest| rest.strip_prefix(' ').unwrap_or(rest));
        if payload.is_empty() {
            return None;
        }
        if payload == "[DONE]" {
            return Some(SseEvent::Done);
        }
        Some(SseEvent::Data(payload.to_string()))
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(payload: &str) -> SseEvent {
        SseEvent::Data(payload.to_string())
    }

    #[test]
    fn decodes_complete_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n");
        assert_eq!(events, vec![data("{\"a\":1}"), data("{\"b\":2}")]);
    }

    #[test]
    fn buffers_partial_lines_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"content\":").is_empty());
        assert!(decoder.feed(b" \"hel").is_empty());
        let events = decoder.feed(b"lo\"}\n");
        assert_eq!(events, vec![data("{\"content\": \"hello\"}")]);
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\n\ndata: {\"x\":1}\n");
        assert_eq!(events, vec![data("{\"x\":1}")]);
    }

    #[test]
    fn done_sentinel_terminates() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"x\":1}\ndata: [DONE]\ndata: {\"y\":2}\n");
        assert_eq!(events, vec![data("{\"x\":1}"), SseEvent::Done]);
        assert!(decoder.is_done());
        assert!(decoder.feed(b"data: {\"z\":3}\n").is_empty());
    }

    #[test]
    fn bare_json_lines_pass_through() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"{\"no_prefix\":true}\n");
        assert_eq!(events, vec![data("{\"no_prefix\":true}")]);
    }

    #[test]
    fn handles_crlf_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\r\ndata: [DONE]\r\n");
        assert_eq!(events, vec![data("{\"a\":1}"), SseEvent::Done]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"tail\":1}").is_empty());
        assert_eq!(decoder.finish(), Some(data("{\"tail\":1}")));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn strips_at_most_one_leading_space() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data:  padded\ndata:unpadded\n");
        assert_eq!(events, vec![data(" padded"), data("unpadded")]);
    }

    // Any partition of the byte stream yields the same event sequence, even
    // when the cut lands inside a multi-byte character.
    #[test]
    fn multibyte_characters_survive_chunk_splits() {
        let raw = "data: {\"v\":\"€ 日本語 🙂\"}\n".as_bytes();
        let expected = vec![data("{\"v\":\"€ 日本語 🙂\"}")];
        for split in 1..raw.len() {
            let mut decoder = SseDecoder::new();
            let mut events = decoder.feed(&raw[..split]);
            events.extend(decoder.feed(&raw[split..]));
            assert_eq!(events, expected, "split at {}", split);
        }
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\xffb\n");
        assert_eq!(events, vec![data("a\u{FFFD}b")]);
    }

    #[test]
    fn finish_flushes_incomplete_trailing_character() {
        let mut decoder = SseDecoder::new();
        // "é" is two bytes; only the first arrives before the stream dies.
        assert!(decoder.feed(b"data: caf\xc3").is_empty());
        assert_eq!(decoder.finish(), Some(data("caf\u{FFFD}")));
    }

    // Any partition of the byte stream yields the same event sequence.
    #[test]
    fn chunk_boundaries_do_not_change_events() {
        let raw = b"data: {\"a\":1}\n: comment\ndata: {\"b\":2}\n\ndata: [DONE]\n";
        let expected = {
            let mut decoder = SseDecoder::new();
            decoder.feed(raw)
        };
        for split in 1..raw.len() {
            let mut decoder = SseDecoder::new();
            let mut events = decoder.feed(&raw[..split]);
            events.extend(decoder.feed(&raw[split..]));
            assert_eq!(events, expected, "split at {}", split);
        }
    }
}
