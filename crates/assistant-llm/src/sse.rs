//! Incremental Server-Sent-Events framing.
//!
//! The decoder knows nothing about provider payloads; it only turns raw bytes
//! into [`Frame`]s. Bytes are buffered until a full line is available, so a
//! chunk boundary may fall anywhere, including inside a multi-byte character
//! or between `\r` and `\n`.

/// Payload that marks the end of an OpenAI-style stream.
pub const DONE_TOKEN: &str = "[DONE]";

/// One dispatched event-stream unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// Value of the last `event:` field, if any.
    pub event: Option<String>,
    /// All `data:` values joined with `\n`.
    pub data: String,
    /// Value of the last `id:` field, if any.
    pub id: Option<String>,
    /// Set when the payload is the reserved completion token.
    pub terminal: bool,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    /// Appends a chunk and returns every frame completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let raw = &self.buf[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            start = end + 1;
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buf.drain(..start);
        frames
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    ///
    /// Called when the transport reports end of stream.
    pub fn finish(&mut self) -> Option<Frame> {
        let mut flushed = None;
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let raw = rest.strip_suffix(b"\r").unwrap_or(rest.as_slice());
            let line = String::from_utf8_lossy(raw).into_owned();
            flushed = self.process_line(&line);
        }
        flushed.or_else(|| self.dispatch())
    }

    /// Drops buffered bytes and any partially assembled frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.event = None;
        self.data_lines.clear();
        self.id = None;
    }

    /// Number of bytes waiting for a line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" if !value.contains('\0') => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Frame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        let terminal = data.trim() == DONE_TOKEN;
        Some(Frame {
            event,
            data,
            id,
            terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        ": keep-alive\n\n",
        "event: message_start\r\n",
        "id: 7\r\n",
        "data: {\"type\":\"message_start\"}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Blood pressure \u{2014} \u{1F489}\"}}]}\n\n",
        "data: line one\n",
        "data: line two\n",
        "retry: 3000\n\n",
        "event: ping\n\n",
        "data:no-space\n\n",
        "data: [DONE]\n\n",
    );

    fn parse_whole(input: &[u8]) -> Vec<Frame> {
        SseDecoder::default().feed(input)
    }

    fn parse_chunks(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut decoder = SseDecoder::default();
        chunks.iter().flat_map(|c| decoder.feed(c)).collect()
    }

    #[test]
    fn sse_decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"event: content_block_delta\ndata: {\"delta\":{\"text\":\"hel";
        let part2 = b"lo\"}}\n\n";
        assert!(decoder.feed(part1).is_empty());
        let frames = decoder.feed(part2);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(frames[0].data, "{\"delta\":{\"text\":\"hello\"}}");
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn parses_fields_comments_and_terminal_token() {
        let frames = parse_whole(SAMPLE.as_bytes());
        assert_eq!(frames.len(), 5);

        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert!(frames[1].data.contains("\u{1F489}"));
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[2].data, "line one\nline two");
        assert_eq!(frames[3].data, "no-space");
        assert!(frames[4].terminal);
        assert!(frames[..4].iter().all(|f| !f.terminal));
    }

    #[test]
    fn comment_only_and_field_only_blocks_emit_nothing() {
        assert!(parse_whole(b": hello\n\nevent: ping\n\nid: 3\n\n\n\n").is_empty());
        assert!(parse_whole(b"").is_empty());
    }

    #[test]
    fn frame_sequence_is_independent_of_chunking() {
        let bytes = SAMPLE.as_bytes();
        let expected = parse_whole(bytes);
        for n in 1..=50usize {
            let size = bytes.len().div_ceil(n).max(1);
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(parse_chunks(&chunks), expected, "chunk size {size}");
        }
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(parse_chunks(&[a, b]), expected, "split at {split}");
        }
        let single_bytes: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(parse_chunks(&single_bytes), expected);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: stale\ndata: par").is_empty());
        decoder.reset();
        let frames = decoder.feed(b"data: fresh\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "fresh");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: tail\ndata: end").is_empty());
        let frame = decoder.finish().expect("flushed frame");
        assert_eq!(frame.data, "tail\nend");
        assert_eq!(decoder.finish(), None);
    }
}
