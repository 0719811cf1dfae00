//! Server-Sent Events decoding over raw body chunks.
//!
//! Lines are split on bytes and only decoded once complete, so a multi-byte
//! character cut across two network chunks survives intact.

/// One dispatched event. Multiple `data:` lines are joined with `\n`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one body chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut ready = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.pending[start..end]).into_owned();
            if let Some(event) = self.line(line.strip_suffix('\r').unwrap_or(&line)) {
                ready.push(event);
            }
            start = end + 1;
        }
        self.pending.drain(..start);
        ready
    }

    /// Dispatch whatever is buffered once the body has ended.
    pub fn finish(mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned();
            self.line(line.strip_suffix('\r').unwrap_or(&line));
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        let (field, value) = match line.split_once(':') {
            Some(("", _)) => return None,
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() && self.id.is_none() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_lines_are_joined_and_comments_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keepalive\nevent: response.created\ndata: a\ndata: b\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("response.created".into()),
                data: "a\nb".into(),
                id: None,
            }]
        );
    }

    #[test]
    fn events_split_across_chunks_and_crlf_are_reassembled() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: response.output_text.delta\r\nda").is_empty());
        assert!(decoder.feed(b"ta: {\"delta\":\"hi\"}\r\n").is_empty());
        let events = decoder.feed(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"delta\":\"hi\"}");
    }

    #[test]
    fn multibyte_characters_survive_chunk_boundaries() {
        let body = "data: caf\u{e9} \u{1f4ca}\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        let mut events = decoder.feed(&body[..10]);
        events.extend(decoder.feed(&body[10..]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "caf\u{e9} \u{1f4ca}");
    }

    #[test]
    fn finish_dispatches_an_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"id: 7\ndata: {\"type\":\"response.completed\"}").is_empty());
        let trailing = decoder.finish().expect("trailing event");
        assert_eq!(trailing.id.as_deref(), Some("7"));
        assert_eq!(trailing.data, "{\"type\":\"response.completed\"}");
    }
}
