//! Incremental server-sent-events decoder.
//!
//! Both the HTTP transport (SSE bodies on POST responses) and the SSE
//! transport (long-lived GET stream) feed byte chunks through this decoder.
//! Events are delimited by blank lines; `data:` lines accumulate, multi-line
//! data joins with `\n` per the SSE specification.

/// A decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (`event:` field), if present
    pub event: Option<String>,
    /// Joined data payload
    pub data: String,
    /// Event id (`id:` field), if present
    pub id: Option<String>,
}

impl SseEvent {
    /// True for the `[DONE]` sentinel some streaming APIs emit.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Stateful SSE decoder fed with arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and drain any complete events.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        // Events are separated by a blank line; tolerate \r\n line endings.
        loop {
            let Some(boundary) = find_event_boundary(&self.buffer) else {
                break;
            };
            let raw_event = self.buffer[..boundary.start].to_string();
            self.buffer.drain(..boundary.end);
            if let Some(event) = parse_event(&raw_event) {
                events.push(event);
            }
        }
        events
    }

    /// Drain a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let remainder = std::mem::take(&mut self.buffer);
        parse_event(&remainder)
    }
}

struct Boundary {
    start: usize,
    end: usize,
}

fn find_event_boundary(buffer: &str) -> Option<Boundary> {
    let lf = buffer.find("\n\n").map(|pos| Boundary {
        start: pos,
        end: pos + 2,
    });
    let crlf = buffer.find("\r\n\r\n").map(|pos| Boundary {
        start: pos,
        end: pos + 4,
    });
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.start <= b.start { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_event(raw: &str) -> Option<SseEvent> {
    let mut event_type: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut id: Option<String> = None;

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.find(':') {
            Some(pos) => (&line[..pos], line[pos + 1..].strip_prefix(' ').unwrap_or(&line[pos + 1..])),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event_type,
        data: data_lines.join("\n"),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"x\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"x\":1}");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"partial\":").is_empty());
        let events = decoder.push(b"true}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"partial\":true}");
    }

    #[test]
    fn test_typed_event_with_id() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\nid: 42\ndata: hello\n\n");
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_crlf_delimiters() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[1].data, "b");
    }

    #[test]
    fn test_comment_and_empty_events_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nevent: ping\n\ndata: real\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "real");
    }

    #[test]
    fn test_done_sentinel() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [DONE]\n\n");
        assert!(events[0].is_done());
    }

    #[test]
    fn test_finish_drains_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: trailing").is_empty());
        let event = decoder.finish().unwrap();
        assert_eq!(event.data, "trailing");
        assert!(decoder.finish().is_none());
    }
}
