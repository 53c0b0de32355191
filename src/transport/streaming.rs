//! Streaming response handling and SSE parsing.

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use super::TransportError;

/// Streaming HTTP response.
pub struct StreamingResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Byte stream.
    pub stream: Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// Server-Sent Event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type.
    pub event: Option<String>,
    /// Event data; multiple `data:` lines are joined with `\n`.
    pub data: String,
    /// Event ID.
    pub id: Option<String>,
    /// `meta:` field sent by the model service on `finish`.
    pub meta: Option<String>,
}

#[derive(Debug, Default)]
struct SseEventBuilder {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    meta: Option<String>,
}

impl SseEventBuilder {
    fn build(self) -> Option<SseEvent> {
        if self.event.is_none() && self.data.is_empty() && self.meta.is_none() {
            return None;
        }

        Some(SseEvent {
            event: self.event,
            data: self.data.join("\n"),
            id: self.id,
            meta: self.meta,
        })
    }
}

/// SSE parser that converts text chunks to events.
///
/// Field values lose exactly one leading space, so token text that starts
/// with whitespace survives.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    current_event: SseEventBuilder,
}

impl SseParser {
    /// Creates a new SSE parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a chunk of data and returns any complete events.
    pub fn parse(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if let Some(event) = self.parse_line(line) {
                events.push(event);
            }
        }

        events
    }

    fn parse_line(&mut self, line: &str) -> Option<SseEvent> {
        // Empty line signals end of event
        if line.is_empty() {
            return std::mem::take(&mut self.current_event).build();
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current_event.event = Some(value.to_string()),
            "data" => self.current_event.data.push(value.to_string()),
            "id" => self.current_event.id = Some(value.to_string()),
            "meta" => self.current_event.meta = Some(value.to_string()),
            _ => {} // Ignore unknown fields
        }

        None
    }

    /// Flush any remaining event.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let _ = self.parse_line(line.trim_end_matches('\r'));
        }
        std::mem::take(&mut self.current_event).build()
    }
}

pin_project! {
    /// Stream of SSE events decoded from a streaming response body.
    ///
    /// Multi-byte characters split across network chunks are held back until
    /// the rest of the character arrives.
    pub struct SseEventStream {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>,
        parser: SseParser,
        pending_bytes: Vec<u8>,
        ready: VecDeque<SseEvent>,
        done: bool,
    }
}

impl SseEventStream {
    /// Wraps a streaming response body.
    pub fn new(response: StreamingResponse) -> Self {
        Self {
            inner: response.stream,
            parser: SseParser::new(),
            pending_bytes: Vec::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

/// Splits off the longest valid UTF-8 prefix of `buf`.
fn take_utf8(buf: &mut Vec<u8>) -> Result<String, TransportError> {
    let valid = match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        // Incomplete trailing character: keep it for the next chunk.
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => {
            return Err(TransportError::InvalidResponse {
                message: format!("Invalid UTF-8 in stream: {}", e),
            })
        }
    };

    let rest = buf.split_off(valid);
    String::from_utf8(std::mem::replace(buf, rest)).map_err(|e| TransportError::InvalidResponse {
        message: format!("Invalid UTF-8 in stream: {}", e),
    })
}

impl Stream for SseEventStream {
    type Item = Result<SseEvent, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(event) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending_bytes.extend_from_slice(&bytes);
                    let text = match take_utf8(this.pending_bytes) {
                        Ok(text) => text,
                        Err(e) => {
                            *this.done = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                    };
                    this.ready.extend(this.parser.parse(&text));
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if let Some(event) = this.parser.flush() {
                        this.ready.push_back(event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_sse_parser_single_event() {
        let mut parser = SseParser::new();

        let events = parser.parse("event: add\ndata: test\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("add"));
        assert_eq!(events[0].data, "test");
    }

    #[test]
    fn test_sse_parser_keeps_inner_whitespace() {
        let mut parser = SseParser::new();

        let events = parser.parse("event: add\ndata:  leading space\n\n");

        assert_eq!(events[0].data, " leading space");
    }

    #[test]
    fn test_sse_parser_multiline_data() {
        let mut parser = SseParser::new();

        let events = parser.parse("event: add\ndata: line1\ndata: line2\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_sse_parser_finish_with_meta() {
        let mut parser = SseParser::new();

        let events = parser.parse(
            "event: finish\nid: 42\ndata:\nmeta: {\"usage\":{\"total_tokens\":10}}\n\n",
        );

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("finish"));
        assert_eq!(events[0].data, "");
        assert_eq!(events[0].id.as_deref(), Some("42"));
        assert!(events[0].meta.as_deref().unwrap_or_default().contains("total_tokens"));
    }

    #[test]
    fn test_sse_parser_comment() {
        let mut parser = SseParser::new();

        let events = parser.parse(": keep-alive\nevent: add\ndata: hello\n\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_sse_parser_incomplete() {
        let mut parser = SseParser::new();

        let events = parser.parse("event: add\ndata: hel");
        assert!(events.is_empty());

        let events = parser.parse("lo\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn test_sse_parser_flush() {
        let mut parser = SseParser::new();
        assert!(parser.parse("event: finish\ndata: done").is_empty());

        let event = parser.flush().unwrap();
        assert_eq!(event.event.as_deref(), Some("finish"));
        assert_eq!(event.data, "done");
    }

    #[tokio::test]
    async fn test_event_stream_rejoins_split_characters() {
        let body = "event: add\ndata: 故事\n\nevent: add\ndata: 开端\n\n".as_bytes();
        // Split inside the first multi-byte character.
        let chunks: Vec<Result<Bytes, TransportError>> = vec![
            Ok(Bytes::copy_from_slice(&body[..19])),
            Ok(Bytes::copy_from_slice(&body[19..])),
        ];
        let response = StreamingResponse {
            status: 200,
            headers: HashMap::new(),
            stream: Box::pin(futures::stream::iter(chunks)),
        };

        let events: Vec<SseEvent> = SseEventStream::new(response)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "故事");
        assert_eq!(events[1].data, "开端");
    }

    #[tokio::test]
    async fn test_event_stream_rejects_invalid_utf8() {
        let chunks: Vec<Result<Bytes, TransportError>> =
            vec![Ok(Bytes::from_static(b"data: \xff\xfe\n\n"))];
        let response = StreamingResponse {
            status: 200,
            headers: HashMap::new(),
            stream: Box::pin(futures::stream::iter(chunks)),
        };

        let mut stream = SseEventStream::new(response);
        assert!(matches!(
            stream.next().await,
            Some(Err(TransportError::InvalidResponse { .. }))
        ));
        assert!(stream.next().await.is_none());
    }
}
