use super::logging::emit_sse_parse_error;
use crate::flow::ProviderError;
use crate::types::{ChatCompletionChunk, Delta, MessageDelta, StreamEvent};
use anyhow::Result;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

/// Incremental server-sent-events parser. Anthropic `event:`/`data:` pairs
/// pass through as-is; OpenAI `data:`-only chunks are mapped onto the same
/// [`StreamEvent`] vocabulary so callers handle a single shape.
#[derive(Default)]
pub struct StreamParser {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence or CRLF pair.
    pending: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        self.pending.extend_from_slice(chunk);
        let mut complete = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        if self.pending[..complete].ends_with(b"\r") {
            complete -= 1;
        }
        let bytes: Vec<u8> = self.pending.drain(..complete).collect();
        let text = String::from_utf8_lossy(&bytes);
        if text.contains('\r') {
            self.buffer.push_str(&text.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(&text);
        }

        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let event_end = start + end + 2;
            let event_text = &self.buffer[start..event_end];

            let mut event_type = None;
            let mut data = None;

            for line in event_text.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event_type = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(rest.trim().to_string());
                }
            }

            if let Some(json_data) = data {
                match event_type {
                    Some(evt_type) => parse_anthropic_event(&evt_type, &json_data, &mut events),
                    None => parse_openai_chunk(&json_data, &mut events),
                }
            }

            start = event_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        Ok(events)
    }

    pub fn flush(&mut self) -> String {
        let mut rest = std::mem::take(&mut self.buffer);
        rest.push_str(&String::from_utf8_lossy(&self.pending));
        self.pending.clear();
        rest
    }
}

/// Drives a byte stream through a [`StreamParser`], forwarding each text
/// delta to `deltas` and returning the concatenated text. Both the HTTP
/// client and the scripted provider stream through here.
pub async fn forward_text_deltas<S, B, E>(
    chunks: S,
    deltas: &mpsc::UnboundedSender<String>,
    transport_error: impl Fn(E) -> ProviderError,
) -> Result<String, ProviderError>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
{
    tokio::pin!(chunks);
    let mut parser = StreamParser::new();
    let mut text = String::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(&transport_error)?;
        let events = parser
            .process(chunk.as_ref())
            .map_err(|error| ProviderError::MalformedResponse(error.to_string()))?;
        for event in events {
            match event {
                StreamEvent::ContentBlockDelta { delta, .. } => {
                    if let Some(piece) = delta.text {
                        text.push_str(&piece);
                        let _ = deltas.send(piece);
                    }
                }
                StreamEvent::Error { error } => {
                    return Err(ProviderError::Rejected(error.message));
                }
                _ => {}
            }
        }
    }

    if text.is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    Ok(text)
}

fn parse_anthropic_event(evt_type: &str, json_data: &str, events: &mut Vec<StreamEvent>) {
    if json_data == "[DONE]"
        || !matches!(
            evt_type,
            "message_start"
                | "content_block_start"
                | "content_block_delta"
                | "content_block_stop"
                | "message_delta"
                | "message_stop"
                | "error"
        )
    {
        return;
    }

    match serde_json::from_str::<StreamEvent>(json_data) {
        Ok(evt) => events.push(evt),
        Err(e) => emit_sse_parse_error(Some(evt_type), json_data, &e),
    }
}

fn parse_openai_chunk(json_data: &str, events: &mut Vec<StreamEvent>) {
    if json_data == "[DONE]" {
        events.push(StreamEvent::MessageStop);
        return;
    }

    let chunk = match serde_json::from_str::<ChatCompletionChunk>(json_data) {
        Ok(chunk) => chunk,
        Err(e) => {
            emit_sse_parse_error(None, json_data, &e);
            return;
        }
    };

    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|text| !text.is_empty()) {
            events.push(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta {
                    delta_type: Some("text_delta".to_string()),
                    text: Some(text),
                },
            });
        }
        if let Some(reason) = choice.finish_reason {
            events.push(StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(reason),
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::convert::Infallible;

    fn delta_frame(text: &str) -> Vec<u8> {
        format!(
            "event: content_block_delta\ndata: {{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{{\"type\":\"text_delta\",\"text\":\"{text}\"}}}}\n\n"
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_forward_text_deltas_sends_each_piece() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let chunks = vec![delta_frame("Hel"), delta_frame("lo")];

        let text = forward_text_deltas(
            stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)),
            &tx,
            |never| match never {},
        )
        .await
        .expect("stream completes");

        assert_eq!(text, "Hello");
        assert_eq!(rx.recv().await.as_deref(), Some("Hel"));
        assert_eq!(rx.recv().await.as_deref(), Some("lo"));
    }

    #[tokio::test]
    async fn test_forward_text_deltas_maps_transport_failures() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let chunks: Vec<std::result::Result<Vec<u8>, &str>> =
            vec![Ok(delta_frame("partial")), Err("connection reset")];

        let error = forward_text_deltas(stream::iter(chunks), &tx, |message: &str| {
            ProviderError::Transport {
                url: "http://localhost".to_string(),
                message: message.to_string(),
            }
        })
        .await
        .expect_err("transport failure surfaces");

        assert!(matches!(error, ProviderError::Transport { ref message, .. } if message == "connection reset"));
    }

    #[tokio::test]
    async fn test_forward_text_deltas_without_text_is_empty_response() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let chunks = vec![b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n".to_vec()];

        let error = forward_text_deltas(
            stream::iter(chunks.into_iter().map(Ok::<_, Infallible>)),
            &tx,
            |never| match never {},
        )
        .await
        .expect_err("no text");

        assert!(matches!(error, ProviderError::EmptyResponse));
    }
}
