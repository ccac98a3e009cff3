//! SSE stream parsing for OpenAI-compatible streaming responses.
//!
//! Network chunks do not align with SSE lines (or even UTF-8 characters), so
//! bytes are buffered and only complete `\n`-terminated lines are decoded.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use studyforge_core::{Completion, CompletionStream, Error, Result, StreamEvent, TokenUsage};

use super::types::ChatCompletionChunk;
use crate::pricing::PricingTable;

type ByteStream =
    std::pin::Pin<Box<dyn Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buffer: Vec<u8>,
    queue: VecDeque<Result<StreamEvent>>,
    text: String,
    model: String,
    usage: Option<TokenUsage>,
    pricing: Arc<PricingTable>,
    /// No more input will be read.
    finished: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(&line);
            if self.finished {
                return;
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            return;
        };
        if data == "[DONE]" {
            self.finish();
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => {
                if let Some(model) = chunk.model.filter(|m| !m.is_empty()) {
                    self.model = model;
                }
                if let Some(usage) = chunk.usage {
                    self.usage = Some(usage.into());
                }
                let delta: String = chunk
                    .choices
                    .into_iter()
                    .filter_map(|c| c.delta.content)
                    .collect();
                if !delta.is_empty() {
                    self.text.push_str(&delta);
                    self.queue.push_back(Ok(StreamEvent::Delta(delta)));
                }
            }
            Err(e) => {
                self.queue.push_back(Err(Error::Inference(format!(
                    "Failed to parse SSE chunk: {e}"
                ))));
                self.finished = true;
            }
        }
    }

    /// Emit the terminal `Done` event once.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let (input_cost_usd, output_cost_usd) = self.pricing.price_tokens(&self.model, self.usage);
        self.queue.push_back(Ok(StreamEvent::Done(Completion {
            message: std::mem::take(&mut self.text),
            model: self.model.clone(),
            usage: self.usage,
            input_cost_usd,
            output_cost_usd,
        })));
    }
}

/// Parse an SSE byte stream into completion events.
///
/// Yields one `Delta` per content-bearing chunk and a final `Done` carrying
/// the assembled text, model, usage and cost. A stream that ends without
/// `[DONE]` is still finished normally.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    pricing: Arc<PricingTable>,
    requested_model: String,
) -> CompletionStream {
    let state = SseState {
        bytes: Box::pin(stream),
        buffer: Vec::new(),
        queue: VecDeque::new(),
        text: String::new(),
        model: requested_model,
        usage: None,
        pricing,
        finished: false,
    };

    let events = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.queue.pop_front() {
                return Some((event, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buffer.extend_from_slice(&chunk);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(Error::Inference(format!("Stream error: {e}"))), st));
                }
                None => {
                    if !st.buffer.is_empty() {
                        st.buffer.push(b'\n');
                        st.drain_lines();
                    }
                    st.finish();
                }
            }
        }
    });

    Box::pin(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        parts: Vec<&'static str>,
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(bytes::Bytes::from_static(p.as_bytes()))),
        )
    }

    async fn collect(parts: Vec<&'static str>) -> Vec<Result<StreamEvent>> {
        parse_sse_stream(
            byte_stream(parts),
            Arc::new(PricingTable::new()),
            "gpt-4o-mini".to_string(),
        )
        .collect()
        .await
    }

    fn deltas(events: &[Result<StreamEvent>]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::Delta(d)) => Some(d.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_deltas_then_done_with_usage() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"model\":\"gpt-4o-mini-2024-07-18\",\"choices\":[],\"usage\":{\"prompt_tokens\":1000,\"completion_tokens\":1000,\"total_tokens\":2000}}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;

        assert_eq!(deltas(&events), vec!["Hel", "lo"]);
        match events.last() {
            Some(Ok(StreamEvent::Done(completion))) => {
                assert_eq!(completion.message, "Hello");
                assert_eq!(completion.model, "gpt-4o-mini-2024-07-18");
                assert_eq!(completion.usage, Some(TokenUsage::new(1000, 1000)));
                assert!((completion.input_cost_usd - 0.000_15).abs() < 1e-12);
                assert!((completion.output_cost_usd - 0.000_6).abs() < 1e-12);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_line_split_across_chunks() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"split\"}}]}\n",
            "\ndata: [DONE]\n",
        ])
        .await;
        assert_eq!(deltas(&events), vec!["split"]);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "é" is 0xC3 0xA9; split it between two network chunks.
        let first: &'static [u8] = b"data: {\"choices\":[{\"delta\":{\"content\":\"caf\xC3";
        let second: &'static [u8] = b"\xA9\"}}]}\n\ndata: [DONE]\n\n";
        let stream = futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(first)),
            Ok(bytes::Bytes::from_static(second)),
        ]);
        let events: Vec<_> = parse_sse_stream(
            stream,
            Arc::new(PricingTable::new()),
            "gpt-4o-mini".to_string(),
        )
        .collect()
        .await;
        assert_eq!(deltas(&events), vec!["café"]);
    }

    #[tokio::test]
    async fn test_missing_done_marker_still_finishes() {
        let events = collect(vec!["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}"]).await;
        assert_eq!(deltas(&events), vec!["x"]);
        assert!(matches!(events.last(), Some(Ok(StreamEvent::Done(c))) if c.message == "x"));
    }

    #[tokio::test]
    async fn test_no_usage_prices_zero() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        match events.last() {
            Some(Ok(StreamEvent::Done(c))) => {
                assert!(c.usage.is_none());
                assert_eq!(c.model, "gpt-4o-mini");
                assert_eq!(c.input_cost_usd, 0.0);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_comments_and_blank_lines_ignored() {
        let events = collect(vec![
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(deltas(&events), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_invalid_json_is_terminal_error() {
        let events = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {invalid json}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
        ])
        .await;
        assert_eq!(deltas(&events), vec!["a"]);
        assert!(events.last().unwrap().is_err());
        assert!(!events.iter().any(|e| matches!(e, Ok(StreamEvent::Done(_)))));
    }
}
