//! Scripted completion provider for deterministic testing.
//!
//! Replies are resolved in this order: the first rule whose needle appears in
//! the request text, then the next queued reply, then the default response.
//!
//! ```rust,ignore
//! use studyforge_inference::mock::MockProvider;
//! use studyforge_inference::{CompletionProvider, CompletionRequest};
//!
//! # async fn demo() {
//! let provider = MockProvider::new()
//!     .with_reply_when("chunk 2 of", "not json")
//!     .with_default_response(r#"{"entries": []}"#);
//!
//! let completion = provider
//!     .complete(CompletionRequest::new().user("Analyze chunk 1 of 3"))
//!     .await
//!     .unwrap();
//! assert_eq!(completion.message, r#"{"entries": []}"#);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;

use studyforge_core::{
    AudioSource, Completion, CompletionProvider, CompletionRequest, CompletionStream, Embeddings,
    Error, Result, StreamEvent, TokenUsage, Transcript,
};

use crate::pricing::PricingTable;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(String),
}

/// A recorded provider call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: &'static str,
    pub input: String,
    pub has_image: bool,
    pub json_mode: bool,
    pub at: tokio::time::Instant,
}

#[derive(Debug, Clone)]
struct MockConfig {
    model: String,
    default_response: String,
    rules: Vec<(String, MockReply)>,
    usage: Option<TokenUsage>,
    latency: Duration,
    delta_delay: Duration,
    stream_deltas: Option<Vec<String>>,
    stream_error_after: Option<usize>,
    dimension: usize,
    embed_failure: Option<String>,
    transcript: String,
    transcript_duration: Option<f64>,
    transcribe_failure: Option<String>,
    remote_audio_bytes: usize,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            model: "mock-chat".to_string(),
            default_response: "Mock response".to_string(),
            rules: Vec::new(),
            usage: Some(TokenUsage::new(100, 50)),
            latency: Duration::ZERO,
            delta_delay: Duration::ZERO,
            stream_deltas: None,
            stream_error_after: None,
            dimension: 8,
            embed_failure: None,
            transcript: "Mock transcript".to_string(),
            transcript_duration: Some(60.0),
            transcribe_failure: None,
            remote_audio_bytes: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    queue: VecDeque<MockReply>,
    calls: Vec<MockCall>,
}

/// Mock completion provider.
#[derive(Clone)]
pub struct MockProvider {
    config: Arc<MockConfig>,
    pricing: Arc<PricingTable>,
    state: Arc<Mutex<MockState>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter when a call finishes or is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            pricing: Arc::new(PricingTable::new()),
            state: Arc::new(Mutex::new(MockState::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Reply used when no rule matches and the queue is empty.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Reply with `response` whenever the request text contains `needle`.
    pub fn with_reply_when(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .rules
            .push((needle.into(), MockReply::Text(response.into())));
        self
    }

    /// Fail whenever the request text contains `needle`.
    pub fn with_failure_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .rules
            .push((needle.into(), MockReply::Fail(message.into())));
        self
    }

    /// Queue replies consumed one per call, in call order.
    pub fn with_replies<I, S>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .queue
            .extend(replies.into_iter().map(|r| MockReply::Text(r.into())));
        self
    }

    /// Make the next call fail.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().queue.push_back(MockReply::Fail(message.into()));
    }

    /// Usage reported by every completion; `None` reports no usage.
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        Arc::make_mut(&mut self.config).usage = usage;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    /// Simulated latency before every call resolves.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Delay before each streamed delta.
    pub fn with_delta_delay(mut self, delay: Duration) -> Self {
        Arc::make_mut(&mut self.config).delta_delay = delay;
        self
    }

    /// Explicit deltas for streaming calls (otherwise the reply is split on words).
    pub fn with_stream_deltas<I, S>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.config).stream_deltas =
            Some(deltas.into_iter().map(Into::into).collect());
        self
    }

    /// Emit an error instead of the `n`th delta (zero-based).
    pub fn with_stream_error_after(mut self, n: usize) -> Self {
        Arc::make_mut(&mut self.config).stream_error_after = Some(n);
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension.max(1);
        self
    }

    pub fn with_embed_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).embed_failure = Some(message.into());
        self
    }

    pub fn with_transcript(mut self, text: impl Into<String>, duration_secs: Option<f64>) -> Self {
        let config = Arc::make_mut(&mut self.config);
        config.transcript = text.into();
        config.transcript_duration = duration_secs;
        self
    }

    pub fn with_transcribe_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).transcribe_failure = Some(message.into());
        self
    }

    /// Bytes reported for remote audio.
    pub fn with_remote_audio_bytes(mut self, bytes: usize) -> Self {
        Arc::make_mut(&mut self.config).remote_audio_bytes = bytes;
        self
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of calls for one operation (`complete`, `stream`, `embed`, `transcribe`).
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self.in_flight.clone())
    }

    fn record(&self, operation: &'static str, request: Option<&CompletionRequest>, input: String) {
        self.lock().calls.push(MockCall {
            operation,
            input,
            has_image: request.map(|r| r.has_image()).unwrap_or(false),
            json_mode: request.map(|r| r.json_mode).unwrap_or(false),
            at: tokio::time::Instant::now(),
        });
    }

    fn request_text(request: &CompletionRequest) -> String {
        request
            .messages
            .iter()
            .map(|m| m.text())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn resolve(&self, input: &str) -> MockReply {
        if let Some((_, reply)) = self
            .config
            .rules
            .iter()
            .find(|(needle, _)| input.contains(needle.as_str()))
        {
            return reply.clone();
        }
        self.lock()
            .queue
            .pop_front()
            .unwrap_or_else(|| MockReply::Text(self.config.default_response.clone()))
    }

    async fn simulate_latency(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    fn completion(&self, message: String, request: &CompletionRequest) -> Completion {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let usage = self.config.usage;
        let (input_cost_usd, output_cost_usd) = self.pricing.price_tokens(&model, usage);
        Completion {
            message,
            model,
            usage,
            input_cost_usd,
            output_cost_usd,
        }
    }

    fn split_words(text: &str) -> Vec<String> {
        let mut deltas = Vec::new();
        let mut current = String::new();
        for ch in text.chars() {
            current.push(ch);
            if ch == ' ' {
                deltas.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            deltas.push(current);
        }
        deltas
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let _guard = self.enter();
        let input = Self::request_text(&request);
        self.record("complete", Some(&request), input.clone());
        let reply = self.resolve(&input);
        self.simulate_latency().await;

        match reply {
            MockReply::Text(message) => Ok(self.completion(message, &request)),
            MockReply::Fail(message) => Err(Error::Inference(message)),
        }
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let input = Self::request_text(&request);
        self.record("stream", Some(&request), input.clone());
        let message = match self.resolve(&input) {
            MockReply::Text(message) => message,
            MockReply::Fail(message) => return Err(Error::Inference(message)),
        };

        let deltas = self
            .config
            .stream_deltas
            .clone()
            .unwrap_or_else(|| Self::split_words(&message));
        let full_text: String = deltas.concat();
        let done = self.completion(full_text, &request);
        let delay = self.config.delta_delay;
        let error_after = self.config.stream_error_after;

        let events = futures::stream::unfold(
            (deltas.into_iter().enumerate(), Some(done), false),
            move |(mut deltas, mut done, failed)| async move {
                if failed {
                    return None;
                }
                match deltas.next() {
                    Some((index, delta)) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        if error_after == Some(index) {
                            let err = Err(Error::Inference("mock stream interrupted".to_string()));
                            return Some((err, (deltas, done, true)));
                        }
                        Some((Ok(StreamEvent::Delta(delta)), (deltas, done, false)))
                    }
                    None => done
                        .take()
                        .map(|c| (Ok(StreamEvent::Done(c)), (deltas, None, false))),
                }
            },
        );
        Ok(Box::pin(events))
    }

    async fn embed(&self, inputs: &[String]) -> Result<Embeddings> {
        let _guard = self.enter();
        self.record("embed", None, inputs.join("\n"));
        self.simulate_latency().await;

        if let Some(ref message) = self.config.embed_failure {
            return Err(Error::Embedding(message.clone()));
        }
        if inputs.is_empty() {
            return Err(Error::InvalidInput("No texts to embed".to_string()));
        }

        let prompt_tokens: u32 = inputs.iter().map(|t| t.split_whitespace().count() as u32).sum();
        let usage = Some(TokenUsage::new(prompt_tokens, 0));
        let model = "mock-embed".to_string();
        let (input_cost_usd, _) = self.pricing.price_tokens(&model, usage);
        Ok(Embeddings {
            vectors: inputs
                .iter()
                .map(|t| MockEmbeddingGenerator::generate(t, self.config.dimension))
                .collect(),
            model,
            usage,
            input_cost_usd,
        })
    }

    async fn transcribe(&self, audio: &AudioSource) -> Result<Transcript> {
        let _guard = self.enter();
        let (input, audio_bytes) = match audio {
            AudioSource::Inline { data_base64, .. } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data_base64.trim())
                    .map_err(|e| Error::InvalidInput(format!("Invalid base64 audio: {e}")))?;
                ("inline".to_string(), bytes.len())
            }
            AudioSource::Remote { url } => (url.clone(), self.config.remote_audio_bytes),
        };
        self.record("transcribe", None, input);
        self.simulate_latency().await;

        if let Some(ref message) = self.config.transcribe_failure {
            return Err(Error::Transcription(message.clone()));
        }
        Ok(Transcript {
            text: self.config.transcript.clone(),
            model: "mock-transcribe".to_string(),
            language: Some("en".to_string()),
            duration_secs: self.config.transcript_duration,
            audio_bytes,
        })
    }

    fn price_audio(&self, model: &str, duration_secs: f64) -> f64 {
        self.pricing.price_audio(model, duration_secs)
    }

    fn chat_model(&self) -> &str {
        &self.config.model
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_rule_beats_queue_and_default() {
        let provider = MockProvider::new()
            .with_reply_when("special", "ruled")
            .with_replies(["queued"])
            .with_default_response("fallback");

        let req = |t: &str| CompletionRequest::new().user(t);
        assert_eq!(provider.complete(req("a special one")).await.unwrap().message, "ruled");
        assert_eq!(provider.complete(req("plain")).await.unwrap().message, "queued");
        assert_eq!(provider.complete(req("plain")).await.unwrap().message, "fallback");
        assert_eq!(provider.call_count("complete"), 3);
    }

    #[tokio::test]
    async fn test_failure_rule() {
        let provider = MockProvider::new().with_failure_when("boom", "provider down");
        let err = provider
            .complete(CompletionRequest::new().user("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(ref m) if m == "provider down"));
    }

    #[tokio::test]
    async fn test_completion_is_priced() {
        let provider = MockProvider::new()
            .with_model("gpt-4o-mini")
            .with_usage(Some(TokenUsage::new(1000, 1000)));
        let completion = provider
            .complete(CompletionRequest::new().user("x"))
            .await
            .unwrap();
        assert_eq!(completion.model, "gpt-4o-mini");
        assert!((completion.input_cost_usd - 0.000_15).abs() < 1e-12);
        assert!((completion.output_cost_usd - 0.000_6).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_stream_splits_words_and_finishes() {
        let provider = MockProvider::new().with_default_response("one two three");
        let events: Vec<_> = provider
            .complete_stream(CompletionRequest::new().user("hi"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Delta("one ".into()));
        match events.last() {
            Some(Ok(StreamEvent::Done(c))) => assert_eq!(c.message, "one two three"),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_error_after() {
        let provider = MockProvider::new()
            .with_stream_deltas(["a", "b", "c"])
            .with_stream_error_after(1);
        let events: Vec<_> = provider
            .complete_stream(CompletionRequest::new().user("hi"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn test_embed_is_deterministic() {
        let provider = MockProvider::new().with_dimension(16);
        let inputs = vec!["cell biology".to_string(), "cell biology".to_string()];
        let result = provider.embed(&inputs).await.unwrap();
        assert_eq!(result.vectors.len(), 2);
        assert_eq!(result.vectors[0], result.vectors[1]);
        assert_eq!(result.vectors[0].len(), 16);
    }

    #[tokio::test]
    async fn test_transcribe_reports_inline_size() {
        let provider = MockProvider::new().with_transcript("hello", None);
        let transcript = provider
            .transcribe(&AudioSource::Inline {
                data_base64: "AAECAw==".to_string(),
                mime_type: "audio/wav".to_string(),
                filename: None,
            })
            .await
            .unwrap();
        assert_eq!(transcript.text, "hello");
        assert_eq!(transcript.audio_bytes, 4);
        assert!(transcript.duration_secs.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_in_flight_tracking() {
        let provider = MockProvider::new().with_latency(Duration::from_millis(50));
        let calls = (0..4).map(|_| provider.complete(CompletionRequest::new().user("x")));
        futures::future::join_all(calls).await;
        assert_eq!(provider.max_in_flight(), 4);
    }

    #[test]
    fn test_embedding_generator_normalized() {
        let embedding = MockEmbeddingGenerator::generate("test", 128);
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.01);
    }
}
