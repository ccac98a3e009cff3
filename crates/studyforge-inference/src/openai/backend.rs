//! OpenAI-compatible completion provider implementation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tracing::{debug, info, instrument};

use studyforge_core::{
    defaults, AudioSource, Completion, CompletionProvider, CompletionRequest, CompletionStream,
    Embeddings, Error, Result, TokenUsage, Transcript,
};

use super::error::{to_studyforge_error, OpenAIErrorCode, Operation};
use super::streaming::parse_sse_stream;
use super::types::*;
use crate::pricing::PricingTable;

/// Configuration for the OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model for chat completions.
    pub chat_model: String,
    /// Model for embeddings.
    pub embed_model: String,
    /// Model for audio transcription.
    pub transcribe_model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
    /// HTTP-Referer header for OpenRouter.ai rankings (optional).
    pub http_referer: Option<String>,
    /// X-Title header for app name on OpenRouter.ai (optional).
    pub x_title: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            chat_model: defaults::CHAT_MODEL.to_string(),
            embed_model: defaults::EMBED_MODEL.to_string(),
            transcribe_model: defaults::TRANSCRIBE_MODEL.to_string(),
            timeout_seconds: defaults::INFERENCE_TIMEOUT_SECS,
            skip_tls_verify: false,
            http_referer: None,
            x_title: None,
        }
    }
}

impl OpenAIConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let env_or = |key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            base_url: env_or("OPENAI_BASE_URL", defaults::OPENAI_URL),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            chat_model: env_or("OPENAI_CHAT_MODEL", defaults::CHAT_MODEL),
            embed_model: env_or("OPENAI_EMBED_MODEL", defaults::EMBED_MODEL),
            transcribe_model: env_or("OPENAI_TRANSCRIBE_MODEL", defaults::TRANSCRIBE_MODEL),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults::INFERENCE_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("OPENAI_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            http_referer: std::env::var("OPENAI_HTTP_REFERER").ok(),
            x_title: std::env::var("OPENAI_X_TITLE").ok(),
        }
    }
}

/// OpenAI-compatible completion provider.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
    pricing: Arc<PricingTable>,
}

impl OpenAIBackend {
    /// Create a new backend with the given configuration and pricing.
    pub fn new(config: OpenAIConfig, pricing: PricingTable) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            chat_model = %config.chat_model,
            embed_model = %config.embed_model,
            transcribe_model = %config.transcribe_model,
            "Initializing OpenAI-compatible provider"
        );

        Ok(Self {
            client,
            config,
            pricing: Arc::new(pricing),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env(), PricingTable::from_env()?)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// Attach authentication and OpenRouter headers.
    fn authorize(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key);
        }
        if let Some(ref referer) = self.config.http_referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.config.x_title {
            req = req.header("X-Title", title);
        }
        req
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(self.url(endpoint)))
    }

    /// Turn a non-success response into a classified error.
    async fn error_from_response(op: Operation, response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, kind) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
            Ok(parsed) => {
                let kind = parsed
                    .error
                    .code
                    .or(parsed.error.error_type)
                    .unwrap_or_default();
                (parsed.error.message, kind)
            }
            Err(_) if body.trim().is_empty() => (status.to_string(), String::new()),
            Err(_) => (body.chars().take(200).collect(), String::new()),
        };
        let code = OpenAIErrorCode::from_response(status.as_u16(), &kind);
        to_studyforge_error(op, code, &format!("{status}: {message}"))
    }

    fn chat_request(&self, request: &CompletionRequest, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.chat_model.clone()),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            response_format: request.json_mode.then(ResponseFormat::json_object),
        }
    }

    /// Resolve audio to bytes plus a filename and MIME type.
    async fn load_audio(&self, audio: &AudioSource) -> Result<(Vec<u8>, String, String)> {
        match audio {
            AudioSource::Inline {
                data_base64,
                mime_type,
                filename,
            } => {
                // Accept data URIs as well as bare base64.
                let encoded = data_base64
                    .split_once(";base64,")
                    .map(|(_, data)| data)
                    .unwrap_or(data_base64);
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| Error::InvalidInput(format!("Invalid base64 audio: {e}")))?;
                let name = filename
                    .clone()
                    .unwrap_or_else(|| format!("audio.{}", extension_for(mime_type)));
                Ok((bytes, name, mime_type.clone()))
            }
            AudioSource::Remote { url } => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| Error::Transcription(format!("Audio download failed: {e}")))?;
                if !response.status().is_success() {
                    return Err(Error::Transcription(format!(
                        "Audio download returned {}",
                        response.status()
                    )));
                }
                let mime_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                    .filter(|v| v.starts_with("audio/") || v.starts_with("video/"))
                    .unwrap_or_else(|| "audio/mpeg".to_string());
                let name = url
                    .rsplit('/')
                    .next()
                    .and_then(|n| n.split('?').next())
                    .filter(|n| n.contains('.'))
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("audio.{}", extension_for(&mime_type)));
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| Error::Transcription(format!("Audio download failed: {e}")))?;
                Ok((bytes.to_vec(), name, mime_type))
            }
        }
    }
}

/// File extension for an audio MIME type.
fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/flac" => "flac",
        "audio/aac" => "aac",
        "audio/webm" | "video/webm" => "webm",
        _ => "mp3",
    }
}

#[async_trait]
impl CompletionProvider for OpenAIBackend {
    #[instrument(skip(self, request), fields(subsystem = "inference", component = "openai", op = "complete"))]
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let start = Instant::now();
        let body = self.chat_request(&request, false);

        let response = self
            .post("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Operation::Chat, response).await);
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {e}")))?;

        let model = result.model.unwrap_or(body.model);
        let usage: Option<TokenUsage> = result.usage.map(Into::into);
        let message = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let (input_cost_usd, output_cost_usd) = self.pricing.price_tokens(&model, usage);

        debug!(
            model = %model,
            total_tokens = usage.map(|u| u.total_tokens).unwrap_or(0),
            duration_ms = start.elapsed().as_millis() as u64,
            response_len = message.len(),
            "Completion finished"
        );

        Ok(Completion {
            message,
            model,
            usage,
            input_cost_usd,
            output_cost_usd,
        })
    }

    #[instrument(skip(self, request), fields(subsystem = "inference", component = "openai", op = "complete_stream"))]
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = self.chat_request(&request, true);

        let response = self
            .post("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Operation::Chat, response).await);
        }

        debug!(model = %body.model, "Streaming completion started");
        Ok(parse_sse_stream(
            response.bytes_stream(),
            self.pricing.clone(),
            body.model,
        ))
    }

    #[instrument(skip(self, inputs), fields(subsystem = "inference", component = "openai", op = "embed", input_count = inputs.len()))]
    async fn embed(&self, inputs: &[String]) -> Result<Embeddings> {
        if inputs.is_empty() {
            return Err(Error::InvalidInput("No texts to embed".to_string()));
        }

        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: inputs.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .post("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Operation::Embed, response).await);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {e}")))?;

        if result.data.len() != inputs.len() {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings, got {}",
                inputs.len(),
                result.data.len()
            )));
        }

        // Sort by index to ensure correct ordering
        let mut data = result.data;
        data.sort_by_key(|d| d.index);

        let usage: Option<TokenUsage> = result.usage.map(Into::into);
        let (input_cost_usd, _) = self.pricing.price_tokens(&result.model, usage);

        Ok(Embeddings {
            vectors: data.into_iter().map(|d| d.embedding).collect(),
            model: result.model,
            usage,
            input_cost_usd,
        })
    }

    #[instrument(skip(self, audio), fields(subsystem = "inference", component = "openai", op = "transcribe"))]
    async fn transcribe(&self, audio: &AudioSource) -> Result<Transcript> {
        let (bytes, filename, mime_type) = self.load_audio(audio).await?;
        if bytes.is_empty() {
            return Err(Error::InvalidInput("Audio payload is empty".to_string()));
        }
        let audio_bytes = bytes.len();

        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(&mime_type)
            .map_err(|e| Error::InvalidInput(format!("Invalid audio MIME type: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.config.transcribe_model.clone())
            .text("response_format", "verbose_json");

        let response = self
            .post("/audio/transcriptions")
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Transcription(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(Operation::Transcribe, response).await);
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::Transcription(format!("Failed to parse response: {e}")))?;

        debug!(
            audio_bytes,
            reported_duration = ?result.duration,
            "Transcription finished"
        );

        Ok(Transcript {
            text: result.text.trim().to_string(),
            model: self.config.transcribe_model.clone(),
            language: result.language,
            duration_secs: result.duration,
            audio_bytes,
        })
    }

    fn price_audio(&self, model: &str, duration_secs: f64) -> f64 {
        self.pricing.price_audio(model, duration_secs)
    }

    fn chat_model(&self) -> &str {
        &self.config.chat_model
    }
}
