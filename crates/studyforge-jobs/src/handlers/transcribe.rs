//! Audio transcription with duration-based pricing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use studyforge_core::{
    defaults, AudioSource, CompletionProvider, Error, JobType, Result, UsageReport,
};

use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const DEFAULT_AUDIO_MIME: &str = "audio/mpeg";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscribePayload {
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    audio_url: Option<String>,
}

impl TranscribePayload {
    /// Inline audio wins when both forms are present.
    fn into_source(self) -> Result<AudioSource> {
        if let Some(data) = self.audio_base64.filter(|d| !d.trim().is_empty()) {
            return Ok(AudioSource::Inline {
                data_base64: data,
                mime_type: self
                    .mime_type
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string()),
                filename: self.filename,
            });
        }
        match self.audio_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(AudioSource::Remote { url }),
            None => Err(Error::InvalidInput(
                "Either audioBase64 or audioUrl is required".to_string(),
            )),
        }
    }
}

/// Duration from the audio size at the reference bitrate.
pub(crate) fn estimate_duration_secs(audio_bytes: usize) -> f64 {
    audio_bytes as f64 / defaults::AUDIO_BYTES_PER_SECOND
}

/// Transcribes lecture recordings.
pub struct TranscribeHandler {
    provider: Arc<dyn CompletionProvider>,
}

impl TranscribeHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TaskHandler for TranscribeHandler {
    fn job_type(&self) -> JobType {
        JobType::Transcribe
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "transcribe", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: TranscribePayload = ctx.payload_as()?;
        let source = payload.into_source()?;

        let transcript = self.provider.transcribe(&source).await?;
        let estimated = transcript.duration_secs.is_none();
        let duration = transcript
            .duration_secs
            .unwrap_or_else(|| estimate_duration_secs(transcript.audio_bytes));
        let cost = self.provider.price_audio(&transcript.model, duration);

        debug!(
            duration_secs = duration,
            duration_estimated = estimated,
            audio_bytes = transcript.audio_bytes,
            cost_usd = cost,
            "Audio transcribed"
        );

        let report = UsageReport::new(JobType::Transcribe.feature(), &transcript.model)
            .with_cost(cost, 0.0)
            .with_audio_duration(duration)
            .with_metadata(json!({
                "durationEstimated": estimated,
                "audioBytes": transcript.audio_bytes,
            }));

        Ok(HandlerOutput::new(json!({
            "transcript": transcript.text,
            "durationSeconds": duration,
            "language": transcript.language,
        }))
        .with_usage(report))
    }
}
