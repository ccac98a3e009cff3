//! Streaming tutor chat.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, trace};

use studyforge_core::{
    ChatMessage, ChatRole, Completion, CompletionProvider, CompletionRequest, ContentPart, Error,
    JobType, Result, StreamAccumulator, StreamEvent,
};

use super::HandlerConfig;
use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a patient, encouraging tutor. Explain concepts \
step by step, check the student's understanding, and keep answers grounded in the course \
material when it is provided.";

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    role: ChatRole,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatPayload {
    message: String,
    #[serde(default)]
    history: Vec<HistoryMessage>,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Course material to ground the answer in.
    #[serde(default)]
    context: Option<String>,
}

impl ChatPayload {
    fn into_request(self) -> CompletionRequest {
        let mut system = self
            .system_prompt
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        if let Some(context) = self.context.filter(|c| !c.trim().is_empty()) {
            system.push_str("\n\nCourse material:\n");
            system.push_str(&context);
        }

        let mut request = CompletionRequest::new().system(system);
        for turn in self.history {
            if turn.content.trim().is_empty() {
                continue;
            }
            request = request.message(ChatMessage::new(turn.role, vec![ContentPart::text(turn.content)]));
        }
        request.user(self.message)
    }
}

/// Streams a tutor reply, mirroring the text into `partial_result`.
pub struct ChatHandler {
    provider: Arc<dyn CompletionProvider>,
    config: HandlerConfig,
}

impl ChatHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: HandlerConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl TaskHandler for ChatHandler {
    fn job_type(&self) -> JobType {
        JobType::Chat
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "chat", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: ChatPayload = ctx.payload_as()?;
        if payload.message.trim().is_empty() {
            return Err(Error::InvalidInput("Chat message is empty".to_string()));
        }

        let mut stream = self.provider.complete_stream(payload.into_request()).await?;
        let mut writer = ctx.partial_writer(self.config.partial_result_throttle);
        let mut acc = StreamAccumulator::new();
        let mut done: Option<Completion> = None;

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::Delta(delta) => {
                    let (incremental, accumulated) = acc.push(&delta);
                    trace!(delta_len = incremental.len(), "Chat delta");
                    let accumulated = accumulated.to_string();
                    writer.offer(&accumulated).await;
                }
                StreamEvent::Done(completion) => {
                    done = Some(completion);
                    break;
                }
            }
        }

        let completion = done
            .ok_or_else(|| Error::Inference("Chat stream ended without a final event".to_string()))?;

        debug!(
            deltas = acc.delta_count(),
            partial_writes = writer.writes(),
            model = %completion.model,
            "Chat stream complete"
        );

        let report = completion.usage_report(JobType::Chat.feature());
        let message = acc.into_text();
        Ok(HandlerOutput::new(json!({
            "message": message,
            "model": completion.model,
        }))
        .with_usage(report))
    }
}
