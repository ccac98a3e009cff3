//! Embedding vectors for a batch of inputs, returned in input order.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use studyforge_core::{CompletionProvider, Error, JobType, Result, UsageReport};

use crate::handler::{HandlerOutput, JobContext, TaskHandler};

#[derive(Debug, Deserialize)]
struct EmbedPayload {
    #[serde(default)]
    inputs: Vec<String>,
}

/// Embeds a batch of texts.
pub struct EmbedHandler {
    provider: Arc<dyn CompletionProvider>,
}

impl EmbedHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TaskHandler for EmbedHandler {
    fn job_type(&self) -> JobType {
        JobType::Embed
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "embed", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: EmbedPayload = ctx.payload_as()?;
        if payload.inputs.is_empty() {
            return Err(Error::InvalidInput("Embedding inputs are empty".to_string()));
        }

        let embeddings = self.provider.embed(&payload.inputs).await?;
        if embeddings.vectors.len() != payload.inputs.len() {
            return Err(Error::Embedding(format!(
                "Expected {} vectors, got {}",
                payload.inputs.len(),
                embeddings.vectors.len()
            )));
        }
        let dimension = embeddings.vectors.first().map(Vec::len).unwrap_or(0);
        debug!(input_count = payload.inputs.len(), dimension, "Inputs embedded");

        let report = UsageReport::new(JobType::Embed.feature(), &embeddings.model)
            .with_tokens(embeddings.usage)
            .with_cost(embeddings.input_cost_usd, 0.0)
            .with_metadata(json!({"inputCount": payload.inputs.len()}));

        Ok(HandlerOutput::new(json!({
            "vectors": embeddings.vectors,
            "model": embeddings.model,
            "dimension": dimension,
        }))
        .with_usage(report))
    }
}
