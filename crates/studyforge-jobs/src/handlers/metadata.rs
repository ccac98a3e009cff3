//! Document metadata extraction for uploaded files.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use studyforge_core::{
    defaults, CompletionProvider, CompletionRequest, DocumentMetadata, Error, JobType, Result,
};

use super::parse::parse_lenient;
use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const SYSTEM_PROMPT: &str = "You catalogue course documents. From the excerpt, extract the \
document title, the course code if one appears, the main topics, and a two-sentence summary. \
Respond with JSON only: {\"title\": string, \"courseCode\": string | null, \
\"topics\": [string], \"summary\": string}.";

#[derive(Debug, Deserialize)]
struct MetadataPayload {
    filename: String,
    #[serde(default)]
    text: String,
}

/// Leading slice of `text` of at most `max_chars` characters.
fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Human title from a file name: extension dropped, separators to spaces.
pub(crate) fn title_from_filename(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    let title = stem
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if title.is_empty() {
        "Untitled document".to_string()
    } else {
        title
    }
}

/// Extracts title, course code, topics and summary.
pub struct MetadataHandler {
    provider: Arc<dyn CompletionProvider>,
}

impl MetadataHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TaskHandler for MetadataHandler {
    fn job_type(&self) -> JobType {
        JobType::Metadata
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "metadata", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: MetadataPayload = ctx.payload_as()?;
        if payload.text.trim().is_empty() {
            return Err(Error::InvalidInput("Document text is empty".to_string()));
        }

        let excerpt = preview(payload.text.trim(), defaults::METADATA_PREVIEW_CHARS);
        let request = CompletionRequest::new()
            .system(SYSTEM_PROMPT)
            .user(format!("File name: {}\n\n{}", payload.filename, excerpt))
            .json();
        let completion = self.provider.complete(request).await?;

        let metadata = match parse_lenient::<DocumentMetadata>(&completion.message) {
            Some(mut meta) if !meta.title.trim().is_empty() => {
                meta.title = meta.title.trim().to_string();
                meta.topics.retain(|t| !t.trim().is_empty());
                meta.course_code = meta.course_code.filter(|c| !c.trim().is_empty());
                meta
            }
            _ => {
                warn!(
                    filename = %payload.filename,
                    "Unparseable metadata output, deriving title from file name"
                );
                DocumentMetadata {
                    title: title_from_filename(&payload.filename),
                    course_code: None,
                    topics: Vec::new(),
                    summary: String::new(),
                }
            }
        };
        debug!(title = %metadata.title, topic_count = metadata.topics.len(), "Metadata extracted");

        Ok(HandlerOutput::new(serde_json::to_value(&metadata)?)
            .with_usage(completion.usage_report(JobType::Metadata.feature())))
    }
}
