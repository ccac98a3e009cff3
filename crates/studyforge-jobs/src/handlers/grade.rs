//! Answer grading, text and handwritten.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use studyforge_core::{
    CompletionProvider, CompletionRequest, ContentPart, Error, GradeFeedback, JobType, Result,
};

use super::parse::parse_lenient;
use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const SYSTEM_PROMPT: &str = "You grade student answers. Compare the answer with the question \
and any reference answer or rubric. Respond with JSON only: {\"summary\": string, \
\"correctness\": \"correct\" | \"partially_correct\" | \"incorrect\", \"score\": number, \
\"improvements\": [string]}. If the answer is an image of handwriting, read it first.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Question {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    reference_answer: Option<String>,
    #[serde(default)]
    rubric: Option<String>,
    #[serde(default)]
    max_score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Answer {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    image_mime_type: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

impl Answer {
    fn image(&self) -> Option<ContentPart> {
        if let Some(data) = self.image_base64.as_deref().filter(|d| !d.trim().is_empty()) {
            let mime = self.image_mime_type.as_deref().unwrap_or("image/png");
            return Some(ContentPart::inline_image(mime, data.trim()));
        }
        self.image_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(ContentPart::image_url)
    }

    fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct GradePayload {
    question: Question,
    #[serde(default)]
    answer: Answer,
}

impl GradePayload {
    fn prompt_text(&self) -> String {
        let q = &self.question;
        let mut text = format!("Question:\n{}\n", q.prompt.trim());
        if let Some(ref reference) = q.reference_answer {
            text.push_str(&format!("\nReference answer:\n{reference}\n"));
        }
        if let Some(ref rubric) = q.rubric {
            text.push_str(&format!("\nRubric:\n{rubric}\n"));
        }
        if let Some(max) = q.max_score {
            text.push_str(&format!("\nScore out of {max}.\n"));
        }
        match self.answer.text() {
            Some(answer) => text.push_str(&format!("\nStudent answer:\n{answer}\n")),
            None => text.push_str("\nThe student's answer is in the attached image.\n"),
        }
        text
    }
}

/// Grades a free-text or image answer against its question.
pub struct GradeHandler {
    provider: Arc<dyn CompletionProvider>,
}

impl GradeHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl TaskHandler for GradeHandler {
    fn job_type(&self) -> JobType {
        JobType::Grade
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "grade", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: GradePayload = ctx.payload_as()?;
        if payload.question.prompt.trim().is_empty() {
            return Err(Error::InvalidInput("Question prompt is required".to_string()));
        }
        let image = payload.answer.image();
        if payload.answer.text().is_none() && image.is_none() {
            return Err(Error::InvalidInput(
                "Answer text or an answer image is required".to_string(),
            ));
        }

        let mut parts = vec![ContentPart::text(payload.prompt_text())];
        parts.extend(image);
        let request = CompletionRequest::new()
            .system(SYSTEM_PROMPT)
            .user_parts(parts)
            .json();

        let completion = self.provider.complete(request).await?;
        let feedback = match parse_lenient::<GradeFeedback>(&completion.message) {
            Some(mut feedback) => {
                if let (Some(score), Some(max)) = (feedback.score, payload.question.max_score) {
                    feedback.score = Some(score.clamp(0.0, max.max(0.0)));
                }
                debug!(correctness = %feedback.correctness, "Answer graded");
                feedback
            }
            None => {
                warn!(
                    response_len = completion.message.len(),
                    "Unparseable grading output, returning raw feedback"
                );
                GradeFeedback::unparsed(&completion.message)
            }
        };

        Ok(HandlerOutput::new(serde_json::to_value(&feedback)?)
            .with_usage(completion.usage_report(JobType::Grade.feature())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> GradePayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_inline_image_preferred_over_url() {
        let p = payload(json!({
            "question": {"prompt": "Draw a cell"},
            "answer": {"imageBase64": "AAAA", "imageMimeType": "image/jpeg", "imageUrl": "https://x/y.png"}
        }));
        assert_eq!(p.answer.image(), Some(ContentPart::inline_image("image/jpeg", "AAAA")));
    }

    #[test]
    fn test_prompt_mentions_image_when_no_text() {
        let p = payload(json!({
            "question": {"prompt": "Define osmosis", "maxScore": 5},
            "answer": {"imageUrl": "https://cdn/answer.png"}
        }));
        let text = p.prompt_text();
        assert!(text.contains("Define osmosis"));
        assert!(text.contains("Score out of 5"));
        assert!(text.contains("attached image"));
    }

    #[test]
    fn test_blank_answer_text_is_absent() {
        let p = payload(json!({"question": {"prompt": "Q"}, "answer": {"text": "   "}}));
        assert!(p.answer.text().is_none());
        assert!(p.answer.image().is_none());
    }
}
