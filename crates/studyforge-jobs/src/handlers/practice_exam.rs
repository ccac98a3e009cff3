//! Practice-exam synthesis from plan topics and course material.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use studyforge_core::{
    defaults, CompletionProvider, CompletionRequest, Error, JobType, PracticeQuestion, Result,
    SourceDocument, Tokenizer,
};

use super::parse::parse_list;
use super::HandlerConfig;
use crate::chunker::join_sources;
use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const SYSTEM_PROMPT: &str = "You write practice exams. Write exam-style questions with model \
answers that test understanding rather than recall of wording. Mirror the style of any past \
exam material provided. Respond with JSON only: {\"questions\": [{\"prompt\": string, \
\"answer\": string, \"topicTitle\": string}]}.";

#[derive(Debug, Deserialize)]
struct Topic {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PracticeExamPayload {
    #[serde(default)]
    topics: Vec<Topic>,
    #[serde(default)]
    sources: Vec<SourceDocument>,
    #[serde(default)]
    question_count: Option<usize>,
}

impl PracticeExamPayload {
    fn question_count(&self) -> usize {
        self.question_count
            .unwrap_or(defaults::PRACTICE_EXAM_QUESTIONS)
            .clamp(1, defaults::PRACTICE_EXAM_MAX_QUESTIONS)
    }
}

/// Generates practice questions with model answers.
pub struct PracticeExamHandler {
    provider: Arc<dyn CompletionProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    config: HandlerConfig,
}

impl PracticeExamHandler {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            provider,
            tokenizer,
            config,
        }
    }

    fn prompt(&self, payload: &PracticeExamPayload, count: usize) -> String {
        let mut prompt = format!("Write exactly {count} questions.\n\n");

        if !payload.topics.is_empty() {
            prompt.push_str("Topics to cover:\n");
            for topic in &payload.topics {
                if topic.description.trim().is_empty() {
                    prompt.push_str(&format!("- {}\n", topic.title.trim()));
                } else {
                    prompt.push_str(&format!(
                        "- {}: {}\n",
                        topic.title.trim(),
                        topic.description.trim()
                    ));
                }
            }
            prompt.push('\n');
        }

        let doc = join_sources(&payload.sources);
        // Past exams first so truncation keeps them.
        let material = format!("{}{}", doc.past_exam_text, doc.text);
        let material = self
            .tokenizer
            .truncate_to_tokens(material.trim(), self.config.practice_exam_source_tokens);
        if !material.is_empty() {
            prompt.push_str("Course material:\n");
            prompt.push_str(material);
        }
        prompt
    }
}

fn is_usable(question: &PracticeQuestion) -> bool {
    !question.prompt.trim().is_empty() && !question.answer.trim().is_empty()
}

#[async_trait]
impl TaskHandler for PracticeExamHandler {
    fn job_type(&self) -> JobType {
        JobType::PracticeExam
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "practice_exam", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let payload: PracticeExamPayload = ctx.payload_as()?;
        let has_sources = payload.sources.iter().any(|s| !s.text.trim().is_empty());
        if payload.topics.is_empty() && !has_sources {
            return Err(Error::InvalidInput(
                "Practice exam needs topics or source material".to_string(),
            ));
        }
        let count = payload.question_count();

        let request = CompletionRequest::new()
            .system(SYSTEM_PROMPT)
            .user(self.prompt(&payload, count))
            .json();
        let completion = self.provider.complete(request).await?;

        let (questions, degraded) =
            match parse_list::<PracticeQuestion>(&completion.message, "questions") {
                Some(list) => {
                    let mut questions: Vec<PracticeQuestion> =
                        list.into_iter().filter(is_usable).collect();
                    questions.truncate(count);
                    (questions, false)
                }
                None => {
                    warn!(
                        response_len = completion.message.len(),
                        "Unparseable practice exam output, returning no questions"
                    );
                    (Vec::new(), true)
                }
            };

        debug!(requested = count, generated = questions.len(), degraded, "Practice exam generated");

        let report = completion
            .usage_report(JobType::PracticeExam.feature())
            .with_metadata(json!({"requested": count, "generated": questions.len()}));
        Ok(HandlerOutput::new(json!({
            "questions": questions,
            "degraded": degraded,
        }))
        .with_usage(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyforge_core::EstimatingTokenizer;
    use studyforge_inference::mock::MockProvider;

    fn handler(source_tokens: usize) -> PracticeExamHandler {
        let mut config = HandlerConfig::default();
        config.practice_exam_source_tokens = source_tokens;
        PracticeExamHandler::new(Arc::new(MockProvider::new()), Arc::new(EstimatingTokenizer), config)
    }

    fn payload(value: serde_json::Value) -> PracticeExamPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_question_count_clamped() {
        assert_eq!(payload(json!({})).question_count(), 10);
        assert_eq!(payload(json!({"questionCount": 0})).question_count(), 1);
        assert_eq!(payload(json!({"questionCount": 500})).question_count(), 50);
    }

    #[test]
    fn test_prompt_includes_topics_and_past_exams() {
        let p = payload(json!({
            "topics": [{"title": "Osmosis", "description": "Water movement"}],
            "sources": [
                {"filename": "notes.pdf", "text": "Cell membranes"},
                {"filename": "final.pdf", "text": "Q1. Define osmosis.", "isPastExam": true}
            ]
        }));
        let prompt = handler(1000).prompt(&p, 5);
        assert!(prompt.starts_with("Write exactly 5 questions."));
        assert!(prompt.contains("- Osmosis: Water movement"));
        assert!(prompt.contains("Q1. Define osmosis."));
        assert!(prompt.contains("Cell membranes"));
    }

    #[test]
    fn test_source_material_truncated() {
        let long = "photosynthesis ".repeat(5000);
        let p = payload(json!({"sources": [{"filename": "book.pdf", "text": long}]}));
        let prompt = handler(100).prompt(&p, 3);
        assert!(prompt.len() < long.len() / 4);
    }

    #[test]
    fn test_blank_questions_dropped() {
        let q = |prompt: &str, answer: &str| PracticeQuestion {
            prompt: prompt.into(),
            answer: answer.into(),
            topic_title: None,
            source: "generated".into(),
        };
        assert!(is_usable(&q("Define osmosis", "Diffusion of water")));
        assert!(!is_usable(&q(" ", "x")));
        assert!(!is_usable(&q("x", "")));
    }
}
