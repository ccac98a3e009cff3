//! Study-plan generation from chunked course material.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, trace, warn};

use studyforge_core::{
    defaults, CompletionProvider, CompletionRequest, Error, JobType, PlanCandidate, Result,
    SourceDocument, StudyPlanEntry, TokenUsage, Tokenizer, UsageReport,
};

use super::parse::parse_list;
use super::HandlerConfig;
use crate::chunker::{join_sources, Chunk, DocumentChunker};
use crate::handler::{HandlerOutput, JobContext, TaskHandler};

const SYSTEM_PROMPT: &str = "You are an expert study planner. Read the course material and \
propose study-plan entries covering it. Respond with JSON only, in the form \
{\"entries\": [{\"title\": string, \"description\": string, \"keyConcepts\": [string], \
\"category\": string, \"importanceTier\": \"core\" | \"high-yield\" | \"stretch\", \
\"priorityScore\": number from 0 to 100}]}. Topics that appear on past exams deserve a \
higher tier and score.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanPayload {
    #[serde(default)]
    sources: Vec<SourceDocument>,
    #[serde(default)]
    instructor_notes: Option<String>,
    #[serde(default)]
    course_name: Option<String>,
}

/// Prompt material shared by every chunk of one job.
struct SharedPrompt {
    course_name: Option<String>,
    instructor_notes: Option<String>,
    past_exam_text: String,
}

/// What one chunk contributed.
struct ChunkOutcome {
    candidates: Vec<PlanCandidate>,
    model: Option<String>,
    usage: Option<TokenUsage>,
    input_cost_usd: f64,
    output_cost_usd: f64,
    degraded: bool,
    error: Option<Error>,
}

impl ChunkOutcome {
    fn fallback(error: Option<Error>) -> Self {
        Self {
            candidates: vec![PlanCandidate::fallback()],
            model: None,
            usage: None,
            input_cost_usd: 0.0,
            output_cost_usd: 0.0,
            degraded: true,
            error,
        }
    }
}

/// Merge per-chunk candidates into the final ordered plan.
///
/// Chunks are taken in document order. Titles are deduplicated
/// case-insensitively (first occurrence wins), then entries are sorted by
/// tier rank, score descending and insertion order, and numbered from 1.
/// Never returns an empty plan.
pub fn merge_candidates(per_chunk: Vec<Vec<PlanCandidate>>) -> Vec<StudyPlanEntry> {
    let mut seen = HashSet::new();
    let mut merged: Vec<PlanCandidate> = per_chunk
        .into_iter()
        .flatten()
        .filter_map(PlanCandidate::normalized)
        .filter(|c| seen.insert(c.title.to_lowercase()))
        .collect();

    if merged.is_empty() {
        merged.push(PlanCandidate::fallback());
    }
    // Stable sort keeps insertion order for ties.
    merged.sort_by(|a, b| a.merge_cmp(b));

    merged
        .into_iter()
        .enumerate()
        .map(|(i, candidate)| StudyPlanEntry {
            order: i + 1,
            candidate,
        })
        .collect()
}

/// Generates a study plan, one provider call per chunk.
pub struct PlanHandler {
    provider: Arc<dyn CompletionProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    config: HandlerConfig,
}

impl PlanHandler {
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

    fn chunk_prompt(shared: &SharedPrompt, chunk: &Chunk, total: usize) -> String {
        let mut prompt = String::new();
        if let Some(ref course) = shared.course_name {
            prompt.push_str(&format!("Course: {course}\n"));
        }
        prompt.push_str(&format!(
            "This is chunk {} of {} of the course material.\n\n",
            chunk.index + 1,
            total
        ));
        prompt.push_str(&format!("Goal: {}\n\n", defaults::PASSING_THRESHOLD_POLICY));
        if let Some(ref notes) = shared.instructor_notes {
            prompt.push_str(&format!("Instructor notes:\n{notes}\n\n"));
        }
        if !shared.past_exam_text.is_empty() {
            prompt.push_str(&format!("Past exam material:\n{}\n\n", shared.past_exam_text));
        }
        if !chunk.sources.is_empty() {
            prompt.push_str(&format!("Source files: {}\n", chunk.sources.join(", ")));
        }
        prompt.push_str("Course material:\n");
        prompt.push_str(&chunk.text);
        prompt
    }

    async fn analyze_chunk(
        &self,
        ctx: &JobContext,
        shared: &SharedPrompt,
        chunk: &Chunk,
        total: usize,
        completed: &AtomicUsize,
    ) -> ChunkOutcome {
        trace!(
            chunk_index = chunk.index,
            token_count = chunk.token_count,
            "Analyzing chunk"
        );
        let request = CompletionRequest::new()
            .system(SYSTEM_PROMPT)
            .user(Self::chunk_prompt(shared, chunk, total))
            .json();

        let outcome = match self.provider.complete(request).await {
            Ok(completion) => {
                let parsed = parse_list::<PlanCandidate>(&completion.message, "entries")
                    .map(|list| {
                        list.into_iter()
                            .filter_map(PlanCandidate::normalized)
                            .collect::<Vec<_>>()
                    })
                    .filter(|list| !list.is_empty());
                let degraded = parsed.is_none();
                if degraded {
                    warn!(
                        chunk_index = chunk.index,
                        response_len = completion.message.len(),
                        "Unparseable chunk output, using fallback entry"
                    );
                }
                ChunkOutcome {
                    candidates: parsed.unwrap_or_else(|| vec![PlanCandidate::fallback()]),
                    model: Some(completion.model),
                    usage: completion.usage,
                    input_cost_usd: completion.input_cost_usd,
                    output_cost_usd: completion.output_cost_usd,
                    degraded,
                    error: None,
                }
            }
            Err(e) => {
                warn!(
                    chunk_index = chunk.index,
                    error = %e,
                    "Chunk analysis failed, using fallback entry"
                );
                ChunkOutcome::fallback(Some(e))
            }
        };

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        let progress = format!("Analyzed chunk {done} of {total}");
        if let Err(e) = ctx.write_partial(&progress).await {
            warn!(error = %e, "Failed to write plan progress");
        }
        outcome
    }
}

#[async_trait]
impl TaskHandler for PlanHandler {
    fn job_type(&self) -> JobType {
        JobType::Plan
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "plan", op = "execute", job_id = %ctx.job_id())
    )]
    async fn execute(&self, ctx: &JobContext) -> Result<HandlerOutput> {
        let start = Instant::now();
        let payload: PlanPayload = ctx.payload_as()?;

        let doc = join_sources(&payload.sources);
        let chunker = DocumentChunker::new(self.tokenizer.clone(), self.config.plan_chunk_tokens);
        let chunks = chunker.chunk_document(&doc);
        let total = chunks.len();

        let shared = SharedPrompt {
            course_name: payload.course_name.filter(|s| !s.trim().is_empty()),
            instructor_notes: payload.instructor_notes.filter(|s| !s.trim().is_empty()),
            past_exam_text: self
                .tokenizer
                .truncate_to_tokens(doc.past_exam_text.trim(), self.config.plan_past_exam_tokens)
                .to_string(),
        };

        debug!(
            chunk_count = total,
            concurrency = self.config.plan_chunk_concurrency,
            past_exam_tokens = self.tokenizer.count_tokens(&shared.past_exam_text),
            "Starting plan generation"
        );

        let completed = AtomicUsize::new(0);
        // `buffered` yields in input order, so outcomes line up with chunk indices.
        let pending: Vec<_> = chunks
            .iter()
            .map(|chunk| self.analyze_chunk(ctx, &shared, chunk, total, &completed).boxed())
            .collect();
        let outcomes: Vec<ChunkOutcome> = futures::stream::iter(pending)
            .buffered(self.config.plan_chunk_concurrency.max(1))
            .collect()
            .await;

        // Nothing to merge if every call failed; surface the provider error.
        if outcomes.iter().all(|o| o.error.is_some()) {
            let first = outcomes.into_iter().find_map(|o| o.error);
            return Err(first.unwrap_or_else(|| Error::Inference("Plan generation failed".into())));
        }

        let mut usage: Option<TokenUsage> = None;
        let (mut input_cost, mut output_cost) = (0.0, 0.0);
        let mut model = None;
        let mut degraded_chunks = 0;
        let mut per_chunk = Vec::with_capacity(total);
        for outcome in outcomes {
            if let Some(u) = outcome.usage {
                *usage.get_or_insert_with(TokenUsage::default) += u;
            }
            input_cost += outcome.input_cost_usd;
            output_cost += outcome.output_cost_usd;
            if model.is_none() {
                model = outcome.model;
            }
            if outcome.degraded {
                degraded_chunks += 1;
            }
            per_chunk.push(outcome.candidates);
        }

        let entries = merge_candidates(per_chunk);
        let model = model.unwrap_or_else(|| self.provider.chat_model().to_string());

        info!(
            chunk_count = total,
            degraded_chunks,
            entry_count = entries.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Study plan generated"
        );

        let report = UsageReport::new(JobType::Plan.feature(), model)
            .with_tokens(usage)
            .with_cost(input_cost, output_cost)
            .with_metadata(json!({"chunkCount": total, "degradedChunks": degraded_chunks}));

        Ok(HandlerOutput::new(json!({
            "entries": entries,
            "chunkCount": total,
            "degradedChunks": degraded_chunks,
        }))
        .with_usage(report))
    }
}
