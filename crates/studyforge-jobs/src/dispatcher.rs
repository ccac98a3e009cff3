//! Job-type dispatch.

use std::sync::Arc;

use tracing::debug;

use studyforge_core::{CompletionProvider, Job, JobType, Result, Tokenizer};

use crate::handler::TaskHandler;
use crate::handlers::{
    ChatHandler, EmbedHandler, GradeHandler, HandlerConfig, MetadataHandler, PlanHandler,
    PracticeExamHandler, TranscribeHandler,
};

/// Maps every [`JobType`] to its handler.
///
/// Handlers are built once and shared across jobs. The match in
/// [`Dispatcher::handler`] is exhaustive, so adding a job type without a
/// handler is a compile error.
#[derive(Clone)]
pub struct Dispatcher {
    plan: Arc<PlanHandler>,
    chat: Arc<ChatHandler>,
    grade: Arc<GradeHandler>,
    transcribe: Arc<TranscribeHandler>,
    embed: Arc<EmbedHandler>,
    practice_exam: Arc<PracticeExamHandler>,
    metadata: Arc<MetadataHandler>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        config: HandlerConfig,
    ) -> Self {
        Self {
            plan: Arc::new(PlanHandler::new(provider.clone(), tokenizer.clone(), config.clone())),
            chat: Arc::new(ChatHandler::new(provider.clone(), config.clone())),
            grade: Arc::new(GradeHandler::new(provider.clone())),
            transcribe: Arc::new(TranscribeHandler::new(provider.clone())),
            embed: Arc::new(EmbedHandler::new(provider.clone())),
            practice_exam: Arc::new(PracticeExamHandler::new(provider.clone(), tokenizer, config)),
            metadata: Arc::new(MetadataHandler::new(provider)),
        }
    }

    pub fn handler(&self, job_type: JobType) -> Arc<dyn TaskHandler> {
        match job_type {
            JobType::Plan => self.plan.clone(),
            JobType::Chat => self.chat.clone(),
            JobType::Grade => self.grade.clone(),
            JobType::Transcribe => self.transcribe.clone(),
            JobType::Embed => self.embed.clone(),
            JobType::PracticeExam => self.practice_exam.clone(),
            JobType::Metadata => self.metadata.clone(),
        }
    }

    /// Handler for a job's declared type.
    ///
    /// Fails with `UnknownJobType` for a type outside the closed set.
    pub fn resolve(&self, job: &Job) -> Result<Arc<dyn TaskHandler>> {
        let job_type = job.kind()?;
        debug!(
            subsystem = "jobs",
            component = "dispatcher",
            job_id = %job.id,
            job_type = %job_type,
            "Dispatching job"
        );
        Ok(self.handler(job_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studyforge_core::{EstimatingTokenizer, Error};
    use studyforge_inference::mock::MockProvider;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MockProvider::new()),
            Arc::new(EstimatingTokenizer),
            HandlerConfig::default(),
        )
    }

    #[test]
    fn test_every_type_has_matching_handler() {
        let d = dispatcher();
        for job_type in JobType::ALL {
            assert_eq!(d.handler(job_type).job_type(), job_type);
        }
    }

    #[test]
    fn test_resolve_by_declared_type() {
        let job = Job::new_pending("student-1", "practice_exam", json!({}));
        assert_eq!(dispatcher().resolve(&job).unwrap().job_type(), JobType::PracticeExam);
    }

    #[test]
    fn test_unknown_type() {
        let job = Job::new_pending("student-1", "summarize", json!({}));
        let err = dispatcher().resolve(&job).err().unwrap();
        assert!(matches!(err, Error::UnknownJobType(ref t) if t == "summarize"));
    }
}
