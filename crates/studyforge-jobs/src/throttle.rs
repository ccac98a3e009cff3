//! Throttled `partial_result` writes for streaming handlers.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{trace, warn};

use crate::handler::JobContext;

/// Writes accumulated text at most once per `min_interval`.
///
/// The first offer is written immediately. Later offers are skipped until the
/// interval has elapsed since the previous attempt, successful or not. Store
/// errors are logged and swallowed: a missed progress write never fails the job.
pub struct PartialResultWriter<'a> {
    ctx: &'a JobContext,
    min_interval: Duration,
    last_write: Option<Instant>,
    writes: usize,
}

impl<'a> PartialResultWriter<'a> {
    pub fn new(ctx: &'a JobContext, min_interval: Duration) -> Self {
        Self {
            ctx,
            min_interval,
            last_write: None,
            writes: 0,
        }
    }

    /// Offer the accumulated text; returns whether it was written.
    pub async fn offer(&mut self, accumulated: &str) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_write {
            if now.duration_since(last) < self.min_interval {
                trace!(job_id = %self.ctx.job_id(), "Partial write throttled");
                return false;
            }
        }

        // Failed attempts count toward the interval too.
        self.last_write = Some(now);
        match self.ctx.write_partial(accumulated).await {
            Ok(written) => {
                if written {
                    self.writes += 1;
                }
                written
            }
            Err(e) => {
                warn!(
                    job_id = %self.ctx.job_id(),
                    error = %e,
                    "Failed to write partial result"
                );
                false
            }
        }
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}
