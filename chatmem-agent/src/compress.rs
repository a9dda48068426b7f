//! Background window compaction.
//!
//! Jobs reload the session from their own connection and write back with a
//! compare-and-swap against the version captured at enqueue time. A job whose
//! session moved on is skipped before the summarizer is called.

use std::collections::HashSet;
use std::sync::Arc;

use chatmem_core::config::PersistenceConfig;
use chatmem_core::error::{ChatmemError, Result};
use chatmem_core::metrics::spans;
use chatmem_core::summarizer::Summarizer;
use chatmem_core::window::ShortTermWindow;
use chatmem_core::worker::BatchHandler;
use tracing::{debug, info, info_span, warn};

use crate::payload::RunContext;
use crate::source::LazyStore;

/// Result of one compaction job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressOutcome {
    /// The window was summarized and written back.
    Compacted {
        /// Turns before compaction.
        before: usize,
        /// Turns after compaction.
        after: usize,
    },
    /// The stored window is within the threshold.
    NotNeeded,
    /// The session no longer exists.
    Missing,
    /// A newer write happened after the job was enqueued.
    Stale {
        /// Version the job captured.
        captured: u64,
        /// Version found in the store.
        stored: u64,
    },
    /// The session moved while the summarizer was running; result discarded.
    Conflict,
}

/// [`BatchHandler`] running compaction jobs.
pub struct CompressHandler {
    store: LazyStore,
    window: ShortTermWindow,
    summarizer: Arc<dyn Summarizer>,
}

impl CompressHandler {
    /// Handler writing to the database named by `persistence`.
    #[must_use]
    pub fn new(
        persistence: PersistenceConfig,
        window: ShortTermWindow,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            store: LazyStore::new(persistence),
            window,
            summarizer,
        }
    }

    /// Run one job.
    ///
    /// # Errors
    /// Store and summarizer failures.
    pub fn compress_one(&mut self, job: &RunContext) -> Result<CompressOutcome> {
        let store = self.store.get()?;
        let session = &job.session_id;

        let (context, stored) = store.load(session)?;
        let Some(context) = context else {
            return Ok(CompressOutcome::Missing);
        };
        let captured = job.state.version;
        if stored != captured {
            return Ok(CompressOutcome::Stale { captured, stored });
        }

        let before = context.turns.len();
        let Some(patch) =
            self.window
                .compress(&context.turns, &context.summary, self.summarizer.as_ref())?
        else {
            return Ok(CompressOutcome::NotNeeded);
        };

        if store.save_if_version(session, &patch.turns, &patch.summary, captured)? {
            Ok(CompressOutcome::Compacted {
                before,
                after: patch.turns.len(),
            })
        } else {
            Ok(CompressOutcome::Conflict)
        }
    }
}

impl BatchHandler<RunContext> for CompressHandler {
    fn process(&mut self, batch: Vec<RunContext>) -> Result<()> {
        let mut first_error: Option<ChatmemError> = None;
        for job in batch {
            let span = info_span!(spans::COMPRESS, session = %job.session_id);
            let _entered = span.enter();
            match self.compress_one(&job) {
                Ok(CompressOutcome::Compacted { before, after }) => {
                    info!(before, after, "session window compacted");
                }
                Ok(CompressOutcome::Stale { captured, stored }) => {
                    debug!(captured, stored, "compaction skipped: session moved on");
                }
                Ok(CompressOutcome::Conflict) => {
                    warn!("compaction discarded: version changed during summarization");
                }
                Ok(outcome) => debug!(?outcome, "nothing to compact"),
                Err(e) => {
                    warn!(error = %e, "compaction failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Keep only the newest job per session, in the order those jobs arrived.
    fn merge(&mut self, batch: Vec<RunContext>) -> Vec<RunContext> {
        let mut seen = HashSet::new();
        let mut newest: Vec<RunContext> = batch
            .into_iter()
            .rev()
            .filter(|job| seen.insert(job.session_id.clone()))
            .collect();
        newest.reverse();
        newest
    }
}
