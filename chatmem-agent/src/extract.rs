//! Background fact extraction into long-term memory.

use std::sync::Arc;

use chatmem_core::config::LongTermConfig;
use chatmem_core::error::{ChatmemError, Result};
use chatmem_core::long_term::{LongTermMemory, PutOutcome};
use chatmem_core::metrics::spans;
use chatmem_core::summarizer::{Summarizer, parse_string_array};
use chatmem_core::window::render_turns;
use chatmem_core::worker::BatchHandler;
use tracing::{debug, info, info_span, warn};

use crate::payload::RunContext;
use crate::source::IndexSource;

/// Default instruction for pulling durable facts out of recent turns.
pub const EXTRACT_INSTRUCTION: &str = "\
You extract durable facts about the user from a conversation excerpt.
Keep only information worth remembering across conversations: preferences, \
personal details, long-running goals, constraints.
Ignore small talk and anything specific to the current request.
Reply with a JSON array of short, self-contained English statements and \
nothing else. Reply with [] if there is nothing worth keeping.";

/// Facts found in one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// New facts stored.
    pub inserted: usize,
    /// Existing facts reinforced.
    pub reinforced: usize,
}

/// [`BatchHandler`] running extraction jobs.
pub struct ExtractHandler<S: IndexSource> {
    source: Arc<S>,
    config: LongTermConfig,
    memory: Option<LongTermMemory<S::Index>>,
    summarizer: Arc<dyn Summarizer>,
    recent_turns: usize,
    instruction: String,
}

impl<S: IndexSource> ExtractHandler<S> {
    /// Handler looking at the last `recent_turns` turns of each job.
    #[must_use]
    pub fn new(
        source: Arc<S>,
        config: LongTermConfig,
        summarizer: Arc<dyn Summarizer>,
        recent_turns: usize,
    ) -> Self {
        Self {
            source,
            config,
            memory: None,
            summarizer,
            recent_turns,
            instruction: EXTRACT_INSTRUCTION.to_string(),
        }
    }

    /// Replace the extraction instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Run one job.
    ///
    /// # Errors
    /// Summarizer and index failures. A reply that is not a JSON array is
    /// logged and yields an empty report.
    pub fn extract_one(&mut self, job: &RunContext) -> Result<ExtractReport> {
        let turns = &job.state.turns;
        let recent = &turns[turns.len().saturating_sub(self.recent_turns)..];
        if recent.is_empty() {
            return Ok(ExtractReport::default());
        }

        let reply = self
            .summarizer
            .summarize(&self.instruction, &render_turns(recent))?;
        let Some(facts) = parse_string_array(&reply) else {
            warn!(session = %job.session_id, "extraction reply is not a JSON array; skipped");
            return Ok(ExtractReport::default());
        };

        let memory = match self.memory.take() {
            Some(memory) => memory,
            None => LongTermMemory::new(self.source.open()?, self.config.clone()),
        };
        let memory = self.memory.insert(memory);

        let mut report = ExtractReport::default();
        for fact in &facts {
            match memory.put(fact, &job.session_id)? {
                PutOutcome::Inserted { .. } => report.inserted += 1,
                PutOutcome::Reinforced { .. } => report.reinforced += 1,
            }
        }
        Ok(report)
    }
}

impl<S: IndexSource> BatchHandler<RunContext> for ExtractHandler<S> {
    fn process(&mut self, batch: Vec<RunContext>) -> Result<()> {
        let mut first_error: Option<ChatmemError> = None;
        for job in batch {
            let span = info_span!(spans::EXTRACT, session = %job.session_id);
            let _entered = span.enter();
            match self.extract_one(&job) {
                Ok(report) if report.inserted + report.reinforced > 0 => {
                    info!(
                        inserted = report.inserted,
                        reinforced = report.reinforced,
                        "facts extracted"
                    );
                }
                Ok(_) => debug!("no facts extracted"),
                Err(e) => {
                    warn!(error = %e, "fact extraction failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
