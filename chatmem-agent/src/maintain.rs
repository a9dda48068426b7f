//! Background long-term memory upkeep: prune, then consolidate.

use std::collections::HashSet;
use std::sync::Arc;

use chatmem_core::config::LongTermConfig;
use chatmem_core::error::{ChatmemError, Result};
use chatmem_core::long_term::{ConsolidationOutcome, LongTermMemory};
use chatmem_core::metrics::spans;
use chatmem_core::summarizer::Summarizer;
use chatmem_core::types::SessionId;
use chatmem_core::worker::BatchHandler;
use tracing::{info, info_span, warn};

use crate::source::IndexSource;

/// What one maintenance pass did for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Decayed facts deleted.
    pub pruned: usize,
    /// Consolidation result.
    pub consolidation: ConsolidationOutcome,
}

/// [`BatchHandler`] running maintenance passes, one per session.
pub struct MaintainHandler<S: IndexSource> {
    source: Arc<S>,
    config: LongTermConfig,
    memory: Option<LongTermMemory<S::Index>>,
    summarizer: Arc<dyn Summarizer>,
    consolidate_instruction: Option<String>,
}

impl<S: IndexSource> MaintainHandler<S> {
    /// Handler over handles opened from `source`.
    #[must_use]
    pub fn new(source: Arc<S>, config: LongTermConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            source,
            config,
            memory: None,
            summarizer,
            consolidate_instruction: None,
        }
    }

    /// Replace the consolidation instruction.
    #[must_use]
    pub fn with_consolidate_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.consolidate_instruction = Some(instruction.into());
        self
    }

    /// Prune then consolidate one session.
    ///
    /// # Errors
    /// Index and summarizer failures.
    pub fn maintain_one(&mut self, session: &SessionId) -> Result<MaintenanceReport> {
        let memory = match self.memory.take() {
            Some(memory) => memory,
            None => {
                let memory = LongTermMemory::new(self.source.open()?, self.config.clone());
                match &self.consolidate_instruction {
                    Some(instruction) => memory.with_consolidate_instruction(instruction.clone()),
                    None => memory,
                }
            }
        };
        let memory = self.memory.insert(memory);

        let pruned = memory.prune(session)?;
        let consolidation = memory.consolidate(session, self.summarizer.as_ref())?;
        Ok(MaintenanceReport {
            pruned,
            consolidation,
        })
    }
}

impl<S: IndexSource> BatchHandler<SessionId> for MaintainHandler<S> {
    fn process(&mut self, batch: Vec<SessionId>) -> Result<()> {
        let mut first_error: Option<ChatmemError> = None;
        for session in batch {
            let span = info_span!(spans::MAINTAIN, session = %session);
            let _entered = span.enter();
            match self.maintain_one(&session) {
                Ok(report) => info!(
                    pruned = report.pruned,
                    consolidation = ?report.consolidation,
                    "long-term memory maintained"
                ),
                Err(e) => {
                    warn!(error = %e, "maintenance failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn merge(&mut self, mut batch: Vec<SessionId>) -> Vec<SessionId> {
        let mut seen = HashSet::new();
        batch.retain(|session| seen.insert(session.clone()));
        batch
    }
}
