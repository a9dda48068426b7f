//! The per-turn memory pipeline.
//!
//! ```text
//! begin_turn(session)   ── KeyedLock::acquire, private ContextStore, load
//!   push(turn) ...
//! commit()              ── save ─┬─ overflow? ── emit → compress worker
//!                                └─ always    ── emit → extract worker
//! ```
//!
//! The foreground holds the session lock for the whole turn. Background
//! workers never take it; they reconcile through the store's version check.

use std::sync::Arc;
use std::time::Instant;

use chatmem_core::config::ChatmemConfig;
use chatmem_core::error::{ChatmemError, Result};
use chatmem_core::lock::{KeyedGuard, KeyedLock};
use chatmem_core::long_term::LongTermMemory;
use chatmem_core::metrics::spans;
use chatmem_core::observer::SharedObserver;
use chatmem_core::persistence::ContextStore;
use chatmem_core::summarizer::Summarizer;
use chatmem_core::types::{SessionId, Turn};
use chatmem_core::window::ShortTermWindow;
use chatmem_core::worker::{BackgroundWorker, QueueStats, WorkerOptions};
use tracing::{debug, info, info_span, warn};

use crate::compress::CompressHandler;
use crate::extract::ExtractHandler;
use crate::maintain::MaintainHandler;
use crate::payload::{CapturedState, RunContext};
use crate::source::IndexSource;

/// What [`TurnSession::commit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    /// Version written by the save.
    pub version: u64,
    /// Turns stored.
    pub turns: usize,
    /// A compaction job was enqueued.
    pub compaction_scheduled: bool,
    /// An extraction job was enqueued.
    pub extraction_scheduled: bool,
}

/// Queue depth of each background worker.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Compaction worker.
    pub compress: QueueStats,
    /// Extraction worker.
    pub extract: QueueStats,
    /// Maintenance worker.
    pub maintain: QueueStats,
}

/// Conversation memory for an agent: locked foreground turns plus the
/// compaction, extraction and maintenance workers.
pub struct ChatMemory<S: IndexSource> {
    config: ChatmemConfig,
    lock: KeyedLock,
    window: ShortTermWindow,
    source: Arc<S>,
    compress: BackgroundWorker<RunContext, CompressHandler>,
    extract: BackgroundWorker<RunContext, ExtractHandler<S>>,
    maintain: BackgroundWorker<SessionId, MaintainHandler<S>>,
}

impl<S: IndexSource> ChatMemory<S> {
    /// Wire the pipeline. Workers are created stopped; call [`Self::start`].
    ///
    /// # Errors
    /// [`ChatmemError::InvalidWindow`] or [`ChatmemError::Config`] when the
    /// configuration does not validate.
    pub fn new(
        config: ChatmemConfig,
        source: S,
        summarizer: Arc<dyn Summarizer>,
        observer: SharedObserver,
    ) -> Result<Self> {
        config.validate()?;
        let source = Arc::new(source);

        let mut window = ShortTermWindow::from_config(&config.window)?;
        if let Some(instruction) = &config.prompts.compress {
            window = window.with_instruction(instruction.clone());
        }

        let compress = BackgroundWorker::with_observer(
            WorkerOptions::from_config("compress", &config.workers),
            CompressHandler::new(config.persistence.clone(), window.clone(), Arc::clone(&summarizer)),
            Arc::clone(&observer),
        );

        let mut extract_handler = ExtractHandler::new(
            Arc::clone(&source),
            config.long_term.clone(),
            Arc::clone(&summarizer),
            config.extraction.recent_turns,
        );
        if let Some(instruction) = &config.prompts.extract {
            extract_handler = extract_handler.with_instruction(instruction.clone());
        }
        let extract = BackgroundWorker::with_observer(
            WorkerOptions::from_config("extract", &config.workers),
            extract_handler,
            Arc::clone(&observer),
        );

        let mut maintain_handler =
            MaintainHandler::new(Arc::clone(&source), config.long_term.clone(), summarizer);
        if let Some(instruction) = &config.prompts.consolidate {
            maintain_handler = maintain_handler.with_consolidate_instruction(instruction.clone());
        }
        let maintain = BackgroundWorker::with_observer(
            WorkerOptions::from_config("maintain", &config.workers),
            maintain_handler,
            Arc::clone(&observer),
        );

        Ok(Self {
            lock: KeyedLock::with_observer(observer),
            window,
            source,
            compress,
            extract,
            maintain,
            config,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ChatmemConfig {
        &self.config
    }

    /// The foreground session lock.
    #[must_use]
    pub fn lock(&self) -> &KeyedLock {
        &self.lock
    }

    /// Start every background worker. Idempotent.
    ///
    /// # Errors
    /// Returns an error if a worker thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        self.compress.start()?;
        self.extract.start()?;
        self.maintain.start()?;
        info!("chatmem pipeline started");
        Ok(())
    }

    /// Stop every worker, draining queues when `drain_on_stop` is set.
    ///
    /// All workers are asked to stop even if one fails; the first failure is
    /// returned.
    ///
    /// # Errors
    /// [`ChatmemError::StopTimeout`] when a worker outlives
    /// `workers.stop_timeout_ms`, [`ChatmemError::WorkerPanic`] when its
    /// thread died.
    pub fn shutdown(&self) -> Result<()> {
        let timeout = self.config.workers.stop_timeout();
        let results = [
            self.compress.stop(timeout),
            self.extract.stop(timeout),
            self.maintain.stop(timeout),
        ];
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "worker failed to stop cleanly");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!("chatmem pipeline stopped");
                Ok(())
            }
        }
    }

    /// Begin a turn: take the session lock, open a private connection and
    /// load the stored history. The lock is held until the returned session
    /// is committed or dropped.
    ///
    /// # Errors
    /// Store failures.
    pub fn begin_turn(&self, session: &SessionId) -> Result<TurnSession<'_, S>> {
        let guard = self.lock.acquire(session.as_str());
        let store = ContextStore::open(&self.config.persistence.db_path, &self.config.persistence)?;
        let (context, version) = store.load(session)?;
        let (turns, summary) = context.map_or_else(Default::default, |c| (c.turns, c.summary));
        debug!(session = %session, turns = turns.len(), version, "turn started");
        Ok(TurnSession {
            memory: self,
            _guard: guard,
            store,
            session: session.clone(),
            turns,
            summary,
            started: Instant::now(),
        })
    }

    /// Long-term facts relevant to `query`, strongest first. Uses
    /// `long_term.search_limit` when `limit` is `None`.
    ///
    /// Each call opens its own index handle.
    ///
    /// # Errors
    /// Index failures.
    pub fn recall(
        &self,
        session: &SessionId,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>> {
        let limit = limit.unwrap_or(self.config.long_term.search_limit);
        LongTermMemory::new(self.source.open()?, self.config.long_term.clone())
            .search(query, session, limit)
    }

    /// Recall using the text of the newest turn as the query.
    ///
    /// # Errors
    /// Index failures.
    pub fn recall_for(&self, session: &SessionId, turns: &[Turn]) -> Result<Vec<String>> {
        match turns.last() {
            Some(turn) => self.recall(session, &turn.text, None),
            None => Ok(Vec::new()),
        }
    }

    /// Enqueue a prune + consolidate pass. Returns `false` when maintenance
    /// is disabled or the queue is full.
    pub fn schedule_maintenance(&self, session: &SessionId) -> bool {
        if !self.config.maintenance.enabled {
            return false;
        }
        emit_or_warn(self.maintain.emit(session.clone()))
    }

    /// Queue statistics for every worker.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            compress: self.compress.stats(),
            extract: self.extract.stats(),
            maintain: self.maintain.stats(),
        }
    }
}

fn emit_or_warn(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e @ ChatmemError::QueueFull { .. }) => {
            warn!(error = %e, "background job dropped");
            false
        }
        Err(e) => {
            warn!(error = %e, "background job not scheduled");
            false
        }
    }
}

/// One locked foreground turn.
pub struct TurnSession<'a, S: IndexSource> {
    memory: &'a ChatMemory<S>,
    _guard: KeyedGuard,
    store: ContextStore,
    session: SessionId,
    turns: Vec<Turn>,
    summary: String,
    started: Instant,
}

impl<S: IndexSource> TurnSession<'_, S> {
    /// Session this turn belongs to.
    #[must_use]
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Stored history plus anything pushed so far.
    #[must_use]
    pub fn history(&self) -> &[Turn] {
        &self.turns
    }

    /// Running summary as loaded.
    #[must_use]
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Save the history, schedule background work and release the lock.
    ///
    /// A full queue does not fail the commit; the job is dropped with a
    /// warning.
    ///
    /// # Errors
    /// Store failures. Nothing is scheduled when the save fails.
    pub fn commit(self) -> Result<CommitReport> {
        let span = info_span!(spans::TURN, session = %self.session);
        let _entered = span.enter();

        let version = self.store.save(&self.session, &self.turns, &self.summary)?;
        let memory = self.memory;
        let overflow = memory.window.overflow(&self.turns);
        let turns = self.turns.len();

        let job = RunContext::new(
            self.session.clone(),
            CapturedState {
                turns: self.turns,
                summary: self.summary,
                version,
            },
        );

        let compaction_scheduled = overflow && emit_or_warn(memory.compress.emit(job.clone()));
        let extraction_scheduled =
            memory.config.extraction.enabled && emit_or_warn(memory.extract.emit(job));

        debug!(
            version,
            turns,
            compaction_scheduled,
            extraction_scheduled,
            elapsed_us = u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX),
            "turn committed"
        );
        Ok(CommitReport {
            version,
            turns,
            compaction_scheduled,
            extraction_scheduled,
        })
    }
}
