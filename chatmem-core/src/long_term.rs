//! Long-term memory: decaying, self-reinforcing facts per session.
//!
//! Facts live in a [`SemanticIndex`] under `(scope, session)`. Every fact
//! carries a stored strength that only grows through reinforcement; time decay
//! is applied at read time (see [`crate::decay`]). Facts that decay below the
//! strength threshold stop being returned and are removed by [`LongTermMemory::prune`].

use std::sync::Arc;

use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LongTermConfig;
use crate::decay::{effective_strength, is_near_duplicate};
use crate::error::Result;
use crate::index::SemanticIndex;
use crate::summarizer::{CONSOLIDATE_INSTRUCTION, Summarizer, parse_string_array};
use crate::types::{Clock, MemoryItem, Namespace, SessionId, SystemClock};

/// What [`LongTermMemory::put`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new fact was stored.
    Inserted {
        /// Key of the new item.
        key: String,
    },
    /// A near-duplicate already existed and was reinforced instead.
    Reinforced {
        /// Key of the existing item.
        key: String,
    },
}

/// What [`LongTermMemory::consolidate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// `before` items were replaced by `after` fresh ones.
    Consolidated {
        /// Items sent to the summarizer.
        before: usize,
        /// Items stored afterwards.
        after: usize,
    },
    /// Not enough items to be worth a summarizer call.
    TooFew {
        /// Items found.
        count: usize,
    },
    /// The summarizer reply was not a non-empty JSON array of strings. The
    /// store was left untouched.
    Unparseable,
}

/// Decay-scored fact store over a [`SemanticIndex`].
pub struct LongTermMemory<I> {
    index: I,
    config: LongTermConfig,
    clock: Arc<dyn Clock>,
    consolidate_instruction: String,
}

impl<I: SemanticIndex> LongTermMemory<I> {
    /// Store over `index` using wall-clock time.
    #[must_use]
    pub fn new(index: I, config: LongTermConfig) -> Self {
        Self {
            index,
            config,
            clock: Arc::new(SystemClock),
            consolidate_instruction: CONSOLIDATE_INSTRUCTION.to_string(),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the consolidation instruction.
    #[must_use]
    pub fn with_consolidate_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.consolidate_instruction = instruction.into();
        self
    }

    /// The underlying index.
    #[must_use]
    pub fn index(&self) -> &I {
        &self.index
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &LongTermConfig {
        &self.config
    }

    /// Namespace holding `session`'s facts.
    #[must_use]
    pub fn namespace(&self, session: &SessionId) -> Namespace {
        Namespace::new(self.config.scope.clone(), session)
    }

    /// Effective strength of `item` right now.
    #[must_use]
    pub fn effective_strength(&self, item: &MemoryItem) -> f64 {
        effective_strength(item, self.config.decay_rate, self.clock.now())
    }

    /// Remember `content` for `session`.
    ///
    /// If one of the nearest existing facts is a near-duplicate (character
    /// Jaccard above `similarity_threshold`), that fact is reinforced in place
    /// and nothing new is stored.
    ///
    /// # Errors
    /// Index failures propagate.
    pub fn put(&self, content: &str, session: &SessionId) -> Result<PutOutcome> {
        let ns = self.namespace(session);
        let now = self.clock.now();

        let candidates = self
            .index
            .search(&ns, content, self.config.dedup_candidates)?;
        for mut candidate in candidates {
            if is_near_duplicate(content, &candidate.value.content, self.config.similarity_threshold)
            {
                candidate.value.reinforce(self.config.reinforce_delta, now);
                self.index.put(&ns, &candidate.key, &candidate.value)?;
                debug!(
                    namespace = %ns,
                    key = %candidate.key,
                    strength = candidate.value.strength,
                    "reinforced existing memory"
                );
                return Ok(PutOutcome::Reinforced { key: candidate.key });
            }
        }

        let key = Uuid::new_v4().to_string();
        self.index.put(&ns, &key, &MemoryItem::new(content, now))?;
        info!(namespace = %ns, key = %key, "stored new memory");
        Ok(PutOutcome::Inserted { key })
    }

    /// Up to `limit` facts relevant to `query`, strongest first.
    ///
    /// Fetches `limit * search_oversample` candidates, hides any whose
    /// effective strength is below the threshold, and reinforces every fact
    /// it returns.
    ///
    /// # Errors
    /// Index failures propagate.
    pub fn search(&self, query: &str, session: &SessionId, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ns = self.namespace(session);
        let now = self.clock.now();
        let fetch = limit.saturating_mul(self.config.search_oversample.max(1));

        let mut scored: Vec<_> = self
            .index
            .search(&ns, query, fetch)?
            .into_iter()
            .map(|item| {
                let eff = effective_strength(&item.value, self.config.decay_rate, now);
                (OrderedFloat(eff), item)
            })
            .filter(|(eff, _)| eff.0 >= self.config.strength_threshold)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(limit);

        let mut contents = Vec::with_capacity(scored.len());
        for (_, mut item) in scored {
            item.value.reinforce(self.config.reinforce_delta, now);
            self.index.put(&ns, &item.key, &item.value)?;
            contents.push(item.value.content);
        }

        if !contents.is_empty() {
            debug!(namespace = %ns, hits = contents.len(), "recalled memories");
        }
        Ok(contents)
    }

    /// Delete every fact whose effective strength is below the threshold.
    /// Returns the number deleted.
    ///
    /// # Errors
    /// Index failures propagate.
    pub fn prune(&self, session: &SessionId) -> Result<usize> {
        let ns = self.namespace(session);
        let now = self.clock.now();
        let items = self.index.search(&ns, "", self.config.prune_scan_limit)?;

        let mut pruned = 0;
        for item in items {
            let eff = effective_strength(&item.value, self.config.decay_rate, now);
            if eff < self.config.strength_threshold {
                self.index.delete(&ns, &item.key)?;
                pruned += 1;
            }
        }

        if pruned > 0 {
            info!(namespace = %ns, pruned, "pruned decayed memories");
        }
        Ok(pruned)
    }

    /// Ask the summarizer to merge and de-contradict `session`'s facts.
    ///
    /// On a usable reply every prior fact is deleted and the consolidated set
    /// is stored fresh at full strength. Any other reply leaves the store
    /// untouched.
    ///
    /// # Errors
    /// Summarizer and index failures propagate.
    pub fn consolidate(
        &self,
        session: &SessionId,
        summarizer: &dyn Summarizer,
    ) -> Result<ConsolidationOutcome> {
        let ns = self.namespace(session);
        let items = self
            .index
            .search(&ns, "", self.config.consolidate_scan_limit)?;
        if items.len() < self.config.consolidate_min_items {
            return Ok(ConsolidationOutcome::TooFew { count: items.len() });
        }

        let listing = items
            .iter()
            .map(|i| i.value.content.trim())
            .filter(|c| !c.is_empty())
            .map(|c| format!("- {c}"))
            .collect::<Vec<_>>();
        if listing.is_empty() {
            return Ok(ConsolidationOutcome::TooFew { count: 0 });
        }

        let reply = summarizer.summarize(&self.consolidate_instruction, &listing.join("\n"))?;
        let consolidated = match parse_string_array(&reply) {
            Some(facts) if !facts.is_empty() => facts,
            _ => {
                warn!(namespace = %ns, "consolidation reply unparseable; store left unchanged");
                return Ok(ConsolidationOutcome::Unparseable);
            }
        };

        for item in &items {
            self.index.delete(&ns, &item.key)?;
        }
        let now = self.clock.now();
        for fact in &consolidated {
            self.index
                .put(&ns, &Uuid::new_v4().to_string(), &MemoryItem::new(fact.as_str(), now))?;
        }

        info!(
            namespace = %ns,
            before = items.len(),
            after = consolidated.len(),
            "consolidated memories"
        );
        Ok(ConsolidationOutcome::Consolidated {
            before: items.len(),
            after: consolidated.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
