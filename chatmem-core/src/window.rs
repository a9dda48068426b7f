//! Short-term memory: a bounded window of raw turns.
//!
//! [`ShortTermWindow`] is a pure policy object. It decides when a session's
//! turn list has overflowed and builds the replacement list, but it never
//! touches storage and never mutates its input. Callers apply the returned
//! [`WindowPatch`] however they persist turns.

use tracing::info;

use crate::config::WindowConfig;
use crate::error::{ChatmemError, Result};
use crate::summarizer::{COMPRESS_INSTRUCTION, Summarizer};
use crate::types::Turn;

/// Prefix of the system turn that replaces compacted history.
pub const SUMMARY_MARKER: &str = "[Conversation summary]";

/// Replacement state produced by a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPatch {
    /// Summary marker followed by the retained turns.
    pub turns: Vec<Turn>,
    /// The new rolling summary.
    pub summary: String,
}

/// Overflow and compaction policy for one turn list.
#[derive(Debug, Clone)]
pub struct ShortTermWindow {
    threshold: usize,
    keep: usize,
    instruction: String,
}

impl ShortTermWindow {
    /// Window that compacts above `threshold` turns down to the last `keep`.
    ///
    /// # Errors
    /// Returns `ChatmemError::InvalidWindow` unless `keep < threshold`.
    pub fn new(threshold: usize, keep: usize) -> Result<Self> {
        if threshold == 0 || keep >= threshold {
            return Err(ChatmemError::InvalidWindow { threshold, keep });
        }
        Ok(Self {
            threshold,
            keep,
            instruction: COMPRESS_INSTRUCTION.to_string(),
        })
    }

    /// Window built from the `[window]` config section.
    ///
    /// # Errors
    /// Same as [`ShortTermWindow::new`].
    pub fn from_config(config: &WindowConfig) -> Result<Self> {
        Self::new(config.threshold, config.keep)
    }

    /// Replace the system instruction sent to the summarizer.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Overflow threshold.
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Turns kept after compaction.
    #[must_use]
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Whether `turns` is longer than the threshold.
    #[must_use]
    pub fn overflow(&self, turns: &[Turn]) -> bool {
        turns.len() > self.threshold
    }

    /// Summarize everything but the last `keep` turns.
    ///
    /// Returns `Ok(None)` when `turns` is within the threshold, so it is safe
    /// to call unconditionally. On overflow the summarizer is called once and
    /// the patch holds a summary marker plus the `keep` newest turns.
    ///
    /// # Errors
    /// Summarizer failures propagate unchanged; nothing is retried.
    pub fn compress(
        &self,
        turns: &[Turn],
        existing_summary: &str,
        summarizer: &dyn Summarizer,
    ) -> Result<Option<WindowPatch>> {
        if !self.overflow(turns) {
            return Ok(None);
        }

        let split = turns.len() - self.keep;
        let (prefix, retained) = turns.split_at(split);

        let rendered = render_turns(prefix);
        let input = if existing_summary.is_empty() {
            rendered
        } else {
            format!("Existing summary: {existing_summary}\n\nNew content:\n{rendered}")
        };

        let summary = summarizer.summarize(&self.instruction, &input)?;
        let summary = summary.trim().to_string();

        info!(
            before = turns.len(),
            after = retained.len() + 1,
            summary_chars = summary.chars().count(),
            "compacted short-term window"
        );

        let mut new_turns = Vec::with_capacity(retained.len() + 1);
        new_turns.push(Turn::system(format!("{SUMMARY_MARKER} {summary}")));
        new_turns.extend_from_slice(retained);

        Ok(Some(WindowPatch {
            turns: new_turns,
            summary,
        }))
    }

    /// Copy of `turns` without the given positions. Out-of-range indices are ignored.
    #[must_use]
    pub fn remove_indices(turns: &[Turn], indices: &[usize]) -> Vec<Turn> {
        turns
            .iter()
            .enumerate()
            .filter(|(i, _)| !indices.contains(i))
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Copy of `turns` without the turns matching `predicate`.
    #[must_use]
    pub fn remove_where(turns: &[Turn], predicate: impl Fn(&Turn) -> bool) -> Vec<Turn> {
        turns.iter().filter(|t| !predicate(t)).cloned().collect()
    }
}

impl Default for ShortTermWindow {
    fn default() -> Self {
        Self {
            threshold: 20,
            keep: 8,
            instruction: COMPRESS_INSTRUCTION.to_string(),
        }
    }
}

/// One `"<kind>: <text>"` line per turn.
#[must_use]
pub fn render_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether `turn` is a summary marker produced by compaction.
#[must_use]
pub fn is_summary_marker(turn: &Turn) -> bool {
    turn.kind == crate::types::TurnKind::System && turn.text.starts_with(SUMMARY_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn turns(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::human(format!("q{i}"))
                } else {
                    Turn::assistant(format!("a{i}"))
                }
            })
            .collect()
    }

    #[test]
    fn twenty_five_turns_compress_to_nine() {
        let window = ShortTermWindow::new(20, 8).expect("valid window");
        let input = turns(25);
        let summarizer = |_: &str, _: &str| -> Result<String> { Ok("  S1 ".to_string()) };

        let patch = window
            .compress(&input, "", &summarizer)
            .expect("compress")
            .expect("overflowing input yields a patch");

        assert_eq!(patch.turns.len(), 9);
        assert_eq!(patch.summary, "S1");
        assert!(is_summary_marker(&patch.turns[0]));
        assert_eq!(patch.turns[0].text, "[Conversation summary] S1");
        assert_eq!(&patch.turns[1..], &input[17..]);
        assert_eq!(input.len(), 25);
    }

    #[test]
    fn within_threshold_is_a_noop() {
        let window = ShortTermWindow::default();
        let summarizer = |_: &str, _: &str| -> Result<String> {
            panic!("summarizer must not be called");
        };
        assert!(window.compress(&turns(15), "", &summarizer).expect("noop").is_none());
        assert!(window.compress(&turns(20), "", &summarizer).expect("noop").is_none());
        assert!(!window.overflow(&turns(20)));
        assert!(window.overflow(&turns(21)));
    }

    #[test]
    fn existing_summary_is_prepended_to_prefix() {
        let window = ShortTermWindow::new(3, 1).expect("valid window");
        let seen = Mutex::new(String::new());
        let summarizer = |instruction: &str, text: &str| -> Result<String> {
            assert_eq!(instruction, "be brief");
            *seen.lock() = text.to_string();
            Ok("S2".to_string())
        };
        let window = window.with_instruction("be brief");

        window
            .compress(&turns(4), "S1", &summarizer)
            .expect("compress");

        assert_eq!(
            *seen.lock(),
            "Existing summary: S1\n\nNew content:\nhuman: q0\nassistant: a1\nhuman: q2"
        );
    }

    #[test]
    fn summarizer_failure_propagates() {
        let window = ShortTermWindow::new(2, 1).expect("valid window");
        let summarizer = |_: &str, _: &str| -> Result<String> {
            Err(ChatmemError::Summarizer("timeout".into()))
        };
        let err = window
            .compress(&turns(3), "", &summarizer)
            .expect_err("must fail");
        assert!(matches!(err, ChatmemError::Summarizer(_)));
    }

    #[test]
    fn keep_must_be_below_threshold() {
        assert!(ShortTermWindow::new(8, 8).is_err());
        assert!(ShortTermWindow::new(0, 0).is_err());
        assert!(ShortTermWindow::new(9, 8).is_ok());
    }

    #[test]
    fn remove_helpers_return_new_lists() {
        let input = turns(5);
        let without = ShortTermWindow::remove_indices(&input, &[0, 2, 99]);
        assert_eq!(without.len(), 3);
        assert_eq!(without[0].text, "a1");

        let humans_only =
            ShortTermWindow::remove_where(&input, |t| t.kind == crate::types::TurnKind::Assistant);
        assert_eq!(humans_only.len(), 3);
        assert_eq!(input.len(), 5);
    }
}
