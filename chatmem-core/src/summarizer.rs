//! The summarization collaborator and the instructions sent to it.
//!
//! The core never talks to a model directly. Compaction, extraction and
//! consolidation all go through [`Summarizer`]: one synchronous call, no
//! retries. Retry policy, if any, belongs to the implementation.

use crate::error::Result;

/// Default instruction for short-term compaction.
pub const COMPRESS_INSTRUCTION: &str = "\
Compress the following conversation history into one concise summary that keeps the key facts and context.
If an existing summary is provided, merge the new conversation content into it.
Output only the summary text, with no prefix.";

/// Default instruction for long-term consolidation.
pub const CONSOLIDATE_INSTRUCTION: &str = "\
The following are several memories about the same user. Consolidate them into a tighter list:
- merge entries that say nearly the same thing
- resolve contradictions, keeping the newest or most specific fact
- drop entries that are stale or meaningless

Output a JSON array where every element is a string. Output only the JSON, nothing else.";

/// Produces text from an instruction and an input.
///
/// Implemented for any `Fn(&str, &str) -> Result<String>`, which is how tests
/// and benches supply canned replies.
pub trait Summarizer: Send + Sync {
    /// Run one summarization.
    ///
    /// # Errors
    /// Returns `ChatmemError::Summarizer` (or any other variant) on failure.
    /// Callers propagate it unchanged.
    fn summarize(&self, system_instruction: &str, user_text: &str) -> Result<String>;
}

impl<F> Summarizer for F
where
    F: Fn(&str, &str) -> Result<String> + Send + Sync,
{
    fn summarize(&self, system_instruction: &str, user_text: &str) -> Result<String> {
        self(system_instruction, user_text)
    }
}

/// Parse a reply that should be a JSON array of strings.
///
/// Tolerates surrounding whitespace and a Markdown code fence. Non-string and
/// blank elements are skipped. Returns `None` when the reply is not a JSON
/// array at all.
#[must_use]
pub fn parse_string_array(reply: &str) -> Option<Vec<String>> {
    let body = strip_code_fence(reply.trim());
    let values: Vec<serde_json::Value> = serde_json::from_str(body).ok()?;
    Some(
        values
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => {
                    let s = s.trim();
                    (!s.is_empty()).then(|| s.to_string())
                }
                _ => None,
            })
            .collect(),
    )
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag on the opening line.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
