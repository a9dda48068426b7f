//! # chatmem-llm
//!
//! Completion client used by chatmem for summarization, fact extraction and
//! consolidation. Backends:
//!   - **Ollama** (local, the default)
//!   - **OpenAI-compatible API**
//!   - **None**: every call fails, and callers skip the step that needed it
//!
//! Every call is one instruction plus one block of text, answered with plain
//! text. Parsing the text (summary, JSON array of facts) is the caller's job.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use types::{LlmRequest, LlmResponse};
