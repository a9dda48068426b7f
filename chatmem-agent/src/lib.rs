//! # chatmem-agent
//!
//! Wires the chatmem core into an agent's turn loop:
//!
//! - [`pipeline::ChatMemory`]: locked foreground turns that save the window
//!   and hand compaction and fact extraction to background workers
//! - [`compress`], [`extract`], [`maintain`]: the background job drivers
//! - [`summarizer::LlmSummarizer`]: the LLM-backed summarizer
//! - [`telemetry::init_tracing`]: subscriber setup

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compress;
pub mod extract;
pub mod maintain;
pub mod payload;
pub mod pipeline;
pub mod source;
pub mod summarizer;
pub mod telemetry;

pub use compress::{CompressHandler, CompressOutcome};
pub use extract::{EXTRACT_INSTRUCTION, ExtractHandler, ExtractReport};
pub use maintain::{MaintainHandler, MaintenanceReport};
pub use payload::{CapturedState, RunContext};
pub use pipeline::{ChatMemory, CommitReport, PipelineStats, TurnSession};
pub use source::{IndexSource, SqliteIndexSource};
pub use summarizer::LlmSummarizer;
pub use telemetry::init_tracing;
