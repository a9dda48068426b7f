//! Configuration for the chatmem memory system.
//!
//! Maps directly to `chatmem.toml`. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatmemError, Result};

/// Top-level chatmem configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatmemConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Short-term window sizing.
    #[serde(default)]
    pub window: WindowConfig,
    /// Long-term memory decay and retrieval.
    #[serde(default)]
    pub long_term: LongTermConfig,
    /// Background worker behavior.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Fact extraction after each turn.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Prune / consolidate scheduling.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Context store settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// LLM provider used for summarization.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Instruction overrides.
    #[serde(default)]
    pub prompts: PromptConfig,
}

impl ChatmemConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ChatmemError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ChatmemError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `ChatmemError::InvalidWindow` for a window that would never
    /// shrink and `ChatmemError::Config` for any other out-of-range value.
    pub fn validate(&self) -> Result<()> {
        let w = &self.window;
        if w.threshold == 0 || w.keep >= w.threshold {
            return Err(ChatmemError::InvalidWindow {
                threshold: w.threshold,
                keep: w.keep,
            });
        }

        let lt = &self.long_term;
        if !lt.decay_rate.is_finite() || lt.decay_rate < 0.0 {
            return Err(ChatmemError::Config(format!(
                "long_term.decay_rate must be a non-negative number, got {}",
                lt.decay_rate
            )));
        }
        for (name, value) in [
            ("reinforce_delta", lt.reinforce_delta),
            ("strength_threshold", lt.strength_threshold),
            ("similarity_threshold", lt.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ChatmemError::Config(format!(
                    "long_term.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if lt.search_oversample == 0 {
            return Err(ChatmemError::Config(
                "long_term.search_oversample must be at least 1".to_string(),
            ));
        }

        if self.workers.poll_interval_ms == 0 {
            return Err(ChatmemError::Config(
                "workers.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.extraction.recent_turns == 0 {
            return Err(ChatmemError::Config(
                "extraction.recent_turns must be greater than zero".to_string(),
            ));
        }
        match self.general.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ChatmemError::Config(format!(
                    "general.log_format must be \"pretty\" or \"json\", got {other:?}"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level or `EnvFilter` directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Short-term window sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Compaction triggers when a session holds more turns than this.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Raw turns retained after compaction.
    #[serde(default = "default_keep")]
    pub keep: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            keep: default_keep(),
        }
    }
}

/// Long-term memory decay, reinforcement and scan limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermConfig {
    /// Namespace scope for extracted facts.
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Exponential decay constant per hour.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Strength added on every match or retrieval.
    #[serde(default = "default_reinforce_delta")]
    pub reinforce_delta: f64,
    /// Items whose effective strength drops below this are hidden and pruned.
    #[serde(default = "default_strength_threshold")]
    pub strength_threshold: f64,
    /// Character-set Jaccard above which a new fact reinforces an existing one.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Nearest items checked for duplicates on insert.
    #[serde(default = "default_dedup_candidates")]
    pub dedup_candidates: usize,
    /// Default number of facts returned by a search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Search fetches `limit * search_oversample` candidates before filtering.
    #[serde(default = "default_search_oversample")]
    pub search_oversample: usize,
    /// Maximum items scanned by a prune pass.
    #[serde(default = "default_prune_scan_limit")]
    pub prune_scan_limit: usize,
    /// Maximum items sent to the summarizer by a consolidation pass.
    #[serde(default = "default_consolidate_scan_limit")]
    pub consolidate_scan_limit: usize,
    /// Consolidation is skipped below this many items.
    #[serde(default = "default_consolidate_min_items")]
    pub consolidate_min_items: usize,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            decay_rate: default_decay_rate(),
            reinforce_delta: default_reinforce_delta(),
            strength_threshold: default_strength_threshold(),
            similarity_threshold: default_similarity_threshold(),
            dedup_candidates: default_dedup_candidates(),
            search_limit: default_search_limit(),
            search_oversample: default_search_oversample(),
            prune_scan_limit: default_prune_scan_limit(),
            consolidate_scan_limit: default_consolidate_scan_limit(),
            consolidate_min_items: default_consolidate_min_items(),
        }
    }
}

/// Background worker behavior, shared by every job type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Delay after the first queued item before draining a batch.
    #[serde(default)]
    pub debounce_ms: u64,
    /// How often an idle worker wakes to check for a stop request.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Process queued items before `stop` returns.
    #[serde(default = "default_true")]
    pub drain_on_stop: bool,
    /// Queue capacity; 0 means unbounded.
    #[serde(default)]
    pub max_queue: usize,
    /// Upper bound on `stop`; `None` waits forever.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: Option<u64>,
}

impl WorkerConfig {
    /// Debounce as a `Duration`.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Stop timeout as a `Duration`.
    #[must_use]
    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
            drain_on_stop: true,
            max_queue: 0,
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

/// Fact extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Enqueue an extraction job after every committed turn.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How many of the latest turns are shown to the extractor.
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recent_turns: default_recent_turns(),
        }
    }
}

/// Long-term maintenance scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Run the maintenance worker at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Context store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Use write-ahead logging.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// How long a connection waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            wal_mode: true,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// LLM provider settings for the summarization collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "none".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries inside the HTTP client.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum generated tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: None,
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Optional instruction overrides. `None` uses the built-in text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    /// System instruction for short-term compaction.
    #[serde(default)]
    pub compress: Option<String>,
    /// System instruction for fact extraction.
    #[serde(default)]
    pub extract: Option<String>,
    /// System instruction for long-term consolidation.
    #[serde(default)]
    pub consolidate: Option<String>,
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_threshold() -> usize { 20 }
fn default_keep() -> usize { 8 }
fn default_scope() -> String { "user_prefs".to_string() }
fn default_decay_rate() -> f64 { 0.005 }
fn default_reinforce_delta() -> f64 { 0.2 }
fn default_strength_threshold() -> f64 { 0.05 }
fn default_similarity_threshold() -> f64 { 0.85 }
fn default_dedup_candidates() -> usize { 3 }
fn default_search_limit() -> usize { 5 }
fn default_search_oversample() -> usize { 2 }
fn default_prune_scan_limit() -> usize { 1000 }
fn default_consolidate_scan_limit() -> usize { 200 }
fn default_consolidate_min_items() -> usize { 3 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_stop_timeout_ms() -> Option<u64> { Some(30_000) }
fn default_recent_turns() -> usize { 6 }
fn default_db_path() -> PathBuf { PathBuf::from("chat_context.db") }
fn default_busy_timeout_ms() -> u64 { 5000 }
fn default_provider() -> String { "ollama".to_string() }
fn default_base_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_max_retries() -> u32 { 2 }
fn default_max_tokens() -> u32 { 512 }
fn default_temperature() -> f32 { 0.2 }
