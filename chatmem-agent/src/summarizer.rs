//! [`Summarizer`] backed by [`LlmClient`].

use chatmem_core::config::LlmConfig;
use chatmem_core::error::{ChatmemError, Result};
use chatmem_core::summarizer::Summarizer;
use chatmem_llm::{LlmClient, LlmProvider, LlmRequest};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

/// Blocking adapter over the async LLM client.
///
/// Owns a current-thread runtime and blocks the calling thread for the
/// duration of each request. Call it from worker threads only; calling it
/// from inside another tokio runtime panics.
pub struct LlmSummarizer {
    client: LlmClient,
    runtime: Runtime,
    max_tokens: u32,
    temperature: f32,
    timeout_ms: u64,
}

impl LlmSummarizer {
    /// Wrap an existing client with default request settings.
    ///
    /// # Errors
    /// Returns [`ChatmemError::Io`] if the runtime cannot be built.
    pub fn new(client: LlmClient) -> Result<Self> {
        Self::with_settings(client, &LlmConfig::default())
    }

    /// Build the client and request settings from `[llm]`.
    ///
    /// The API key, if any, is read from the environment variable named by
    /// `api_key_env`.
    ///
    /// # Errors
    /// [`ChatmemError::Config`] for an unknown provider or a missing key.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        let provider = LlmProvider::from_name(&config.provider, config.base_url.clone(), api_key)
            .map_err(|e| ChatmemError::Config(e.to_string()))?;
        let client = LlmClient::new(provider, config.model.clone(), config.max_retries);
        Self::with_settings(client, config)
    }

    fn with_settings(client: LlmClient, config: &LlmConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            client,
            runtime,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_ms: config.request_timeout_ms,
        })
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client.is_available()
    }
}

impl Summarizer for LlmSummarizer {
    fn summarize(&self, system_instruction: &str, user_text: &str) -> Result<String> {
        let request = LlmRequest::new(system_instruction, user_text)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_timeout(self.timeout_ms);
        let response = self
            .runtime
            .block_on(self.client.generate(&request))
            .map_err(|e| ChatmemError::Summarizer(e.to_string()))?;
        debug!(
            model = %response.model,
            latency_ms = response.latency_ms,
            tokens = response.tokens_generated,
            "summarizer call finished"
        );
        Ok(response.text)
    }
}
