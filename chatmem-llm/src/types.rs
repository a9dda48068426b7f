//! Request and response types.

use serde::Serialize;

/// One instruction-plus-text completion request.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System instruction (what to do with the text).
    pub system: String,
    /// The text to work on.
    pub user: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature. Summaries want this low.
    pub temperature: f32,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Request with summarization-friendly defaults.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 512,
            temperature: 0.2,
            timeout_ms: 30_000,
        }
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// The generated text, trimmed.
    pub text: String,
    /// Tokens generated, when the provider reports it.
    pub tokens_generated: u32,
    /// Wall time of the successful attempt.
    pub latency_ms: u64,
    /// Model that answered.
    pub model: String,
}
