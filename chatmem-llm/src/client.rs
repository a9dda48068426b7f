//! LLM client: one completion call against Ollama or an OpenAI-compatible API.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Provider backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    /// Ollama's `/api/generate`.
    Ollama {
        /// e.g. `http://localhost:11434`
        base_url: String,
    },
    /// Any `/v1/chat/completions` endpoint.
    OpenAiCompatible {
        /// API root without the `/v1` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No backend. Every call fails with [`LlmError::Unavailable`].
    None,
}

impl LlmProvider {
    /// Build a provider from its configured name: `"ollama"`, `"openai"` or `"none"`.
    ///
    /// # Errors
    /// [`LlmError::ConfigError`] for an unknown name or an `openai` provider
    /// without a key.
    pub fn from_name(
        name: &str,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LlmError> {
        match name.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama {
                base_url: base_url.into(),
            }),
            "openai" | "openai_compatible" => {
                let api_key = api_key.ok_or_else(|| {
                    LlmError::ConfigError("openai provider needs an API key".into())
                })?;
                Ok(Self::OpenAiCompatible {
                    base_url: base_url.into(),
                    api_key,
                })
            }
            "none" | "" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown LLM provider {other:?}"))),
        }
    }

    fn endpoint(&self) -> Option<String> {
        let (base, path) = match self {
            Self::Ollama { base_url } => (base_url, "api/generate"),
            Self::OpenAiCompatible { base_url, .. } => (base_url, "v1/chat/completions"),
            Self::None => return None,
        };
        Some(format!("{}/{path}", base.trim_end_matches('/')))
    }

    fn body(&self, model: &str, request: &LlmRequest) -> Value {
        match self {
            Self::OpenAiCompatible { .. } => json!({
                "model": model,
                "messages": [
                    { "role": "system", "content": request.system },
                    { "role": "user", "content": request.user },
                ],
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }),
            _ => json!({
                "model": model,
                "system": request.system,
                "prompt": request.user,
                "stream": false,
                "options": {
                    "temperature": request.temperature,
                    "num_predict": request.max_tokens,
                }
            }),
        }
    }

    /// Pull `(text, tokens_generated)` out of a successful reply body.
    fn completion(&self, reply: &Value) -> Result<(String, u32), LlmError> {
        let (text, tokens) = match self {
            Self::OpenAiCompatible { .. } => (
                reply["choices"][0]["message"]["content"].as_str(),
                reply["usage"]["completion_tokens"].as_u64(),
            ),
            _ => (reply["response"].as_str(), reply["eval_count"].as_u64()),
        };
        let text = text
            .ok_or_else(|| LlmError::ParseError(format!("no completion text in {reply}")))?
            .trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        let tokens = tokens.map_or(0, |t| u32::try_from(t).unwrap_or(u32::MAX));
        Ok((text.to_string(), tokens))
    }
}

/// Routes completion requests to the configured backend, retrying transient
/// failures.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl LlmClient {
    /// Client for `model` on `provider`.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
            retry_backoff: Duration::from_millis(250),
        }
    }

    /// Client with no backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), 0)
    }

    /// Base delay between attempts; attempt `n` waits `n` times this.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The model requests are sent to.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Total calls one [`Self::generate`] may make.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a backend is configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Run one completion.
    ///
    /// Transport errors, 5xx and 429 replies are retried up to `max_retries`
    /// times. Other 4xx replies fail immediately.
    ///
    /// # Errors
    /// [`LlmError::Unavailable`] without a backend, [`LlmError::ParseError`]
    /// or [`LlmError::EmptyResponse`] for a useless reply, and
    /// [`LlmError::RetriesExhausted`] once every attempt failed.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let Some(url) = self.provider.endpoint() else {
            return Err(LlmError::Unavailable("no LLM provider configured".into()));
        };
        let body = self.provider.body(&self.model, request);
        let timeout = Duration::from_millis(request.timeout_ms);

        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(
                    attempt = attempt.saturating_add(1),
                    of = self.attempts(),
                    model = %self.model,
                    "retrying LLM call"
                );
                tokio::time::sleep(self.retry_backoff.saturating_mul(attempt)).await;
            }

            let start = Instant::now();
            let mut call = self.http.post(&url).json(&body).timeout(timeout);
            if let LlmProvider::OpenAiCompatible { api_key, .. } = &self.provider {
                call = call.bearer_auth(api_key);
            }

            match call.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let reply: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens_generated) = self.provider.completion(&reply)?;
                    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    debug!(model = %self.model, latency_ms, tokens_generated, "LLM call completed");
                    return Ok(LlmResponse {
                        text,
                        tokens_generated,
                        latency_ms,
                        model: self.model.clone(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    last_error = format!("HTTP {status}: {detail}");
                    warn!(%status, model = %self.model, "LLM provider returned an error");
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(LlmError::RequestFailed(last_error));
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(timeout_ms = request.timeout_ms, "LLM request timed out");
                    } else {
                        warn!(error = %last_error, "LLM request failed");
                    }
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.attempts(),
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ollama() -> LlmProvider {
        LlmProvider::Ollama {
            base_url: "http://localhost:11434/".into(),
        }
    }

    fn openai() -> LlmProvider {
        LlmProvider::OpenAiCompatible {
            base_url: "https://api.example.com".into(),
            api_key: "sk-test".into(),
        }
    }

    #[test]
    fn provider_from_name() {
        assert_eq!(
            LlmProvider::from_name("Ollama", "http://h", None).expect("ollama"),
            LlmProvider::Ollama { base_url: "http://h".into() }
        );
        assert_eq!(LlmProvider::from_name("none", "", None).expect("none"), LlmProvider::None);
        assert!(LlmProvider::from_name("openai", "http://h", None).is_err());
        assert!(LlmProvider::from_name("llamacpp", "http://h", None).is_err());
    }

    #[test]
    fn endpoints_join_cleanly() {
        assert_eq!(ollama().endpoint().as_deref(), Some("http://localhost:11434/api/generate"));
        assert_eq!(
            openai().endpoint().as_deref(),
            Some("https://api.example.com/v1/chat/completions")
        );
        assert!(LlmProvider::None.endpoint().is_none());
    }

    #[test]
    fn request_bodies_carry_instruction_and_text() {
        let request = LlmRequest::new("summarize", "human: hi").with_max_tokens(64);

        let body = ollama().body("qwen2.5:1.5b", &request);
        assert_eq!(body["system"], "summarize");
        assert_eq!(body["prompt"], "human: hi");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);

        let body = openai().body("gpt-x", &request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "human: hi");
        assert_eq!(body["max_tokens"], 64);
    }

    #[test]
    fn completion_extraction() {
        let reply = json!({ "response": "  a short summary \n", "eval_count": 12 });
        assert_eq!(
            ollama().completion(&reply).expect("text"),
            ("a short summary".to_string(), 12)
        );

        let reply = json!({
            "choices": [{ "message": { "content": "[\"likes tea\"]" } }],
            "usage": { "completion_tokens": 5 }
        });
        assert_eq!(
            openai().completion(&reply).expect("text"),
            ("[\"likes tea\"]".to_string(), 5)
        );

        assert!(matches!(
            ollama().completion(&json!({ "response": "   " })),
            Err(LlmError::EmptyResponse)
        ));
        assert!(matches!(
            openai().completion(&json!({ "error": "nope" })),
            Err(LlmError::ParseError(_))
        ));
    }

    #[test]
    fn attempt_count_saturates() {
        assert_eq!(LlmClient::new(ollama(), "m", 2).attempts(), 3);
        assert_eq!(LlmClient::new(ollama(), "m", u32::MAX).attempts(), u32::MAX);
    }

    #[tokio::test]
    async fn no_provider_is_unavailable() {
        let client = LlmClient::none();
        assert!(!client.is_available());
        let err = client
            .generate(&LlmRequest::new("s", "u"))
            .await
            .expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_exhausts_retries() {
        let client = LlmClient::new(
            LlmProvider::Ollama {
                base_url: "http://127.0.0.1:9".into(),
            },
            "m",
            1,
        )
        .with_retry_backoff(Duration::ZERO);
        let err = client
            .generate(&LlmRequest::new("s", "u").with_timeout(2_000))
            .await
            .expect_err("nothing listens there");
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
    }
}
