//! Completion provider abstraction and implementations.
//!
//! Defines the [`CompletionClient`] trait and concrete implementations:
//! - **[`DisabledClient`]** — returns errors; used when no provider is configured,
//!   so the read-only `/facts` surface can run without an API key.
//! - **[`OpenAiClient`]** — calls the OpenAI completions API with retry and backoff.
//! - **[`StaticClient`]** — canned-response test double.
//!
//! # Generation parameters
//!
//! Every call uses the same fixed parameters: temperature 0.7, 512 max
//! tokens, a single non-streamed candidate, and the stop sequences `]}` and
//! `]\n}`. The prompt template pre-seeds the opening `{ "facts":[`, so
//! stopping at the closing bracket lets the raw output be wrapped back into
//! a valid JSON document (see [`crate::extract`]).
//!
//! # Retry strategy
//!
//! The OpenAI client uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CompletionConfig;

/// Stop sequences that terminate generation at the end of the JSON fact list.
pub const STOP_SEQUENCES: [&str; 2] = ["]}", "]\n}"];

/// A text-completion backend.
///
/// Implementations are injected into the request handlers at construction
/// time, so tests can substitute a [`StaticClient`] for the real API.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-3.5-turbo-instruct"`).
    fn model_name(&self) -> &str;

    /// Generate a single completion for the given prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

// ============ Disabled Client ============

/// A no-op completion client that always returns errors.
///
/// Used when `completion.provider = "disabled"` in the configuration.
pub struct DisabledClient;

#[async_trait]
impl CompletionClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("Completion provider is disabled")
    }
}

// ============ OpenAI Client ============

/// Completion client using the OpenAI API.
///
/// Calls `POST {base_url}/completions` with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAiClient {
    config: CompletionConfig,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new OpenAI client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment or
    /// the HTTP client cannot be built.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config: config.clone(),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "n": 1,
            "stream": false,
            "stop": STOP_SEQUENCES,
        });

        let url = format!("{}/completions", self.config.base_url.trim_end_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Completion API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Completion API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Completion failed after retries")))
    }
}

/// Parse the completions API response JSON.
///
/// Extracts `choices[0].text` — the single candidate's generated text.
fn parse_completion_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].text"))
}

/// Create the appropriate [`CompletionClient`] based on configuration.
///
/// # Errors
///
/// Returns an error for unknown provider names or if the OpenAI client
/// cannot be initialized (missing API key).
pub fn create_client(config: &CompletionConfig) -> Result<Box<dyn CompletionClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledClient)),
        "openai" => Ok(Box::new(OpenAiClient::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

// ============ Static Client (test double) ============

/// Canned-response completion client for tests.
///
/// Returns the configured text on every call, or a forced error, and counts
/// how many times [`complete`](CompletionClient::complete) was invoked so
/// tests can assert cache idempotence.
pub struct StaticClient {
    response: Result<String, String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl StaticClient {
    pub fn returning(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Number of completion calls issued so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for StaticClient {
    fn model_name(&self) -> &str {
        "static"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(message) => bail!("{}", message),
        }
    }
}
