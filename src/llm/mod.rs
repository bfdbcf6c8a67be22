//! LLM providers and the credential pool.
//!
//! A provider turns `(api_key, prompt, schema_hint)` into the model's text
//! reply and classifies failures as [`LlmError::RateLimited`],
//! [`LlmError::Transient`] or [`LlmError::Fatal`]. Retry and key rotation
//! live in [`crate::generator`], not here: a provider makes exactly one
//! HTTP request per call.

pub mod gemini;
pub mod openai;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::errors::LlmError;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier for logs (e.g. `"gemini"`).
    fn name(&self) -> &str;

    /// One completion. `schema_hint` describes the JSON the reply must contain.
    async fn complete(
        &self,
        api_key: &str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<String, LlmError>;
}

/// Build the provider named by `[llm] provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiProvider::new(client, config))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(client, config))),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

/// API keys used round-robin.
///
/// The cursor is shared by every generator holding the pool, so
/// consecutive calls start on consecutive keys.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Return the current cursor position and move the cursor to the next key.
    pub fn advance(&self) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        self.cursor.fetch_add(1, Ordering::SeqCst) % self.keys.len()
    }

    /// The key at `index` (wrapping). `None` only for an empty pool.
    pub fn key(&self, index: usize) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        self.keys.get(index % self.keys.len()).map(String::as_str)
    }
}

/// Classify a non-success HTTP response.
pub(crate) fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = format!("{} API error {}: {}", provider, status, truncate(body, 500));
    if status.as_u16() == 429 || body.contains("RESOURCE_EXHAUSTED") {
        LlmError::RateLimited(message)
    } else if status.is_server_error() || status.as_u16() == 408 {
        LlmError::Transient(message)
    } else {
        LlmError::Fatal(message)
    }
}

/// Transport failures (timeout, connect, reset, undecodable body) are all retryable.
pub(crate) fn classify_transport(provider: &str, e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Transient(format!("{} request timed out: {}", provider, e))
    } else {
        LlmError::Transient(format!("{} request failed: {}", provider, e))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
