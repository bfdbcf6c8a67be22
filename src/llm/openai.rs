//! OpenAI-compatible `chat/completions` client.
//!
//! Works against OpenAI itself or any server exposing the same API
//! (set `[llm] base_url`).

use async_trait::async_trait;

use super::{classify_status, classify_transport, LlmProvider};
use crate::config::LlmConfig;
use crate::errors::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model_name(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(
        &self,
        api_key: &str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<String, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": format!(
                        "Respond with a single JSON object that matches this structure:\n{}",
                        schema_hint
                    )
                },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;
        parse_response(&json)
    }
}

fn parse_response(json: &serde_json::Value) -> Result<String, LlmError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(String::from)
        .ok_or_else(|| LlmError::Fatal("OpenAI response has no message content".to_string()))
}
