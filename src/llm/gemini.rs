//! Google Gemini `generateContent` client.

use async_trait::async_trait;

use super::{classify_status, classify_transport, LlmProvider};
use crate::config::LlmConfig;
use crate::errors::LlmError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiProvider {
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

    fn request_body(&self, prompt: &str, schema_hint: &str) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": {
                "parts": [{
                    "text": format!(
                        "Respond with a single JSON object that matches this structure:\n{}",
                        schema_hint
                    )
                }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
                "responseMimeType": "application/json"
            }
        })
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        api_key: &str,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&self.request_body(prompt, schema_hint))
            .send()
            .await
            .map_err(|e| classify_transport("Gemini", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("Gemini", status, &body));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_transport("Gemini", e))?;
        parse_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_response(json: &serde_json::Value) -> Result<String, LlmError> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first());

    let Some(candidate) = candidate else {
        let reason = json
            .pointer("/promptFeedback/blockReason")
            .and_then(|r| r.as_str())
            .unwrap_or("no candidates returned");
        return Err(LlmError::Fatal(format!("Gemini returned no content: {}", reason)));
    };

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("empty response");
        return Err(LlmError::Fatal(format!("Gemini returned no text: {}", reason)));
    }
    Ok(text)
}
