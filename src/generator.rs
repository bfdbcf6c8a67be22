//! Report generation: prompt construction, key rotation, retries, and
//! the single repair round for malformed output.
//!
//! Policy for one call to the model:
//!
//! | Failure | Action | Limit |
//! |---------|--------|-------|
//! | rate limit | next key from the [`CredentialPool`] | one attempt per key |
//! | timeout / 5xx | same key after `base * 2^(n-1)` (capped) | `max_transient_attempts` |
//! | other 4xx, blocked | fail | none |
//!
//! Output that [`parse_report`] rejects triggers exactly one repair
//! prompt; a second rejection fails generation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use repo_health_core::models::Chunk;
use repo_health_core::report::{parse_report, Report, REPORT_SCHEMA};
use repo_health_core::sample::SampleSet;

use crate::config::LlmConfig;
use crate::errors::{GenerationError, LlmError};
use crate::llm::{CredentialPool, LlmProvider};

/// Backoff for transient LLM failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_transient_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_transient_attempts: config.max_transient_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

pub struct ReportGenerator {
    provider: Arc<dyn LlmProvider>,
    credentials: Arc<CredentialPool>,
    policy: RetryPolicy,
    max_chars_per_sample: usize,
}

impl ReportGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: Arc<CredentialPool>,
        policy: RetryPolicy,
        max_chars_per_sample: usize,
    ) -> Self {
        Self {
            provider,
            credentials,
            policy,
            max_chars_per_sample,
        }
    }

    /// Ask the model for a report on `samples` and attach corpus metadata.
    pub async fn generate(&self, samples: &SampleSet) -> Result<Report, GenerationError> {
        if self.credentials.is_empty() {
            return Err(GenerationError::NoCredentials);
        }

        let prompt = build_prompt(samples, self.max_chars_per_sample);
        tracing::info!(
            provider = self.provider.name(),
            samples = samples.samples.len(),
            prompt_chars = prompt.len(),
            "generating health report"
        );

        let raw = self.call(&prompt).await?;
        let mut report = match parse_report(&raw) {
            Ok(report) => report,
            Err(first) => {
                tracing::warn!(error = %first, "malformed report; sending repair prompt");
                let repair = build_repair_prompt(&prompt, &raw, &first.to_string());
                let raw = self.call(&repair).await?;
                parse_report(&raw).map_err(|e| GenerationError::Malformed(e.to_string()))?
            }
        };

        report.languages_detected = samples.languages.clone();
        report.dependencies_found = samples.dependencies.clone();
        report.total_files_analyzed = samples.total_files;
        report.analysis_timestamp = Some(Utc::now());
        Ok(report)
    }

    /// One logical model call with rotation and backoff.
    async fn call(&self, prompt: &str) -> Result<String, GenerationError> {
        let pool_size = self.credentials.len();
        let start = self.credentials.advance();
        let mut rotations = 0usize;
        let mut transient = 0u32;

        loop {
            let key_index = (start + rotations) % pool_size;
            let key = self
                .credentials
                .key(key_index)
                .ok_or(GenerationError::NoCredentials)?;

            match self.provider.complete(key, prompt, REPORT_SCHEMA).await {
                Ok(text) => return Ok(text),
                Err(LlmError::RateLimited(message)) => {
                    rotations += 1;
                    tracing::warn!(key_index, rotations, %message, "LLM key rate limited");
                    if rotations >= pool_size {
                        return Err(GenerationError::CredentialsExhausted { keys: pool_size });
                    }
                    self.credentials.advance();
                    transient = 0;
                }
                Err(LlmError::Transient(message)) => {
                    transient += 1;
                    if transient >= self.policy.max_transient_attempts {
                        return Err(GenerationError::TransientExhausted {
                            attempts: transient,
                            message,
                        });
                    }
                    let delay = self.policy.delay(transient);
                    tracing::warn!(key_index, attempt = transient, ?delay, %message, "transient LLM failure; backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(LlmError::Fatal(message)) => return Err(GenerationError::Provider(message)),
            }
        }
    }
}

/// The analysis prompt for a sample set.
pub fn build_prompt(samples: &SampleSet, max_chars_per_sample: usize) -> String {
    let languages =
        serde_json::to_string_pretty(&samples.languages).unwrap_or_else(|_| "{}".to_string());
    let dependencies =
        serde_json::to_string_pretty(&samples.dependencies).unwrap_or_else(|_| "{}".to_string());
    let n = samples.samples.len();

    format!(
        "You are an expert code analyst and security auditor. Analyze the following codebase and provide a comprehensive health report.

Repository Information:
- Languages: {languages}
- Dependencies: {dependencies}
- Total Files: {total}
- Code Samples Provided: {n}

=== ACTUAL CODE SAMPLES FROM THE REPOSITORY ===
The following are REAL code samples extracted from the codebase. Analyze these specific code patterns, structure, and implementations:
{code}
=== END OF CODE SAMPLES ===

IMPORTANT: You have been provided with {n} actual code samples above. Use these to identify:
- Specific code patterns and practices used
- Actual implementations and architectural decisions
- Concrete code quality issues (not generic assumptions)
- Real security vulnerabilities in the code
- Specific technical debt items based on what you see

Provide the health report as JSON with the following structure:
{schema}

Focus on:
1. Security vulnerabilities (outdated dependencies, insecure patterns)
2. Code quality issues (complexity, maintainability, best practices)
3. Technical debt (deprecated APIs, code smells)
4. Modernization opportunities (containerization, CI/CD, cloud-readiness)

Provide actionable, specific recommendations. Return ONLY valid JSON, no additional text.",
        total = samples.total_files,
        code = format_samples(&samples.samples, max_chars_per_sample),
        schema = REPORT_SCHEMA,
    )
}

/// Render samples with path, chunk index and language, truncated per sample.
pub fn format_samples(samples: &[Chunk], max_chars: usize) -> String {
    samples
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let body = match chunk.text.char_indices().nth(max_chars) {
                Some((cut, _)) => format!("{}\n... (truncated)", &chunk.text[..cut]),
                None => chunk.text.clone(),
            };
            format!(
                "\n━━━ Sample {}: {} (chunk {}) ━━━\nLanguage: {}\n```\n{}\n```\n",
                i + 1,
                chunk.file_path,
                chunk.chunk_index,
                chunk.language,
                body
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_repair_prompt(original: &str, bad_output: &str, error: &str) -> String {
    let shown: String = bad_output.chars().take(4000).collect();
    format!(
        "Your previous answer could not be used: {error}.\n\
         Reply again with ONLY one valid JSON object matching this structure, with a numeric \"overall_score\" and a non-empty \"summary\":\n\
         {schema}\n\n\
         Previous answer:\n{shown}\n\n\
         Original request:\n{original}",
        schema = REPORT_SCHEMA,
    )
}
