//! TOML configuration.
//!
//! Every section is optional; a missing section or key takes the default
//! shown in `config/rh.example.toml`. [`load_config`] parses and then
//! validates, failing with a message that names the offending key.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub workspace: WorkspaceConfig,
    pub chunking: ChunkingConfig,
    pub ingest: IngestConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub sampling: SamplingConfig,
    pub llm: LlmConfig,
    pub jobs: JobsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rh.sqlite"),
        }
    }
}

/// Where per-job clones are written (`<dir>/<job_id>/`).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/workspaces"),
        }
    }
}

/// Chunk window sizes, in characters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 120,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Lowercase extensions including the dot.
    pub allowed_extensions: Vec<String>,
    /// Directory names skipped at any depth.
    pub skip_dirs: Vec<String>,
    /// Extra glob patterns (relative paths) to exclude.
    pub exclude_globs: Vec<String>,
    pub max_file_bytes: u64,
    pub clone_timeout_secs: u64,
    pub shallow: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            allowed_extensions: list(&[
                ".py", ".js", ".ts", ".jsx", ".tsx", ".java", ".go", ".rs", ".cpp", ".c", ".h",
                ".hpp", ".md", ".txt", ".json", ".yaml", ".yml", ".xml", ".html", ".css", ".sql",
                ".sh", ".bash",
            ]),
            skip_dirs: list(&[
                ".git",
                "node_modules",
                "venv",
                ".venv",
                "env",
                ".env",
                "build",
                "dist",
                "__pycache__",
                ".pytest_cache",
                "target",
                "bin",
                "obj",
                ".idea",
                ".vscode",
            ]),
            exclude_globs: Vec::new(),
            max_file_bytes: 1024 * 1024,
            clone_timeout_secs: 300,
            shallow: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama (or an OpenAI-compatible) endpoint.
    #[serde(default, alias = "url")]
    pub base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// `memory` or `sqlite`.
    pub backend: String,
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            top_k: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SamplingConfig {
    pub budget: usize,
    pub max_chars_per_sample: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            budget: 25,
            max_chars_per_sample: 1200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// `gemini` or `openai` (any OpenAI-compatible chat endpoint).
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Rotated round-robin. Empty means read `RH_LLM_API_KEY_<n>` / `RH_LLM_API_KEY`.
    pub api_keys: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub max_transient_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            base_url: None,
            api_keys: Vec::new(),
            temperature: 0.3,
            max_output_tokens: 4096,
            timeout_secs: 120,
            max_transient_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

impl LlmConfig {
    /// Model name, falling back to the provider's default.
    pub fn model_name(&self) -> String {
        match &self.model {
            Some(m) => m.clone(),
            None if self.provider == "openai" => "gpt-4o-mini".to_string(),
            None => "gemini-2.5-flash".to_string(),
        }
    }

    /// Configured keys, or keys from the process environment when none are configured.
    pub fn resolved_api_keys(&self) -> Vec<String> {
        if !self.api_keys.is_empty() {
            return self.api_keys.clone();
        }
        keys_from_env(|name| std::env::var(name).ok())
    }
}

/// Collect `RH_LLM_API_KEY_1`, `RH_LLM_API_KEY_2`, … until the first gap,
/// falling back to a single `RH_LLM_API_KEY`.
pub fn keys_from_env(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut keys = Vec::new();
    for i in 1.. {
        match lookup(&format!("RH_LLM_API_KEY_{}", i)) {
            Some(k) if !k.trim().is_empty() => keys.push(k.trim().to_string()),
            _ => break,
        }
    }
    if keys.is_empty() {
        if let Some(k) = lookup("RH_LLM_API_KEY").filter(|k| !k.trim().is_empty()) {
            keys.push(k.trim().to_string());
        }
    }
    keys
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JobsConfig {
    /// Concurrent execution slots. `1` runs one job at a time.
    pub workers: usize,
    /// Accepted-but-not-started jobs before submissions are rejected.
    pub queue_capacity: usize,
    /// Progress is written every N files during ingestion and embedding.
    pub progress_every_files: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            queue_capacity: 16,
            progress_every_files: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// A fully defaulted configuration, for commands and tests that run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints. Called by [`load_config`].
    pub fn validate(&self) -> Result<()> {
        // Chunking
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.overlap,
                self.chunking.chunk_size
            );
        }

        // Ingest
        if let Some(bad) = self
            .ingest
            .allowed_extensions
            .iter()
            .find(|e| !e.starts_with('.') || e.to_lowercase() != **e)
        {
            bail!(
                "ingest.allowed_extensions entries must be lowercase and start with '.', got '{}'",
                bad
            );
        }
        for pattern in &self.ingest.exclude_globs {
            globset::Glob::new(pattern)
                .with_context(|| format!("ingest.exclude_globs: invalid pattern '{}'", pattern))?;
        }
        if self.ingest.clone_timeout_secs == 0 {
            bail!("ingest.clone_timeout_secs must be > 0");
        }

        // Embedding
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "local" | "hash" | "disabled" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, ollama, hash, or disabled.",
                other
            ),
        }

        // Index
        match self.index.backend.as_str() {
            "memory" | "sqlite" => {}
            other => bail!("index.backend must be memory or sqlite, got '{}'", other),
        }
        if self.index.top_k == 0 {
            bail!("index.top_k must be >= 1");
        }

        // Sampling
        if self.sampling.budget == 0 {
            bail!("sampling.budget must be >= 1");
        }
        if self.sampling.max_chars_per_sample == 0 {
            bail!("sampling.max_chars_per_sample must be > 0");
        }

        // LLM
        match self.llm.provider.as_str() {
            "gemini" | "openai" => {}
            other => bail!("llm.provider must be gemini or openai, got '{}'", other),
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be in [0.0, 2.0]");
        }
        if self.llm.max_transient_attempts == 0 {
            bail!("llm.max_transient_attempts must be >= 1");
        }
        if self.llm.timeout_secs == 0 {
            bail!("llm.timeout_secs must be > 0");
        }

        // Jobs
        if self.jobs.workers == 0 {
            bail!("jobs.workers must be >= 1");
        }
        if self.jobs.queue_capacity == 0 {
            bail!("jobs.queue_capacity must be >= 1");
        }
        if self.jobs.progress_every_files == 0 {
            bail!("jobs.progress_every_files must be >= 1");
        }

        // Logging
        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => bail!("logging.format must be pretty or json, got '{}'", other),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_is_valid() {
        let cfg = Config::minimal();
        cfg.validate().unwrap();
        assert_eq!(cfg.chunking.chunk_size, 800);
        assert_eq!(cfg.chunking.overlap, 120);
        assert_eq!(cfg.sampling.budget, 25);
        assert_eq!(cfg.jobs.workers, 1);
        assert_eq!(cfg.jobs.progress_every_files, 10);
        assert_eq!(cfg.llm.model_name(), "gemini-2.5-flash");
        assert!(cfg.ingest.skip_dirs.contains(&"node_modules".to_string()));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let f = write_config(
            r#"
[db]
path = "/tmp/rh-test.sqlite"

[chunking]
chunk_size = 400

[llm]
provider = "openai"
api_keys = ["k1", "k2"]
"#,
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("/tmp/rh-test.sqlite"));
        assert_eq!(cfg.chunking.chunk_size, 400);
        assert_eq!(cfg.chunking.overlap, 120);
        assert_eq!(cfg.llm.model_name(), "gpt-4o-mini");
        assert_eq!(cfg.llm.resolved_api_keys(), vec!["k1", "k2"]);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let f = write_config("[chunking]\nchunk_size = 100\noverlap = 100\n");
        let err = load_config(f.path()).unwrap_err().to_string();
        assert!(err.contains("chunking.overlap"), "{}", err);
    }

    #[test]
    fn rejects_unknown_providers_and_backends() {
        let f = write_config("[embedding]\nprovider = \"magic\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[index]\nbackend = \"faiss\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[llm]\nprovider = \"claude\"\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[embedding]\nprovider = \"openai\"\nmodel = \"x\"\n");
        let err = load_config(f.path()).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"), "{}", err);
    }

    #[test]
    fn rejects_bad_globs_and_extensions() {
        let f = write_config("[ingest]\nexclude_globs = [\"src/[\"]\n");
        assert!(load_config(f.path()).is_err());

        let f = write_config("[ingest]\nallowed_extensions = [\"rs\"]\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config(Path::new("/definitely/not/here.toml")).is_err());
    }

    #[test]
    fn numbered_env_keys_stop_at_first_gap() {
        let env: HashMap<&str, &str> = [
            ("RH_LLM_API_KEY_1", "a"),
            ("RH_LLM_API_KEY_2", "b"),
            ("RH_LLM_API_KEY_4", "d"),
            ("RH_LLM_API_KEY", "single"),
        ]
        .into_iter()
        .collect();
        let keys = keys_from_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(keys, vec!["a", "b"]);

        let keys = keys_from_env(|k| (k == "RH_LLM_API_KEY").then(|| "single".to_string()));
        assert_eq!(keys, vec!["single"]);

        assert!(keys_from_env(|_| None).is_empty());
    }
}
