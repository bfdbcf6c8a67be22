//! Typed error hierarchy for the analysis pipeline.
//!
//! One enum per stage, plus [`PipelineError`] which the orchestrator
//! converts into a job's human-readable `error_message`. Chunking and
//! sampling errors come from `repo-health-core` and are re-exported here.

use std::path::PathBuf;

use thiserror::Error;

use repo_health_core::models::{JobId, JobStatus};
use repo_health_core::store::StoreError;

pub use repo_health_core::chunk::ChunkError;
pub use repo_health_core::sample::SamplingError;

/// Cloning or reading a repository failed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("authentication failed for {url} (private or nonexistent repository)")]
    Auth { url: String },

    #[error("network error while cloning {url}: {message}")]
    Network { url: String, message: String },

    #[error("branch '{branch}' not found in {url}")]
    MissingBranch { url: String, branch: String },

    #[error("git clone of {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("git clone failed: {0}")]
    Git(String),

    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Computing or storing embeddings failed. Always fatal for the job.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider failed on batch {batch} ({size} chunks): {message}")]
    Provider {
        batch: usize,
        size: usize,
        message: String,
    },

    #[error("embedding provider returned {actual} vectors for {expected} chunks")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider is disabled (set [embedding] provider)")]
    Disabled,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One failed LLM call, classified for the retry policy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    /// HTTP 429 or a provider quota error: rotate to the next key.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Timeout, connection failure, or 5xx: back off and retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything else (bad request, auth, blocked content): do not retry.
    #[error("request rejected: {0}")]
    Fatal(String),
}

/// The report could not be produced.
#[derive(Debug, Error, PartialEq)]
pub enum GenerationError {
    #[error("no LLM API keys configured (set [llm] api_keys or RH_LLM_API_KEY_1..)")]
    NoCredentials,

    #[error("all {keys} LLM API keys are rate limited")]
    CredentialsExhausted { keys: usize },

    #[error("LLM request failed after {attempts} attempts: {message}")]
    TransientExhausted { attempts: u32, message: String },

    #[error("LLM request rejected: {0}")]
    Provider(String),

    #[error("LLM returned a malformed report after a repair retry: {0}")]
    Malformed(String),
}

/// Job-registry failures, including persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {id} is {status}; progress is only accepted while processing")]
    ProgressRejected { id: JobId, status: JobStatus },

    #[error("report for job {id} is not ready (status: {status})")]
    NotReady { id: JobId, status: JobStatus },

    #[error("job {id} failed: {reason}")]
    Failed { id: JobId, reason: String },

    #[error("job store error: {0}")]
    Persistence(String),
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        RegistryError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Persistence(format!("report serialization: {}", e))
    }
}

/// Any stage failure. `Display` is what a failed job shows as `error_message`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Repository ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("Chunking failed: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Sampling failed: {0}")]
    Sampling(#[from] SamplingError),

    #[error("Report generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] RegistryError),
}

/// Rejections at submission time (before a job exists or starts).
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    InvalidUrl(IngestError),

    #[error("analysis queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    #[error("analysis service is shutting down")]
    Closed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn pipeline_messages_name_the_stage() {
        let e: PipelineError = IngestError::MissingBranch {
            url: "https://github.com/o/r".into(),
            branch: "dev".into(),
        }
        .into();
        assert_eq!(
            e.to_string(),
            "Repository ingestion failed: branch 'dev' not found in https://github.com/o/r"
        );

        let e: PipelineError = SamplingError::EmptyCorpus.into();
        assert!(e.to_string().starts_with("Sampling failed:"));

        let e: PipelineError = GenerationError::CredentialsExhausted { keys: 3 }.into();
        assert_eq!(
            e.to_string(),
            "Report generation failed: all 3 LLM API keys are rate limited"
        );
    }

    #[test]
    fn store_errors_convert_into_embedding_errors() {
        let e: EmbeddingError = StoreError::DimensionMismatch {
            expected: 384,
            actual: 12,
        }
        .into();
        assert!(e.to_string().contains("384"));
    }

    #[test]
    fn registry_messages_include_ids() {
        let id = Uuid::nil();
        let e = RegistryError::NotReady {
            id,
            status: JobStatus::Processing,
        };
        assert!(e.to_string().contains("processing"));
        assert!(e.to_string().contains(&id.to_string()));
    }

    #[test]
    fn io_error_keeps_source() {
        use std::error::Error as _;
        let e = IngestError::Io {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.source().is_some());
    }
}
