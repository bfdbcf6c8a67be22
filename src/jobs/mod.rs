//! Durable job registry and its state machine.
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    │             │
//!    └─────────────┴───────▶ failed
//! ```
//!
//! [`JobRegistry`] enforces the transitions; a [`JobStore`] persists
//! them. Every store write is a compare-and-set on the job's current
//! status, so once a job is terminal no later write (progress, a second
//! completion, a late failure) can change it.
//!
//! Reads return owned snapshots and never wait on the pipeline.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use repo_health_core::models::{Job, JobId, JobStatus};
use repo_health_core::report::Report;

use crate::errors::RegistryError;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Fields written by one state-machine step.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub progress_detail: String,
    pub error_message: Option<String>,
    /// Only set together with `status == Completed`.
    pub report: Option<Report>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence for jobs and their reports.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new job. Fails if the id already exists.
    async fn insert(&self, job: &Job) -> Result<(), RegistryError>;

    /// Load a job, including its report when completed.
    async fn fetch(&self, id: JobId) -> Result<Option<Job>, RegistryError>;

    /// Apply `update` only if the job's status is still `expected`.
    /// Returns `false` (and writes nothing) otherwise.
    async fn compare_and_set(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, RegistryError>;

    /// Most recent jobs first.
    async fn list(&self, limit: usize) -> Result<Vec<Job>, RegistryError>;

    /// Every `pending` or `processing` job, oldest first.
    async fn list_active(&self) -> Result<Vec<Job>, RegistryError>;
}

/// The job state machine over a [`JobStore`].
#[derive(Clone)]
pub struct JobRegistry {
    store: Arc<dyn JobStore>,
}

impl JobRegistry {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// A registry backed by [`MemoryJobStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryJobStore::new()))
    }

    /// Register a new `pending` job.
    pub async fn create(
        &self,
        repo_url: &str,
        branch: Option<String>,
    ) -> Result<Job, RegistryError> {
        let job = Job::new(repo_url, branch);
        self.store.insert(&job).await?;
        tracing::info!(job_id = %job.id, repo_url, "job created");
        Ok(job)
    }

    /// Current snapshot of a job.
    pub async fn get(&self, id: JobId) -> Result<Job, RegistryError> {
        self.store
            .fetch(id)
            .await?
            .ok_or(RegistryError::NotFound(id))
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Job>, RegistryError> {
        self.store.list(limit).await
    }

    /// Fail every job left `pending` or `processing` by a previous process.
    ///
    /// Jobs are not resumable, so after a restart nothing would ever move
    /// them to a terminal state. Returns the number of jobs failed.
    pub async fn fail_interrupted(&self) -> Result<usize, RegistryError> {
        let active = self.store.list_active().await?;
        let mut failed = 0;
        for job in active {
            match self
                .mark_failed(job.id, "Analysis interrupted by a service restart")
                .await
            {
                Ok(()) => failed += 1,
                Err(RegistryError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if failed > 0 {
            tracing::warn!(failed, "failed jobs interrupted by restart");
        }
        Ok(failed)
    }

    /// `pending → processing`.
    pub async fn mark_processing(&self, id: JobId, detail: &str) -> Result<(), RegistryError> {
        self.transition(id, JobStatus::Processing, detail.to_string(), None, None)
            .await
    }

    /// Overwrite `progress_detail`. Only accepted while the job is processing.
    pub async fn update_progress(&self, id: JobId, detail: &str) -> Result<(), RegistryError> {
        let job = self.get(id).await?;
        if job.status != JobStatus::Processing {
            return Err(RegistryError::ProgressRejected {
                id,
                status: job.status,
            });
        }
        let update = JobUpdate {
            status: JobStatus::Processing,
            progress_detail: detail.to_string(),
            error_message: None,
            report: None,
            updated_at: Utc::now(),
        };
        if self
            .store
            .compare_and_set(id, JobStatus::Processing, update)
            .await?
        {
            Ok(())
        } else {
            let now = self.get(id).await?;
            Err(RegistryError::ProgressRejected {
                id,
                status: now.status,
            })
        }
    }

    /// `processing → completed`, storing the report.
    pub async fn mark_completed(&self, id: JobId, report: Report) -> Result<(), RegistryError> {
        self.transition(
            id,
            JobStatus::Completed,
            "Analysis complete".to_string(),
            None,
            Some(report),
        )
        .await
    }

    /// `pending | processing → failed`.
    pub async fn mark_failed(&self, id: JobId, reason: &str) -> Result<(), RegistryError> {
        let reason = if reason.trim().is_empty() {
            "Analysis failed".to_string()
        } else {
            reason.to_string()
        };
        self.transition(
            id,
            JobStatus::Failed,
            "Analysis failed".to_string(),
            Some(reason),
            None,
        )
        .await
    }

    /// The report of a completed job; a typed refusal otherwise.
    pub async fn report(&self, id: JobId) -> Result<Report, RegistryError> {
        let job = self.get(id).await?;
        match job.status {
            JobStatus::Completed => job.report.ok_or_else(|| {
                RegistryError::Persistence(format!("completed job {} has no stored report", id))
            }),
            JobStatus::Failed => Err(RegistryError::Failed {
                id,
                reason: job.error_message.unwrap_or_default(),
            }),
            status => Err(RegistryError::NotReady { id, status }),
        }
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        progress_detail: String,
        error_message: Option<String>,
        report: Option<Report>,
    ) -> Result<(), RegistryError> {
        let job = self.get(id).await?;
        if !job.status.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: job.status,
                to,
            });
        }

        let update = JobUpdate {
            status: to,
            progress_detail,
            error_message,
            report,
            updated_at: Utc::now(),
        };
        if self.store.compare_and_set(id, job.status, update).await? {
            tracing::debug!(job_id = %id, from = %job.status, %to, "job transition");
            Ok(())
        } else {
            // Lost a race with another writer.
            let now = self.get(id).await?;
            Err(RegistryError::InvalidTransition {
                id,
                from: now.status,
                to,
            })
        }
    }
}
