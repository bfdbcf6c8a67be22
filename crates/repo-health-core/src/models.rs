//! Core data models shared by every pipeline stage.
//!
//! These types describe the analysis jobs tracked by the registry, the
//! source files produced by ingestion, and the chunks that flow through
//! embedding and sampling.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::report::Report;

/// Identifier of an analysis job.
pub type JobId = Uuid;

/// Lifecycle state of an analysis job.
///
/// Transitions are strictly forward: `pending → processing → {completed | failed}`.
/// A pending job may also fail directly (e.g. it could not be started).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// `true` for `completed` and `failed`; no writes are accepted afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// One tracked repository analysis.
///
/// The report is only ever present when `status == Completed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub repo_url: String,
    pub branch: Option<String>,
    pub status: JobStatus,
    pub progress_detail: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub report: Option<Report>,
}

impl Job {
    /// A fresh job in the `pending` state.
    pub fn new(repo_url: impl Into<String>, branch: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            repo_url: repo_url.into(),
            branch,
            status: JobStatus::Pending,
            progress_detail: "Analysis queued".to_string(),
            error_message: None,
            created_at: now,
            updated_at: now,
            report: None,
        }
    }

    /// The externally visible status payload (no report body).
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            status: self.status,
            progress_detail: self.progress_detail.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Read-only view of a [`Job`] returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub repo_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub status: JobStatus,
    pub progress_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A text file read from a cloned repository.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub content: String,
    /// Lowercased extension including the dot (e.g. `".rs"`), empty if none.
    pub extension: String,
    /// Language tag derived from the extension (e.g. `"rust"`).
    pub language: String,
}

/// A bounded, overlapping segment of a [`SourceFile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Deterministic id derived from the file path and chunk index.
    pub id: String,
    pub file_path: String,
    /// Position of this chunk within its file, contiguous from 0.
    pub chunk_index: usize,
    /// Byte offset of the chunk's first character within the file.
    pub byte_offset: usize,
    pub text: String,
    pub language: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>().unwrap(), s);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn transitions_are_forward_only() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Completed));
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new("https://github.com/octocat/Hello-World", None);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error_message.is_none());
        assert!(job.report.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn snapshot_serializes_snake_case_status() {
        let job = Job::new("https://github.com/octocat/Hello-World", None);
        let json = serde_json::to_value(job.snapshot()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["progress_detail"], "Analysis queued");
        assert!(json.get("error_message").is_none());
        assert!(json.get("job_id").is_some());
    }
}
