//! Job progress reporting.
//!
//! Two directions share this module:
//!
//! - **Pipeline → registry.** Stages emit [`ProgressEvent`]s into a
//!   [`ProgressSink`]; [`JobProgress`] turns each one into the job's
//!   `progress_detail`. Per-file events are only emitted every
//!   `[jobs] progress_every_files` files to bound registry writes.
//! - **Registry → terminal.** `rh analyze` polls the job and hands each
//!   changed snapshot to a [`StatusReporter`] (human or JSON lines on
//!   **stderr**, so stdout remains parseable for scripts).

use std::io::Write;

use async_trait::async_trait;

use repo_health_core::models::{JobId, JobSnapshot};

use crate::jobs::JobRegistry;

/// One observable step of an analysis.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    Cloning,
    /// Tree walked; `found` candidate files survive the filters.
    Parsing { found: usize },
    /// `read` of `total` candidate files loaded.
    Reading { read: usize, total: usize },
    Chunking { files: usize },
    Embedding { done: usize, total: usize },
    Sampling { chunks: usize },
    Generating { samples: usize },
}

impl ProgressEvent {
    /// The `progress_detail` text for this event.
    pub fn detail(&self) -> String {
        match self {
            Self::Cloning => "Cloning repository".to_string(),
            Self::Parsing { found } => format!("Parsing files ({} found)", format_number(*found as u64)),
            Self::Reading { read, total } => format!(
                "Parsing files ({} / {} read)",
                format_number(*read as u64),
                format_number(*total as u64)
            ),
            Self::Chunking { files } => {
                format!("Chunking {} files", format_number(*files as u64))
            }
            Self::Embedding { done, total } => format!(
                "Creating embeddings ({} / {} chunks)",
                format_number(*done as u64),
                format_number(*total as u64)
            ),
            Self::Sampling { chunks } => format!(
                "Selecting code samples from {} chunks",
                format_number(*chunks as u64)
            ),
            Self::Generating { samples } => {
                format!("Generating report from {} samples", samples)
            }
        }
    }
}

/// Receives pipeline progress.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, event: ProgressEvent);
}

/// Writes each event to the job's `progress_detail`.
///
/// A rejected write (the job is no longer processing) is logged and
/// otherwise ignored; progress never fails a job.
pub struct JobProgress {
    registry: JobRegistry,
    job_id: JobId,
}

impl JobProgress {
    pub fn new(registry: JobRegistry, job_id: JobId) -> Self {
        Self { registry, job_id }
    }
}

#[async_trait]
impl ProgressSink for JobProgress {
    async fn report(&self, event: ProgressEvent) {
        let detail = event.detail();
        tracing::debug!(job_id = %self.job_id, %detail, "progress");
        if let Err(e) = self.registry.update_progress(self.job_id, &detail).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "progress update dropped");
        }
    }
}

/// `true` when a per-item event should be emitted for item `n` (1-based) of `total`.
pub fn should_report(n: usize, total: usize, every: usize) -> bool {
    n == total || (every > 0 && n % every == 0)
}

/// Prints job snapshots for `rh analyze`.
pub trait StatusReporter: Send + Sync {
    fn report(&self, snapshot: &JobSnapshot);
}

/// Human-friendly status on stderr: "job 3f2a…  processing  Creating embeddings (640 / 1,210 chunks)".
pub struct StderrProgress;

impl StatusReporter for StderrProgress {
    fn report(&self, snapshot: &JobSnapshot) {
        let id = snapshot.job_id.simple().to_string();
        let line = format!(
            "job {}  {:<10}  {}\n",
            &id[..8],
            snapshot.status.as_str(),
            snapshot.progress_detail
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonProgress;

impl StatusReporter for JsonProgress {
    fn report(&self, snapshot: &JobSnapshot) {
        let obj = serde_json::json!({
            "event": "progress",
            "job_id": snapshot.job_id,
            "status": snapshot.status,
            "detail": snapshot.progress_detail,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// Discards everything. Usable on both sides.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _event: ProgressEvent) {}
}

impl StatusReporter for NoProgress {
    fn report(&self, _snapshot: &JobSnapshot) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn StatusReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
