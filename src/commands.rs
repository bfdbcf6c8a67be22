//! Command implementations behind `rh analyze`, `rh status` and `rh report`.
//!
//! Machine-readable output (snapshots, reports) goes to stdout as pretty
//! JSON; progress and logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use uuid::Uuid;

use repo_health_core::models::{JobId, JobStatus};

use crate::config::Config;
use crate::db;
use crate::jobs::{JobRegistry, SqliteJobStore};
use crate::migrate;
use crate::orchestrator::{start_from_config, wait_for_terminal};
use crate::progress::ProgressMode;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_job_id(raw: &str) -> Result<JobId> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("'{}' is not a job id", raw))
}

async fn open_registry(config: &Config) -> Result<JobRegistry> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    Ok(JobRegistry::new(Arc::new(SqliteJobStore::new(pool))))
}

/// Run one analysis in-process and print its report.
///
/// Fails (non-zero exit) when the job ends in `failed`.
pub async fn run_analyze(
    config: &Config,
    repo_url: &str,
    branch: Option<String>,
    mode: ProgressMode,
) -> Result<()> {
    let runtime = start_from_config(config).await?;
    let registry = runtime.service.registry().clone();

    let job = runtime.service.submit(repo_url, branch).await?;
    tracing::info!(job_id = %job.id, repo_url = %job.repo_url, "analysis queued");

    let reporter = mode.reporter();
    let job = wait_for_terminal(&registry, job.id, POLL_INTERVAL, reporter.as_ref()).await?;
    runtime.dispatcher.abort();

    match job.status {
        JobStatus::Completed => {
            let report = registry.report(job.id).await?;
            print_json(&report)
        }
        _ => bail!(
            "analysis {} failed: {}",
            job.id,
            job.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Queue an analysis on a running `rh serve` instance and print the snapshot.
pub async fn run_submit_remote(
    config: &Config,
    repo_url: &str,
    branch: Option<String>,
) -> Result<()> {
    let endpoint = format!("http://{}/api/analyze", config.server.bind);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let resp = client
        .post(&endpoint)
        .json(&serde_json::json!({ "repo_url": repo_url, "branch": branch }))
        .send()
        .await
        .with_context(|| format!("could not reach rh server at {} (is `rh serve` running?)", endpoint))?;

    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .with_context(|| format!("server returned a non-JSON response ({})", status))?;

    if !status.is_success() {
        let message = body
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("server rejected the analysis ({}): {}", status, message);
    }
    print_json(&body)
}

/// Print a job's status snapshot from the durable store.
pub async fn run_status(config: &Config, raw_id: &str) -> Result<()> {
    let id = parse_job_id(raw_id)?;
    let registry = open_registry(config).await?;
    let job = registry.get(id).await?;
    print_json(&job.snapshot())
}

/// Print a completed job's report from the durable store.
pub async fn run_report(config: &Config, raw_id: &str) -> Result<()> {
    let id = parse_job_id(raw_id)?;
    let registry = open_registry(config).await?;
    let report = registry.report(id).await?;
    print_json(&report)
}

/// Print the most recent jobs, newest first.
pub async fn run_jobs(config: &Config, limit: usize) -> Result<()> {
    let registry = open_registry(config).await?;
    let snapshots: Vec<_> = registry
        .list(limit)
        .await?
        .iter()
        .map(|job| job.snapshot())
        .collect();
    print_json(&snapshots)
}
