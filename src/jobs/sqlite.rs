//! SQLite-backed job store.
//!
//! Jobs live in `jobs`; a completed job's report is a JSON document in
//! `reports`, written in the same transaction as the `completed` status.
//! Timestamps are stored as Unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use repo_health_core::models::{Job, JobId, JobStatus};
use repo_health_core::report::Report;

use super::{JobStore, JobUpdate};
use crate::errors::RegistryError;

#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<Job, RegistryError> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    Ok(Job {
        id: id
            .parse()
            .map_err(|e| RegistryError::Persistence(format!("bad job id '{}': {}", id, e)))?,
        repo_url: row.get("repo_url"),
        branch: row.get("branch"),
        status: status.parse().map_err(RegistryError::Persistence)?,
        progress_detail: row.get("progress_detail"),
        error_message: row.get("error_message"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
        report: None,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO jobs (id, repo_url, branch, status, progress_detail, error_message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.repo_url)
        .bind(&job.branch)
        .bind(job.status.as_str())
        .bind(&job.progress_detail)
        .bind(&job.error_message)
        .bind(job.created_at.timestamp_millis())
        .bind(job.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: JobId) -> Result<Option<Job>, RegistryError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut job = row_to_job(&row)?;

        if job.status == JobStatus::Completed {
            let json: Option<String> =
                sqlx::query_scalar("SELECT report_json FROM reports WHERE job_id = ?")
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(json) = json {
                job.report = Some(serde_json::from_str::<Report>(&json)?);
            }
        }
        Ok(Some(job))
    }

    async fn compare_and_set(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, RegistryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs
             SET status = ?, progress_detail = ?, error_message = COALESCE(?, error_message), updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(update.status.as_str())
        .bind(&update.progress_detail)
        .bind(&update.error_message)
        .bind(update.updated_at.timestamp_millis())
        .bind(id.to_string())
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some(report) = &update.report {
            let json = serde_json::to_string(report)?;
            sqlx::query("INSERT INTO reports (job_id, report_json, created_at) VALUES (?, ?, ?)")
                .bind(id.to_string())
                .bind(json)
                .bind(update.updated_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, RegistryError> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC, id LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_active(&self) -> Result<Vec<Job>, RegistryError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status IN ('pending', 'processing') ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }
}
