//! In-process job store for tests and `jobs` without a database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use repo_health_core::models::{Job, JobId, JobStatus};

use super::{JobStore, JobUpdate};
use crate::errors::RegistryError;

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> RegistryError {
    RegistryError::Persistence("job store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::Persistence(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn fetch(&self, id: JobId) -> Result<Option<Job>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn compare_and_set(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<bool, RegistryError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let Some(job) = jobs.get_mut(&id) else {
            return Err(RegistryError::NotFound(id));
        };
        if job.status != expected {
            return Ok(false);
        }
        job.status = update.status;
        job.progress_detail = update.progress_detail;
        if update.error_message.is_some() {
            job.error_message = update.error_message;
        }
        if update.report.is_some() {
            job.report = update.report;
        }
        job.updated_at = update.updated_at;
        Ok(true)
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut all: Vec<Job> = jobs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        all.truncate(limit);
        Ok(all)
    }

    async fn list_active(&self) -> Result<Vec<Job>, RegistryError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut active: Vec<Job> = jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(active)
    }
}
