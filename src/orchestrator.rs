//! Job orchestration: the analysis pipeline and the queue that feeds it.
//!
//! ```text
//! submit ─▶ [bounded FIFO queue] ─▶ dispatcher ─▶ execution slot ─▶ Pipeline::run
//!                                                 (Semaphore, `[jobs] workers`)
//! ```
//!
//! [`AnalysisService::submit`] validates the URL, reserves queue space,
//! records a `pending` job, and returns immediately. The dispatcher pulls
//! job ids in submission order and only starts one once an execution slot
//! is free, so with `workers = 1` jobs never interleave.
//!
//! [`Pipeline::run`] drives one job to a terminal state:
//!
//! 1. ingest (clone + walk) into `<workspace.dir>/<job_id>/`
//! 2. chunk every file
//! 3. embed chunks into the job's collection
//! 4. sample from the collection
//! 5. generate the report
//!
//! Whatever happens, the job's collection is deleted before the terminal
//! status is written. The workspace is kept.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use repo_health_core::chunk::chunk_file;
use repo_health_core::models::{Chunk, Job, JobId};
use repo_health_core::report::Report;
use repo_health_core::sample::{self, SamplingError};

use crate::config::{ChunkingConfig, Config};
use crate::db;
use crate::embedding::create_embedder;
use crate::errors::{PipelineError, RegistryError, SubmitError};
use crate::generator::{ReportGenerator, RetryPolicy};
use crate::index::{create_store, EmbeddingIndex};
use crate::ingest::{normalize_repo_url, CloneProvider, GitCli, Ingestor};
use crate::jobs::{JobRegistry, SqliteJobStore};
use crate::llm::{create_provider, CredentialPool, LlmProvider};
use crate::migrate;
use crate::progress::{JobProgress, ProgressEvent, ProgressSink, StatusReporter};

/// The stage sequence for one job.
pub struct Pipeline {
    registry: JobRegistry,
    ingestor: Ingestor,
    index: EmbeddingIndex,
    generator: ReportGenerator,
    chunking: ChunkingConfig,
    sample_budget: usize,
}

impl Pipeline {
    pub fn new(
        registry: JobRegistry,
        ingestor: Ingestor,
        index: EmbeddingIndex,
        generator: ReportGenerator,
        chunking: ChunkingConfig,
        sample_budget: usize,
    ) -> Self {
        Self {
            registry,
            ingestor,
            index,
            generator,
            chunking,
            sample_budget,
        }
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    /// Run a `pending` job to `completed` or `failed`.
    ///
    /// Stage errors never escape: they become the job's `error_message`.
    /// The `Err` case is reserved for registry failures.
    pub async fn run(&self, job_id: JobId) -> Result<(), RegistryError> {
        let job = self.registry.get(job_id).await?;
        self.registry
            .mark_processing(job_id, "Starting analysis")
            .await?;
        tracing::info!(%job_id, repo_url = %job.repo_url, "analysis started");

        let progress = JobProgress::new(self.registry.clone(), job_id);
        let outcome = self.execute(&job, &progress).await;

        if let Err(e) = self.index.delete(job_id).await {
            tracing::error!(%job_id, error = %e, "failed to delete embedding collection");
        }

        match outcome {
            Ok(report) => {
                let score = report.overall_score;
                if let Err(e) = self.registry.mark_completed(job_id, report).await {
                    let reason = PipelineError::Persistence(e).to_string();
                    tracing::error!(%job_id, error = %reason, "could not store report");
                    self.registry.mark_failed(job_id, &reason).await?;
                    return Ok(());
                }
                tracing::info!(%job_id, score, "analysis completed");
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(%job_id, error = %reason, "analysis failed");
                self.registry.mark_failed(job_id, &reason).await?;
            }
        }
        Ok(())
    }

    async fn execute(&self, job: &Job, progress: &dyn ProgressSink) -> Result<Report, PipelineError> {
        let ingested = self
            .ingestor
            .ingest(job.id, &job.repo_url, job.branch.as_deref(), progress)
            .await?;

        progress
            .report(ProgressEvent::Chunking {
                files: ingested.files.len(),
            })
            .await;
        let mut chunks: Vec<Chunk> = Vec::new();
        for file in &ingested.files {
            chunks.extend(chunk_file(
                file,
                self.chunking.chunk_size,
                self.chunking.overlap,
            )?);
        }
        if chunks.is_empty() {
            return Err(SamplingError::EmptyCorpus.into());
        }
        tracing::info!(job_id = %job.id, files = ingested.files.len(), chunks = chunks.len(), "chunked");

        self.index.build(job.id, &chunks, progress).await?;

        let indexed = self.index.chunks(job.id).await?;
        progress
            .report(ProgressEvent::Sampling {
                chunks: indexed.len(),
            })
            .await;
        let samples = sample::select(&ingested.files, &indexed, self.sample_budget)?;

        progress
            .report(ProgressEvent::Generating {
                samples: samples.samples.len(),
            })
            .await;
        Ok(self.generator.generate(&samples).await?)
    }
}

/// Accepts analysis requests and runs them in the background.
#[derive(Clone)]
pub struct AnalysisService {
    registry: JobRegistry,
    queue: mpsc::Sender<JobId>,
    capacity: usize,
}

impl AnalysisService {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    ///
    /// Returns the service handle and the dispatcher task, which ends once
    /// every service handle has been dropped and the queue drained.
    pub fn start(
        pipeline: Arc<Pipeline>,
        registry: JobRegistry,
        workers: usize,
        queue_capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let slots = Arc::new(Semaphore::new(workers.max(1)));
        let dispatcher = tokio::spawn(dispatch(rx, pipeline, registry.clone(), slots));
        (
            Self {
                registry,
                queue: tx,
                capacity: queue_capacity.max(1),
            },
            dispatcher,
        )
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Record a `pending` job and queue it. Never waits for the pipeline.
    pub async fn submit(&self, repo_url: &str, branch: Option<String>) -> Result<Job, SubmitError> {
        let url = normalize_repo_url(repo_url).map_err(SubmitError::InvalidUrl)?;
        let branch = branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty());

        let permit = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => SubmitError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(()) => SubmitError::Closed,
        })?;

        let job = self.registry.create(&url, branch).await?;
        permit.send(job.id);
        Ok(job)
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<JobId>,
    pipeline: Arc<Pipeline>,
    registry: JobRegistry,
    slots: Arc<Semaphore>,
) {
    while let Some(job_id) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let pipeline = pipeline.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let _slot = permit;
            let run = tokio::spawn({
                let pipeline = pipeline.clone();
                async move { pipeline.run(job_id).await }
            });
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(%job_id, error = %e, "job registry error"),
                Err(join) => {
                    tracing::error!(%job_id, error = %join, "analysis task aborted");
                    if let Err(e) = pipeline.index().delete(job_id).await {
                        tracing::error!(%job_id, error = %e, "failed to delete embedding collection");
                    }
                    if let Err(e) = registry
                        .mark_failed(job_id, "Analysis aborted by an internal error")
                        .await
                    {
                        tracing::error!(%job_id, error = %e, "could not mark aborted job failed");
                    }
                }
            }
        });
    }
    tracing::debug!("dispatcher stopped");
}

/// Poll until the job is terminal, reporting every change.
pub async fn wait_for_terminal(
    registry: &JobRegistry,
    job_id: JobId,
    poll: Duration,
    reporter: &dyn StatusReporter,
) -> Result<Job, RegistryError> {
    let mut last: Option<(String, String)> = None;
    loop {
        let job = registry.get(job_id).await?;
        let key = (job.status.to_string(), job.progress_detail.clone());
        if last.as_ref() != Some(&key) {
            reporter.report(&job.snapshot());
            last = Some(key);
        }
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(poll).await;
    }
}

/// Everything a running service needs, built from configuration.
pub struct Runtime {
    pub service: AnalysisService,
    pub dispatcher: JoinHandle<()>,
    pub pipeline: Arc<Pipeline>,
}

/// Wire the durable registry, providers and pipeline from `config` and
/// start the dispatcher.
///
/// Jobs already in the store are left alone: another process (a running
/// `rh serve`) may still own them. Restart recovery belongs to
/// [`crate::server::start_server_runtime`].
pub async fn start_from_config(config: &Config) -> Result<Runtime> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let registry = JobRegistry::new(Arc::new(SqliteJobStore::new(pool.clone())));

    let cloner: Arc<dyn CloneProvider> = Arc::new(GitCli::from_config(&config.ingest));
    let ingestor = Ingestor::new(
        cloner,
        config.ingest.clone(),
        config.workspace.dir.clone(),
        config.jobs.progress_every_files,
    )?;

    let store = create_store(&config.index.backend, &pool)?;
    let embedder = create_embedder(&config.embedding)?;
    let index = EmbeddingIndex::new(store, embedder, config.embedding.batch_size);

    let provider: Arc<dyn LlmProvider> = create_provider(&config.llm)?;
    let keys = config.llm.resolved_api_keys();
    if keys.is_empty() {
        tracing::warn!("no LLM API keys configured; every analysis will fail at report generation");
    }
    let generator = ReportGenerator::new(
        provider,
        Arc::new(CredentialPool::new(keys)),
        RetryPolicy::from_config(&config.llm),
        config.sampling.max_chars_per_sample,
    );

    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        ingestor,
        index,
        generator,
        config.chunking.clone(),
        config.sampling.budget,
    ));
    let (service, dispatcher) = AnalysisService::start(
        pipeline.clone(),
        registry,
        config.jobs.workers,
        config.jobs.queue_capacity,
    );
    Ok(Runtime {
        service,
        dispatcher,
        pipeline,
    })
}
