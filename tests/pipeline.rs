//! End-to-end tests of the analysis service.
//!
//! Real ingestion, chunking, indexing, sampling and job registry; the
//! network edges are replaced: a fixture cloner writes a small repository
//! to disk instead of running `git`, the hash embedder stands in for a
//! model, and a fake LLM answers with a canned report or a canned failure.

use async_trait::async_trait;
use repo_health::config::{ChunkingConfig, IngestConfig};
use repo_health::db;
use repo_health::embedding::HashEmbedder;
use repo_health::errors::{IngestError, LlmError, RegistryError, SubmitError};
use repo_health::generator::{ReportGenerator, RetryPolicy};
use repo_health::index::{create_store, EmbeddingIndex};
use repo_health::ingest::{CloneProvider, Ingestor};
use repo_health::jobs::{JobRegistry, SqliteJobStore};
use repo_health::llm::{CredentialPool, LlmProvider};
use repo_health::migrate;
use repo_health::orchestrator::{wait_for_terminal, AnalysisService, Pipeline};
use repo_health::progress::NoProgress;
use repo_health_core::models::{Job, JobId, JobStatus};
use repo_health_core::store::memory::InMemoryStore;
use repo_health_core::store::VectorStore;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

const REPORT: &str = r#"{
  "overall_score": 78,
  "summary": "A small Flask service with reasonable structure.",
  "vulnerabilities": [
    {"severity": "medium", "affected_component": "requirements.txt", "description": "requests is not pinned"}
  ],
  "recommendations": ["Pin all dependencies", "Add tests"]
}"#;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Writes a fixed repository for `octocat` URLs; anything else is unreachable.
struct FixtureCloner {
    cloned: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FixtureCloner {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cloned: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            cloned: Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    fn cloned(&self) -> Vec<String> {
        self.cloned.lock().unwrap().clone()
    }
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

#[async_trait]
impl CloneProvider for FixtureCloner {
    async fn clone_repo(
        &self,
        url: &str,
        _branch: Option<&str>,
        dest: &Path,
    ) -> Result<(), IngestError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.cloned.lock().unwrap().push(url.to_string());

        if url.contains("unreachable") {
            return Err(IngestError::Network {
                url: url.to_string(),
                message: "Could not resolve host: unreachable.invalid".to_string(),
            });
        }

        std::fs::create_dir_all(dest).unwrap();
        if url.contains("empty") {
            std::fs::write(dest.join("logo.png"), [0x89u8, b'P', b'N', b'G', 0, 0]).unwrap();
            return Ok(());
        }
        write(dest, "README.md", "# Hello World\n\nMy first repository on GitHub.\n");
        write(
            dest,
            "app.py",
            &"from flask import Flask\napp = Flask(__name__)\n\n@app.route('/')\ndef index():\n    return 'hello'\n"
                .repeat(20),
        );
        write(dest, "requirements.txt", "flask==3.0.0\nrequests\n");
        write(dest, "static/site.js", "export function greet(name) { return `hi ${name}`; }\n");
        write(dest, "node_modules/left-pad/index.js", "module.exports = 1;\n");
        Ok(())
    }
}

/// What [`CannedLlm`] does on every call.
#[derive(Clone, Copy, Default)]
enum Reply {
    #[default]
    Report,
    RateLimited,
    Panic,
}

/// Answers every call the same way and tracks overlapping calls. With a
/// gate, each call blocks until a permit is added.
#[derive(Default)]
struct CannedLlm {
    reply: Reply,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl CannedLlm {
    fn replying(reply: Reply, gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            gate,
            ..Self::default()
        })
    }
}

#[async_trait]
impl LlmProvider for CannedLlm {
    fn name(&self) -> &str {
        "canned"
    }

    async fn complete(
        &self,
        _api_key: &str,
        _prompt: &str,
        _schema_hint: &str,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        match self.reply {
            Reply::Report => Ok(REPORT.to_string()),
            Reply::RateLimited => Err(LlmError::RateLimited("429 quota exceeded".into())),
            Reply::Panic => panic!("model client bug"),
        }
    }
}

// ─── Harness ────────────────────────────────────────────────────────

struct Harness {
    service: AnalysisService,
    registry: JobRegistry,
    pipeline: Arc<Pipeline>,
    cloner: Arc<FixtureCloner>,
    llm: Arc<CannedLlm>,
    _tmp: TempDir,
}

async fn harness(cloner: Arc<FixtureCloner>, backend: &str, queue_capacity: usize) -> Harness {
    harness_with(cloner, backend, queue_capacity, Arc::new(CannedLlm::default())).await
}

async fn harness_with(
    cloner: Arc<FixtureCloner>,
    backend: &str,
    queue_capacity: usize,
    llm: Arc<CannedLlm>,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_in_memory().await.unwrap();
    migrate::migrate(&pool).await.unwrap();
    let registry = JobRegistry::new(Arc::new(SqliteJobStore::new(pool.clone())));

    let ingestor = Ingestor::new(
        cloner.clone(),
        IngestConfig::default(),
        tmp.path().join("workspaces"),
        2,
    )
    .unwrap();

    let store: Arc<dyn VectorStore> = match backend {
        "memory" => Arc::new(InMemoryStore::new()),
        other => create_store(other, &pool).unwrap(),
    };
    let index = EmbeddingIndex::new(store, Arc::new(HashEmbedder::new(64)), 4);

    let generator = ReportGenerator::new(
        llm.clone(),
        Arc::new(CredentialPool::new(vec!["test-key".to_string()])),
        RetryPolicy {
            max_transient_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(1),
        },
        1200,
    );

    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        ingestor,
        index,
        generator,
        ChunkingConfig {
            chunk_size: 200,
            overlap: 40,
        },
        25,
    ));
    let (service, _dispatcher) =
        AnalysisService::start(pipeline.clone(), registry.clone(), 1, queue_capacity);

    Harness {
        service,
        registry,
        pipeline,
        cloner,
        llm,
        _tmp: tmp,
    }
}

async fn finish(h: &Harness, id: JobId) -> Job {
    tokio::time::timeout(
        Duration::from_secs(20),
        wait_for_terminal(&h.registry, id, Duration::from_millis(10), &NoProgress),
    )
    .await
    .expect("job did not finish in time")
    .unwrap()
}

async fn wait_for_status(h: &Harness, id: JobId, status: JobStatus) {
    for _ in 0..500 {
        if h.registry.get(id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", id, status);
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn public_repository_completes_with_a_report() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    let job = h
        .service
        .submit("github.com/octocat/Hello-World", None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.repo_url, "https://github.com/octocat/Hello-World");

    let done = finish(&h, job.id).await;
    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error_message);
    assert_eq!(done.progress_detail, "Analysis complete");
    assert!(done.error_message.is_none());

    let report = h.registry.report(job.id).await.unwrap();
    assert!((0.0..=100.0).contains(&report.overall_score));
    assert_eq!(report.overall_score, 78.0);
    assert!(!report.summary.is_empty());
    assert_eq!(report.vulnerabilities.len(), 1);
    assert_eq!(report.languages_detected.get("Python"), Some(&1));
    assert!(report.dependencies_found["Python"].contains(&"flask".to_string()));
    // README.md, app.py, requirements.txt, static/site.js; node_modules skipped.
    assert_eq!(report.total_files_analyzed, 4);
    assert!(report.analysis_timestamp.is_some());

    assert_eq!(h.pipeline.index().count(job.id).await.unwrap(), 0);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_repository_fails_with_a_reason() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    let job = h
        .service
        .submit("https://unreachable.invalid/owner/repo", None)
        .await
        .unwrap();
    let done = finish(&h, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    let reason = done.error_message.expect("failed job has a reason");
    assert!(
        reason.starts_with("Repository ingestion failed:"),
        "unexpected reason: {}",
        reason
    );
    assert!(matches!(
        h.registry.report(job.id).await,
        Err(RegistryError::Failed { .. })
    ));
    assert_eq!(h.pipeline.index().count(job.id).await.unwrap(), 0);
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
}

/// Runs a job whose generation step fails after its vectors are stored and
/// checks that the failed job leaves no collection behind.
async fn fails_after_indexing(backend: &str, reply: Reply, reason: &str) {
    let gate = Arc::new(Semaphore::new(0));
    let llm = CannedLlm::replying(reply, Some(gate.clone()));
    let h = harness_with(FixtureCloner::new(), backend, 16, llm).await;

    let job = h
        .service
        .submit("github.com/octocat/Hello-World", None)
        .await
        .unwrap();

    // The job is parked inside the model call with its collection populated.
    for _ in 0..500 {
        if h.llm.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 1, "generation never started");
    assert!(h.pipeline.index().count(job.id).await.unwrap() > 0);

    gate.add_permits(16);
    let done = finish(&h, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    let message = done.error_message.expect("failed job has a reason");
    assert!(message.starts_with(reason), "unexpected reason: {}", message);
    assert!(matches!(
        h.registry.report(job.id).await,
        Err(RegistryError::Failed { .. })
    ));
    assert_eq!(h.pipeline.index().count(job.id).await.unwrap(), 0);
}

#[tokio::test]
async fn rate_limited_generation_drops_the_memory_collection() {
    fails_after_indexing("memory", Reply::RateLimited, "Report generation failed:").await;
}

#[tokio::test]
async fn rate_limited_generation_drops_the_sqlite_collection() {
    fails_after_indexing("sqlite", Reply::RateLimited, "Report generation failed:").await;
}

#[tokio::test]
async fn panicking_generation_drops_the_memory_collection() {
    fails_after_indexing("memory", Reply::Panic, "Analysis aborted by an internal error").await;
}

#[tokio::test]
async fn panicking_generation_drops_the_sqlite_collection() {
    fails_after_indexing("sqlite", Reply::Panic, "Analysis aborted by an internal error").await;
}

#[tokio::test]
async fn repository_without_text_files_fails_before_generation() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    let job = h
        .service
        .submit("github.com/octocat/empty-repo", None)
        .await
        .unwrap();
    let done = finish(&h, job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done
        .error_message
        .unwrap()
        .starts_with("Sampling failed: no analyzable content"));
    assert_eq!(h.llm.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_url_is_rejected_without_creating_a_job() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    for bad in ["", "not a url", "/tmp/local/repo", "file:///etc/passwd", "https://github.com/"] {
        let err = h.service.submit(bad, None).await.unwrap_err();
        assert!(matches!(err, SubmitError::InvalidUrl(_)), "{:?} accepted", bad);
    }
    assert!(h.registry.list(10).await.unwrap().is_empty());
    assert!(h.cloner.cloned().is_empty());
}

#[tokio::test]
async fn jobs_run_one_at_a_time_in_submission_order() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    let mut ids = Vec::new();
    for name in ["alpha", "beta", "gamma"] {
        let job = h
            .service
            .submit(&format!("github.com/octocat/{}", name), None)
            .await
            .unwrap();
        ids.push(job.id);
    }
    for id in &ids {
        assert_eq!(finish(&h, *id).await.status, JobStatus::Completed);
    }

    assert_eq!(
        h.cloner.cloned(),
        vec![
            "https://github.com/octocat/alpha",
            "https://github.com/octocat/beta",
            "https://github.com/octocat/gamma",
        ]
    );
    assert_eq!(h.llm.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn full_queue_rejects_new_submissions() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FixtureCloner::gated(gate.clone()), "memory", 1).await;

    // A occupies the execution slot, blocked in its clone.
    let a = h.service.submit("github.com/octocat/a", None).await.unwrap();
    wait_for_status(&h, a.id, JobStatus::Processing).await;

    // B is taken off the queue by the dispatcher, which then waits for the slot.
    let b = h.service.submit("github.com/octocat/b", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // C fills the one queue slot; D does not fit.
    let c = h.service.submit("github.com/octocat/c", None).await.unwrap();
    let err = h
        .service
        .submit("github.com/octocat/d", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SubmitError::QueueFull { capacity: 1 }));
    assert_eq!(h.registry.get(b.id).await.unwrap().status, JobStatus::Pending);

    gate.add_permits(3);
    for id in [a.id, b.id, c.id] {
        assert_eq!(finish(&h, id).await.status, JobStatus::Completed);
    }
    assert_eq!(h.registry.list(10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn sqlite_index_backend_drops_the_collection() {
    let h = harness(FixtureCloner::new(), "sqlite", 16).await;

    let job = h
        .service
        .submit("git@github.com:octocat/Hello-World.git", Some("main".into()))
        .await
        .unwrap();
    assert_eq!(job.branch.as_deref(), Some("main"));

    let done = finish(&h, job.id).await;
    assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error_message);
    assert_eq!(h.pipeline.index().count(job.id).await.unwrap(), 0);
}

#[tokio::test]
async fn terminal_jobs_ignore_late_writes() {
    let h = harness(FixtureCloner::new(), "memory", 16).await;

    let job = h
        .service
        .submit("github.com/octocat/Hello-World", None)
        .await
        .unwrap();
    let done = finish(&h, job.id).await;
    assert_eq!(done.status, JobStatus::Completed);

    assert!(h.registry.mark_failed(job.id, "late failure").await.is_err());
    assert!(h
        .registry
        .update_progress(job.id, "Creating embeddings (1 / 2 chunks)")
        .await
        .is_err());

    let after = h.registry.get(job.id).await.unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert_eq!(after.progress_detail, "Analysis complete");
    assert!(h.registry.report(job.id).await.is_ok());
}
