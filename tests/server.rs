//! HTTP API tests.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`. The
//! backing pipeline's cloner always fails, so queued jobs end in `failed`
//! quickly; report states are set up through the registry directly.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use repo_health::config::{ChunkingConfig, IngestConfig};
use repo_health::embedding::HashEmbedder;
use repo_health::errors::{IngestError, LlmError};
use repo_health::generator::{ReportGenerator, RetryPolicy};
use repo_health::index::EmbeddingIndex;
use repo_health::ingest::{CloneProvider, Ingestor};
use repo_health::jobs::JobRegistry;
use repo_health::llm::{CredentialPool, LlmProvider};
use repo_health::orchestrator::{AnalysisService, Pipeline};
use repo_health::server::router;
use repo_health_core::report::Report;
use repo_health_core::store::memory::InMemoryStore;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tower::ServiceExt;

struct OfflineCloner;

#[async_trait]
impl CloneProvider for OfflineCloner {
    async fn clone_repo(
        &self,
        url: &str,
        _branch: Option<&str>,
        _dest: &Path,
    ) -> Result<(), IngestError> {
        Err(IngestError::Network {
            url: url.to_string(),
            message: "network is disabled in tests".to_string(),
        })
    }
}

struct SilentLlm;

#[async_trait]
impl LlmProvider for SilentLlm {
    fn name(&self) -> &str {
        "silent"
    }

    async fn complete(&self, _: &str, _: &str, _: &str) -> Result<String, LlmError> {
        Err(LlmError::Fatal("not expected in these tests".into()))
    }
}

struct TestApp {
    app: Router,
    registry: JobRegistry,
    dispatcher: JoinHandle<()>,
    _tmp: TempDir,
}

fn test_app(queue_capacity: usize) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let registry = JobRegistry::in_memory();
    let ingestor = Ingestor::new(
        Arc::new(OfflineCloner),
        IngestConfig::default(),
        tmp.path().join("workspaces"),
        10,
    )
    .unwrap();
    let index = EmbeddingIndex::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder::new(32)),
        8,
    );
    let generator = ReportGenerator::new(
        Arc::new(SilentLlm),
        Arc::new(CredentialPool::new(vec!["k".to_string()])),
        RetryPolicy {
            max_transient_attempts: 1,
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
        ChunkingConfig::default(),
        25,
    ));
    let (service, dispatcher) =
        AnalysisService::start(pipeline, registry.clone(), 1, queue_capacity);

    TestApp {
        app: router(service),
        registry,
        dispatcher,
        _tmp: tmp,
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn report() -> Report {
    Report {
        overall_score: 64.5,
        summary: "Readable code, few tests.".to_string(),
        vulnerabilities: Vec::new(),
        tech_debt_items: Vec::new(),
        modernization_suggestions: Vec::new(),
        recommendations: vec!["Add a CI pipeline".to_string()],
        languages_detected: BTreeMap::new(),
        dependencies_found: BTreeMap::new(),
        total_files_analyzed: 3,
        analysis_timestamp: None,
    }
}

// ─── POST /api/analyze ──────────────────────────────────────────────

#[tokio::test]
async fn analyze_returns_202_with_a_pending_snapshot() {
    let t = test_app(16);

    let (status, body) = send(
        &t.app,
        post_json(
            "/api/analyze",
            json!({ "repo_url": "github.com/octocat/Hello-World", "branch": "main" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["repo_url"], "https://github.com/octocat/Hello-World");
    assert_eq!(body["branch"], "main");
    assert!(body["job_id"].as_str().is_some());
}

#[tokio::test]
async fn analyze_rejects_malformed_input() {
    let t = test_app(16);

    let (status, body) = send(
        &t.app,
        post_json("/api/analyze", json!({ "repo_url": "/home/me/project" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = send(&t.app, post_json("/api/analyze", json!({ "repo_url": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "repo_url must not be empty");

    let (status, body) = send(&t.app, post_json("/api/analyze", json!({ "url": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    assert!(t.registry.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn analyze_is_unavailable_once_the_dispatcher_stops() {
    let t = test_app(16);
    let dispatcher = t.dispatcher;
    dispatcher.abort();
    let _ = dispatcher.await;

    let (status, body) = send(
        &t.app,
        post_json("/api/analyze", json!({ "repo_url": "github.com/octocat/Hello-World" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "unavailable");
}

// ─── GET /api/status/{job_id} ───────────────────────────────────────

#[tokio::test]
async fn status_tracks_a_job_to_failure() {
    let t = test_app(16);

    let (_, created) = send(
        &t.app,
        post_json("/api/analyze", json!({ "repo_url": "github.com/octocat/Hello-World" })),
    )
    .await;
    let id = created["job_id"].as_str().unwrap().to_string();

    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, body) = send(&t.app, get(&format!("/api/status/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        last = body;
        if last["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], "failed");
    assert!(last["error_message"]
        .as_str()
        .unwrap()
        .starts_with("Repository ingestion failed: network error"));

    let (status, body) = send(&t.app, get(&format!("/api/report/{}", id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "job_failed");
}

#[tokio::test]
async fn unknown_and_unparseable_ids_are_not_found() {
    let t = test_app(16);

    let (status, body) = send(
        &t.app,
        get("/api/status/00000000-0000-4000-8000-000000000000"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(&t.app, get("/api/status/not-a-job")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&t.app, get("/api/report/not-a-job")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─── GET /api/report/{job_id} ───────────────────────────────────────

#[tokio::test]
async fn report_is_409_until_completed_then_200() {
    let t = test_app(16);
    let job = t
        .registry
        .create("https://github.com/octocat/Hello-World", None)
        .await
        .unwrap();
    let uri = format!("/api/report/{}", job.id);

    let (status, body) = send(&t.app, get(&uri)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "not_ready");

    t.registry
        .mark_processing(job.id, "Creating embeddings (4 / 10 chunks)")
        .await
        .unwrap();
    let (status, body) = send(&t.app, get(&uri)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "not_ready");

    t.registry.mark_completed(job.id, report()).await.unwrap();
    let (status, body) = send(&t.app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_score"], 64.5);
    assert_eq!(body["summary"], "Readable code, few tests.");
    assert_eq!(body["recommendations"][0], "Add a CI pipeline");

    let (status, body) = send(&t.app, get(&format!("/api/status/{}", job.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress_detail"], "Analysis complete");
}

// ─── GET /api/jobs, /health ─────────────────────────────────────────

#[tokio::test]
async fn jobs_lists_newest_first_with_limit() {
    let t = test_app(16);
    let first = t
        .registry
        .create("https://github.com/octocat/one", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = t
        .registry
        .create("https://github.com/octocat/two", None)
        .await
        .unwrap();

    let (status, body) = send(&t.app, get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["job_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![second.id.to_string(), first.id.to_string()]);

    let (_, body) = send(&t.app, get("/api/jobs?limit=1")).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn health_reports_version() {
    let t = test_app(16);
    let (status, body) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
