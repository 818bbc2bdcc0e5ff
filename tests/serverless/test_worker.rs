// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Host job-queue worker tests
//!
//! A fake host (axum on an ephemeral port) hands out queued jobs, records the
//! results and heartbeats it receives, and answers 204 when the queue is empty.
//! Tests can force a fixed job-take status or delay the job-take response.

use crate::common::{test_handler, TEST_DIMENSION};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use embedding_worker::serverless::worker::{PollOutcome, Worker};
use embedding_worker::{JobHandler, WorkerConfig};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct FakeHost {
    jobs: Arc<Mutex<VecDeque<Value>>>,
    results: Arc<Mutex<Vec<(String, Value)>>>,
    auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    pings: Arc<AtomicUsize>,
    /// Answer every job request with this status and an empty body
    take_status: Arc<Mutex<Option<StatusCode>>>,
    take_delay: Arc<Mutex<Duration>>,
}

impl FakeHost {
    fn push_job(&self, job: Value) {
        self.jobs.lock().unwrap().push_back(job);
    }

    fn results(&self) -> Vec<(String, Value)> {
        self.results.lock().unwrap().clone()
    }

    fn respond_to_take_with(&self, status: StatusCode) {
        *self.take_status.lock().unwrap() = Some(status);
    }
}

async fn take_job(State(host): State<FakeHost>, headers: HeaderMap) -> Response {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    host.auth_headers.lock().unwrap().push(auth);

    let delay = *host.take_delay.lock().unwrap();
    tokio::time::sleep(delay).await;

    let forced = *host.take_status.lock().unwrap();
    if let Some(status) = forced {
        return status.into_response();
    }

    let next = host.jobs.lock().unwrap().pop_front();
    match next {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn job_done(
    State(host): State<FakeHost>,
    Path(job_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    host.results.lock().unwrap().push((job_id, body));
    StatusCode::OK
}

async fn ping(State(host): State<FakeHost>) -> StatusCode {
    host.pings.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn start_fake_host() -> (FakeHost, SocketAddr) {
    let host = FakeHost::default();
    let app = Router::new()
        .route("/job-take/:worker_id", get(take_job))
        .route("/job-done/:job_id", post(job_done))
        .route("/ping/:worker_id", get(ping))
        .with_state(host.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (host, addr)
}

fn worker_config(addr: SocketAddr) -> WorkerConfig {
    WorkerConfig {
        worker_id: "pod-test".to_string(),
        get_job_url: format!("http://{}/job-take/$ID", addr),
        post_output_url: format!("http://{}/job-done/$ID", addr),
        ping_url: Some(format!("http://{}/ping/$ID", addr)),
        ping_interval: Duration::from_millis(20),
        api_key: Some("test-key".to_string()),
        poll_delay: Duration::from_millis(10),
    }
}

fn test_worker(addr: SocketAddr) -> Worker {
    let (handler, _) = test_handler();
    Worker::new(worker_config(addr), Arc::new(handler) as Arc<dyn JobHandler>).unwrap()
}

#[tokio::test]
async fn test_completed_job_posts_output() {
    let (host, addr) = start_fake_host().await;
    host.push_job(json!({"id": "job-1", "input": {"sentences": ["a", "b"]}}));
    let worker = test_worker(addr);

    let outcome = worker.poll_once().await.unwrap();

    assert_eq!(outcome, PollOutcome::Completed("job-1".to_string()));
    let results = host.results();
    assert_eq!(results.len(), 1);
    let (job_id, body) = &results[0];
    assert_eq!(job_id, "job-1");

    let rows = body["output"].as_array().expect("output should be nested arrays");
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|row| row.as_array().map(Vec::len) == Some(TEST_DIMENSION)));
    assert!(body.get("error").is_none());

    assert_eq!(
        host.auth_headers.lock().unwrap()[0].as_deref(),
        Some("test-key")
    );
}

#[tokio::test]
async fn test_failed_job_posts_error() {
    let (host, addr) = start_fake_host().await;
    host.push_job(json!({"id": "job-2", "input": {"normalize_embeddings": true}}));
    let worker = test_worker(addr);

    let outcome = worker.poll_once().await.unwrap();

    assert_eq!(outcome, PollOutcome::Failed("job-2".to_string()));
    let results = host.results();
    let (job_id, body) = &results[0];
    assert_eq!(job_id, "job-2");
    assert!(body.get("output").is_none());

    let report: Value = serde_json::from_str(body["error"].as_str().unwrap()).unwrap();
    assert_eq!(report["error_type"], "missing_field");
    assert_eq!(report["worker_id"], "pod-test");
}

#[tokio::test]
async fn test_empty_queue_posts_nothing() {
    let (host, addr) = start_fake_host().await;
    let worker = test_worker(addr);

    let outcome = worker.poll_once().await.unwrap();

    assert_eq!(outcome, PollOutcome::NoJob);
    assert!(host.results().is_empty());
}

async fn assert_no_job_for(status: StatusCode) {
    let (host, addr) = start_fake_host().await;
    host.push_job(json!({"id": "job-x", "input": {"sentences": ["a"]}}));
    host.respond_to_take_with(status);
    let worker = test_worker(addr);

    let outcome = worker.poll_once().await.unwrap();

    assert_eq!(outcome, PollOutcome::NoJob, "status {}", status);
    assert!(host.results().is_empty());
}

#[tokio::test]
async fn test_bad_request_means_no_job() {
    assert_no_job_for(StatusCode::BAD_REQUEST).await;
}

#[tokio::test]
async fn test_rate_limited_means_no_job() {
    assert_no_job_for(StatusCode::TOO_MANY_REQUESTS).await;
}

#[tokio::test]
async fn test_empty_ok_body_means_no_job() {
    assert_no_job_for(StatusCode::OK).await;
}

#[tokio::test]
async fn test_host_error_is_reported() {
    let (_host, addr) = start_fake_host().await;
    let mut config = worker_config(addr);
    config.get_job_url = format!("http://{}/no-such-route/$ID", addr);
    let (handler, _) = test_handler();
    let worker = Worker::new(config, Arc::new(handler) as Arc<dyn JobHandler>).unwrap();

    let err = worker.poll_once().await.unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_run_processes_queue_until_shutdown() {
    let (host, addr) = start_fake_host().await;
    host.push_job(json!({"id": "job-a", "input": {"sentences": ["one"]}}));
    host.push_job(json!({"id": "job-b", "input": {"sentences": ["two"], "normalize_embeddings": true}}));
    let worker = test_worker(addr);

    worker
        .run(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    let ids: Vec<String> = host.results().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["job-a".to_string(), "job-b".to_string()]);
    assert!(host.pings.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_pending_job_request() {
    let (host, addr) = start_fake_host().await;
    host.push_job(json!({"id": "job-late", "input": {"sentences": ["late"]}}));
    *host.take_delay.lock().unwrap() = Duration::from_millis(200);
    let worker = test_worker(addr);

    // Shutdown fires while the first job request is still outstanding
    worker
        .run(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();

    let ids: Vec<String> = host.results().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["job-late".to_string()]);
}
