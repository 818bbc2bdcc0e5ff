// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Host job-queue worker
//!
//! Polls the host for jobs, runs each through the handler and posts the result:
//! - `GET  get_job_url`   → `204`/`400`/`429`/empty body: no job; `200`: `{"id", "input"}`
//! - `POST post_output_url` ← `{"output": ...}` or `{"error": "<json report>"}`
//! - `GET  ping_url`      ← heartbeat every `ping_interval`
//!
//! Jobs run one at a time. Failed jobs are reported, never retried here.
//! Shutdown is only honoured between polls: a job request already sent is
//! awaited, and a job it returns is processed and reported first.

use super::{Job, JobHandler};
use crate::config::WorkerConfig;
use anyhow::{Context, Result};
use reqwest::{header, Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What a single poll did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NoJob,
    Completed(String),
    Failed(String),
}

pub struct Worker {
    config: WorkerConfig,
    client: Client,
    handler: Arc<dyn JobHandler>,
    /// Job currently being processed, reported by the heartbeat
    current_job: Arc<RwLock<Option<String>>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &config.api_key {
            let mut value =
                header::HeaderValue::from_str(key).context("RUNPOD_AI_API_KEY is not a valid header")?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            client,
            handler,
            current_job: Arc::new(RwLock::new(None)),
        })
    }

    /// Polls until `shutdown` resolves. An in-flight job request is awaited and
    /// any job it returns is finished and reported before returning.
    pub async fn run<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            "Worker {} started, polling {}",
            self.config.worker_id,
            self.config.job_take_url(false)
        );
        let heartbeat = self.spawn_heartbeat();
        tokio::pin!(shutdown);

        let mut stopping = false;
        while !stopping {
            let fetch = self.fetch_job();
            tokio::pin!(fetch);
            let fetched = tokio::select! {
                fetched = &mut fetch => fetched,
                _ = &mut shutdown => {
                    stopping = true;
                    info!("Shutdown requested, waiting for the pending job request");
                    fetch.await
                }
            };

            let idle = match fetched {
                Ok(Some(job)) => {
                    self.process(job).await;
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Failed to fetch job: {:#}", e);
                    true
                }
            };

            if idle && !stopping {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_delay) => {}
                    _ = &mut shutdown => stopping = true,
                }
            }
        }

        if let Some(task) = heartbeat {
            task.abort();
        }
        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    /// Fetches and processes at most one job
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        match self.fetch_job().await? {
            Some(job) => Ok(self.process(job).await),
            None => Ok(PollOutcome::NoJob),
        }
    }

    /// Asks the host for the next job
    pub async fn fetch_job(&self) -> Result<Option<Job>> {
        let in_progress = self.current_job.read().await.is_some();
        let url = self.config.job_take_url(in_progress);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Job fetch request failed")?;

        match response.status() {
            StatusCode::NO_CONTENT => return Ok(None),
            StatusCode::BAD_REQUEST => {
                debug!("Host rejected job request, a job may already be in progress");
                return Ok(None);
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("Host is rate limiting job requests");
                return Ok(None);
            }
            status if !status.is_success() => {
                anyhow::bail!("Job fetch returned HTTP {}", status);
            }
            _ => {}
        }

        let body = response.text().await.context("Failed to read job body")?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let job: Job = serde_json::from_str(&body).context("Job body is not a valid job")?;
        Ok(Some(job))
    }

    /// Runs `job` and reports its result to the host
    pub async fn process(&self, job: Job) -> PollOutcome {
        let job_id = job.id.clone();
        *self.current_job.write().await = Some(job_id.clone());
        let started = Instant::now();
        info!("Started job {}", job_id);

        let (body, outcome) = match self.handler.handle(job.input).await {
            Ok(output) => {
                info!("Finished job {} in {:?}", job_id, started.elapsed());
                (
                    json!({ "output": output }),
                    PollOutcome::Completed(job_id.clone()),
                )
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                let report = e.to_report(Some(&self.config.worker_id));
                let report = serde_json::to_string(&report).unwrap_or_else(|_| e.to_string());
                (json!({ "error": report }), PollOutcome::Failed(job_id.clone()))
            }
        };

        if let Err(e) = self.post_result(&job_id, &body).await {
            error!("Failed to report result of job {}: {:#}", job_id, e);
        }

        *self.current_job.write().await = None;
        outcome
    }

    async fn post_result(&self, job_id: &str, body: &Value) -> Result<()> {
        let url = self.config.job_done_url(job_id);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .context("Result request failed")?;

        if !response.status().is_success() {
            anyhow::bail!("Result post returned HTTP {}", response.status());
        }
        debug!("Reported result of job {}", job_id);
        Ok(())
    }

    fn spawn_heartbeat(&self) -> Option<JoinHandle<()>> {
        self.config.ping_url.as_ref()?;

        let config = self.config.clone();
        let client = self.client.clone();
        let current_job = Arc::clone(&self.current_job);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.ping_interval);
            loop {
                ticker.tick().await;
                let job_id = current_job.read().await.clone();
                let Some(request) = heartbeat_request(&client, &config, job_id.as_deref())
                else {
                    return;
                };
                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Heartbeat sent");
                    }
                    Ok(response) => warn!("Heartbeat returned HTTP {}", response.status()),
                    Err(e) => warn!("Heartbeat failed: {}", e),
                }
            }
        }))
    }
}

/// Heartbeat request, tagged with the job in progress if there is one
fn heartbeat_request(
    client: &Client,
    config: &WorkerConfig,
    job_id: Option<&str>,
) -> Option<RequestBuilder> {
    let request = client.get(config.heartbeat_url()?);
    Some(match job_id {
        Some(id) => request.query(&[("job_id", id)]),
        None => request,
    })
}
