// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Serverless harness
//!
//! Invokes a registered [`JobHandler`] once per job. Three ways to feed it:
//! - [`worker`]: poll the host's job queue and post results back (production)
//! - [`local`]: run one job from `--test-input` or `test_input.json`
//! - [`api`]: serve a local HTTP API for manual testing

pub mod api;
pub mod local;
pub mod worker;

use crate::config::{Cli, WorkerConfig};
use crate::errors::{ErrorReport, HandlerError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Callback the harness invokes for each job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Processes a job's `input` and returns its `output`
    async fn handle(&self, input: Value) -> Result<Value, HandlerError>;
}

/// A unit of work handed out by the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub input: Value,
}

impl Job {
    /// Creates a job with a locally generated id
    pub fn local(input: Value) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            input,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

/// Result of running one job, as reported by the local modes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl JobOutcome {
    pub fn completed(id: String, output: Value) -> Self {
        Self {
            id,
            status: JobStatus::Completed,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(id: String, report: &ErrorReport) -> Self {
        Self {
            id,
            status: JobStatus::Failed,
            output: None,
            error: serde_json::to_value(report).ok(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Runs `job` through `handler`, logging and capturing failure
pub async fn run_job(handler: &dyn JobHandler, job: Job, worker_id: Option<&str>) -> JobOutcome {
    info!("Started job {}", job.id);
    match handler.handle(job.input).await {
        Ok(output) => {
            info!("Finished job {}", job.id);
            JobOutcome::completed(job.id, output)
        }
        Err(e) => {
            error!("Job {} failed: {}", job.id, e);
            JobOutcome::failed(job.id, &e.to_report(worker_id))
        }
    }
}

/// How the process feeds jobs to the handler
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Worker(WorkerConfig),
    TestInput(Job),
    Api(SocketAddr),
}

impl Mode {
    /// Picks the mode from CLI flags, falling back to `test_input.json` in
    /// `cwd` and finally to polling the host.
    pub fn from_cli(cli: &Cli, cwd: &Path) -> Result<Self> {
        if cli.serve_api {
            let addr: SocketAddr = format!("{}:{}", cli.api_host, cli.api_port)
                .parse()
                .with_context(|| {
                    format!("Invalid API address {}:{}", cli.api_host, cli.api_port)
                })?;
            return Ok(Mode::Api(addr));
        }

        if let Some(job) = local::resolve_test_input(cli.test_input.as_deref(), cwd)? {
            return Ok(Mode::TestInput(job));
        }

        let config = WorkerConfig::try_from(cli.harness.clone())?;
        Ok(Mode::Worker(config))
    }
}

/// Starts the harness with `handler` in the given mode.
///
/// Returns whether every job handled in this run succeeded (always `true` for
/// the long-running modes once they stop).
pub async fn start(handler: Arc<dyn JobHandler>, mode: Mode) -> Result<bool> {
    match mode {
        Mode::Worker(config) => {
            let worker = worker::Worker::new(config, handler)?;
            worker.run(shutdown_signal()).await?;
            Ok(true)
        }
        Mode::TestInput(job) => {
            let outcome = local::run_test_input(handler.as_ref(), job).await?;
            Ok(outcome.is_success())
        }
        Mode::Api(addr) => {
            api::serve(handler, addr, shutdown_signal()).await?;
            Ok(true)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
