// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Local HTTP API for exercising the handler without the host
//!
//! - `POST /runsync`: body `{"input": {...}}`, runs the job synchronously
//! - `GET /health`

use super::{run_job, Job, JobHandler, JobOutcome};
use anyhow::Result;
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Body of `POST /runsync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

pub fn router(handler: Arc<dyn JobHandler>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/runsync", post(runsync_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Serves the API on `addr` until `shutdown` resolves
pub async fn serve<S>(handler: Arc<dyn JobHandler>, addr: SocketAddr, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Local API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(handler))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn runsync_handler(
    State(handler): State<Arc<dyn JobHandler>>,
    Json(request): Json<RunRequest>,
) -> Json<JobOutcome> {
    let job = match request.id {
        Some(id) => Job {
            id,
            input: request.input,
        },
        None => Job::local(request.input),
    };

    Json(run_job(handler.as_ref(), job, None).await)
}
