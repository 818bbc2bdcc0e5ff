// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! One-shot local run from `--test-input` or `test_input.json`

use super::{run_job, Job, JobHandler, JobOutcome};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::info;

pub const TEST_INPUT_FILE: &str = "test_input.json";

/// Parses a test job: `{"id": "optional", "input": {...}}`
pub fn parse_test_input(text: &str) -> Result<Job> {
    let value: Value = serde_json::from_str(text).context("Test input is not valid JSON")?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("Test input must be a JSON object"))?;
    let input = object
        .get("input")
        .cloned()
        .ok_or_else(|| anyhow!("Test input must contain an \"input\" key"))?;

    Ok(match object.get("id").and_then(Value::as_str) {
        Some(id) => Job {
            id: id.to_string(),
            input,
        },
        None => Job::local(input),
    })
}

/// The explicit `--test-input` wins; otherwise `test_input.json` in `cwd` is
/// used when present.
pub fn resolve_test_input(arg: Option<&str>, cwd: &Path) -> Result<Option<Job>> {
    if let Some(text) = arg {
        return parse_test_input(text).map(Some);
    }

    let path = cwd.join(TEST_INPUT_FILE);
    if !path.is_file() {
        return Ok(None);
    }

    info!("Using test input from {}", path.display());
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_test_input(&text)
        .with_context(|| format!("Invalid test input in {}", path.display()))
        .map(Some)
}

/// Runs `job` once and prints the outcome to stdout
pub async fn run_test_input(handler: &dyn JobHandler, job: Job) -> Result<JobOutcome> {
    let outcome = run_job(handler, job, None).await;
    let rendered = serde_json::to_string_pretty(&outcome).context("Failed to render outcome")?;
    println!("{}", rendered);
    Ok(outcome)
}
