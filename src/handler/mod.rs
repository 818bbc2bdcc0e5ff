// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding job handler
//!
//! Turns a job's `input` mapping into an embedding matrix:
//! parse and validate, fetch the shared model, encode, return nested arrays.

pub mod request;
pub mod response;

pub use request::EmbedInput;
pub use response::EmbeddingMatrix;

use crate::embeddings::SharedModel;
use crate::errors::HandlerError;
use crate::serverless::JobHandler;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

/// Handler registered with the serverless harness
#[derive(Debug, Clone)]
pub struct EmbeddingJobHandler {
    model: SharedModel,
}

impl EmbeddingJobHandler {
    pub fn new(model: SharedModel) -> Self {
        Self { model }
    }

    /// The model handle this handler embeds with
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Embeds a validated input
    ///
    /// # Errors
    /// - [`HandlerError::ModelLoad`] if the model cannot be loaded
    /// - [`HandlerError::Inference`] if encoding fails or the model returns a
    ///   matrix whose shape does not match the input
    pub async fn embed(&self, input: EmbedInput) -> Result<EmbeddingMatrix, HandlerError> {
        if input.sentences.is_empty() {
            debug!("Empty sentence list, returning empty matrix");
            return Ok(EmbeddingMatrix::default());
        }

        let model = self.model.get().await?;
        let started = Instant::now();

        let rows = model
            .encode(&input.sentences, input.normalize_embeddings)
            .await
            .map_err(|e| HandlerError::Inference(format!("{:#}", e)))?;

        if rows.len() != input.sentences.len() {
            return Err(HandlerError::Inference(format!(
                "model returned {} embeddings for {} sentences",
                rows.len(),
                input.sentences.len()
            )));
        }
        let dimension = model.dimension();
        if let Some(index) = rows.iter().position(|row| row.len() != dimension) {
            return Err(HandlerError::Inference(format!(
                "embedding {} has {} dimensions (expected {})",
                index,
                rows[index].len(),
                dimension
            )));
        }

        info!(
            "Embedded {} sentences ({} dims, normalize: {}) in {:?}",
            rows.len(),
            dimension,
            input.normalize_embeddings,
            started.elapsed()
        );

        Ok(EmbeddingMatrix::from(rows))
    }

    /// Parses a raw job `input` and embeds it.
    ///
    /// Input errors are reported before the model is touched.
    pub async fn handle_input(&self, input: &Value) -> Result<EmbeddingMatrix, HandlerError> {
        let input = EmbedInput::from_job_input(input)?;
        self.embed(input).await
    }
}

#[async_trait]
impl JobHandler for EmbeddingJobHandler {
    async fn handle(&self, input: Value) -> Result<Value, HandlerError> {
        let matrix = self.handle_input(&input).await?;
        matrix
            .to_json_value()
            .map_err(|e| HandlerError::Inference(format!("failed to encode embeddings: {}", e)))
    }
}
