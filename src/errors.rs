// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Error types surfaced at the job boundary.
//!
//! Internals (tokenizer, ONNX Runtime, weight download) use `anyhow` with
//! context; everything that reaches the serverless harness is converted into a
//! [`HandlerError`] so the host receives a stable `error_type` string.

use serde::Serialize;
use thiserror::Error;

/// Failure of a single embedding job
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    /// A required key is absent from the job input
    #[error("missing required input field '{0}'")]
    MissingField(String),

    /// The job input has the wrong shape or types
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    /// The model could not be fetched or loaded
    #[error("failed to load embedding model: {0}")]
    ModelLoad(String),

    /// Tokenization or ONNX inference failed
    #[error("embedding inference failed: {0}")]
    Inference(String),
}

impl HandlerError {
    /// Stable machine-readable error kind
    pub fn error_type(&self) -> &'static str {
        match self {
            HandlerError::MissingField(_) => "missing_field",
            HandlerError::InvalidInput(_) => "invalid_input",
            HandlerError::ModelLoad(_) => "model_load_failed",
            HandlerError::Inference(_) => "inference_failed",
        }
    }

    /// Builds the error report sent back to the host for a failed job
    pub fn to_report(&self, worker_id: Option<&str>) -> ErrorReport {
        ErrorReport {
            error_type: self.error_type().to_string(),
            error_message: self.to_string(),
            worker_id: worker_id.map(str::to_string),
        }
    }
}

/// Error payload delivered to the host for a failed job
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorReport {
    pub error_type: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

/// Invalid process configuration
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid LOG_LEVEL '{0}' (expected TRACE, DEBUG, INFO, WARN, ERROR or CRITICAL)")]
    InvalidLogLevel(String),

    #[error("missing harness setting {0}")]
    MissingSetting(&'static str),

    #[error("{field} must be greater than 0")]
    ZeroValue { field: &'static str },
}
