// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod serverless;

pub use config::{Cli, ModelConfig, WorkerConfig};
pub use embeddings::{load_model, EmbeddingModel, OnnxEmbeddingModel, SharedModel};
pub use errors::{ConfigError, ErrorReport, HandlerError};
pub use handler::{EmbedInput, EmbeddingJobHandler, EmbeddingMatrix};
pub use serverless::{Job, JobHandler, JobOutcome, JobStatus, Mode};
