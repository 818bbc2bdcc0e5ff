// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Process configuration
//!
//! Every option is a CLI flag backed by an environment variable, so the worker
//! runs unchanged inside the serverless host (env only) and locally (flags or
//! a `.env` file).

use crate::errors::ConfigError;
use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL_REPO: &str = "sentence-transformers/all-mpnet-base-v2";
pub const DEFAULT_MODELS_CACHE: &str = "/runpod-volume/sentence-transformers-cache/models";
pub const DEFAULT_ONNX_FILE: &str = "onnx/model.onnx";
/// Truncation length when neither MAX_SEQ_LENGTH nor the model sets one
pub const DEFAULT_MAX_SEQ_LENGTH: usize = 384;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_ONNX_THREADS: usize = 4;

/// Sentence embedding worker for serverless GPU hosts
#[derive(Parser, Debug, Clone)]
#[command(name = "embedding-worker")]
#[command(version)]
#[command(about = "Serves sentence embeddings as serverless jobs", long_about = None)]
pub struct Cli {
    /// Log verbosity (TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL)
    #[arg(long, env = "LOG_LEVEL", default_value = "INFO")]
    pub log_level: String,

    /// Run a single job from this JSON instead of polling the host
    #[arg(long, conflicts_with = "serve_api")]
    pub test_input: Option<String>,

    /// Serve a local HTTP API instead of polling the host
    #[arg(long)]
    pub serve_api: bool,

    /// Bind address for the local API
    #[arg(long, default_value = "127.0.0.1")]
    pub api_host: String,

    /// Port for the local API
    #[arg(long, default_value_t = 8000)]
    pub api_port: u16,

    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub harness: HarnessArgs,
}

/// Embedding model options
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// HuggingFace repository of the sentence transformer
    #[arg(long, env = "MODEL_REPO", default_value = DEFAULT_MODEL_REPO)]
    pub model_repo: String,

    /// Directory where model weights are cached
    #[arg(long, env = "MODELS_CACHE", default_value = DEFAULT_MODELS_CACHE)]
    pub models_cache: PathBuf,

    /// ONNX weights path inside the repository
    #[arg(long, env = "MODEL_ONNX_FILE", default_value = DEFAULT_ONNX_FILE)]
    pub onnx_file: String,

    /// Token truncation length (defaults to the model's sentence_bert_config.json)
    #[arg(long, env = "MAX_SEQ_LENGTH")]
    pub max_seq_length: Option<usize>,

    /// Sentences per inference batch
    #[arg(long, env = "EMBED_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// ONNX Runtime intra-op threads
    #[arg(long, env = "ONNX_THREADS", default_value_t = DEFAULT_ONNX_THREADS)]
    pub onnx_threads: usize,

    /// Access token for gated or private repositories
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

/// Serverless host endpoints, injected by the host into the worker environment
#[derive(Args, Debug, Clone, Default)]
pub struct HarnessArgs {
    /// Job fetch URL (`$ID` is replaced with the worker id)
    #[arg(long, env = "RUNPOD_WEBHOOK_GET_JOB")]
    pub get_job_url: Option<String>,

    /// Result URL (`$ID` is replaced with the job id, `$RUNPOD_POD_ID` with the worker id)
    #[arg(long, env = "RUNPOD_WEBHOOK_POST_OUTPUT")]
    pub post_output_url: Option<String>,

    /// Heartbeat URL (`$ID` or `$RUNPOD_POD_ID` is replaced with the worker id)
    #[arg(long, env = "RUNPOD_WEBHOOK_PING")]
    pub ping_url: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, env = "RUNPOD_PING_INTERVAL", default_value_t = 10_000)]
    pub ping_interval_ms: u64,

    /// Worker id assigned by the host
    #[arg(long, env = "RUNPOD_POD_ID")]
    pub worker_id: Option<String>,

    /// API key sent as the Authorization header
    #[arg(long, env = "RUNPOD_AI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

/// Resolved model settings used by the loader
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model_repo: String,
    pub models_cache: PathBuf,
    pub onnx_file: String,
    /// Explicit override of the model's truncation length
    pub max_seq_length: Option<usize>,
    pub batch_size: usize,
    pub onnx_threads: usize,
    pub hf_token: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_repo: DEFAULT_MODEL_REPO.to_string(),
            models_cache: PathBuf::from(DEFAULT_MODELS_CACHE),
            onnx_file: DEFAULT_ONNX_FILE.to_string(),
            max_seq_length: None,
            batch_size: DEFAULT_BATCH_SIZE,
            onnx_threads: DEFAULT_ONNX_THREADS,
            hf_token: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_seq_length == Some(0) {
            return Err(ConfigError::ZeroValue {
                field: "MAX_SEQ_LENGTH",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroValue {
                field: "EMBED_BATCH_SIZE",
            });
        }
        if self.onnx_threads == 0 {
            return Err(ConfigError::ZeroValue {
                field: "ONNX_THREADS",
            });
        }
        Ok(())
    }
}

impl TryFrom<ModelArgs> for ModelConfig {
    type Error = ConfigError;

    fn try_from(args: ModelArgs) -> Result<Self, Self::Error> {
        let config = Self {
            model_repo: args.model_repo,
            models_cache: args.models_cache,
            onnx_file: args.onnx_file,
            max_seq_length: args.max_seq_length,
            batch_size: args.batch_size,
            onnx_threads: args.onnx_threads,
            hf_token: args.hf_token.filter(|t| !t.trim().is_empty()),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Resolved host endpoints for worker mode
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub get_job_url: String,
    pub post_output_url: String,
    pub ping_url: Option<String>,
    pub ping_interval: Duration,
    pub api_key: Option<String>,
    /// Pause after an empty or failed poll
    pub poll_delay: Duration,
}

impl WorkerConfig {
    /// URL for fetching the next job
    pub fn job_take_url(&self, job_in_progress: bool) -> String {
        let url = self.get_job_url.replace("$ID", &self.worker_id);
        let separator = if url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}job_in_progress={}",
            url,
            separator,
            u8::from(job_in_progress)
        )
    }

    /// URL for posting the result of `job_id`
    pub fn job_done_url(&self, job_id: &str) -> String {
        let url = self
            .post_output_url
            .replace("$RUNPOD_POD_ID", &self.worker_id)
            .replace("$ID", job_id);
        let separator = if url.contains('?') { '&' } else { '?' };
        format!("{}{}isStream=false", url, separator)
    }

    /// URL for the heartbeat, if the host configured one
    pub fn heartbeat_url(&self) -> Option<String> {
        let url = self
            .ping_url
            .as_ref()?
            .replace("$RUNPOD_POD_ID", &self.worker_id)
            .replace("$ID", &self.worker_id);
        Some(url)
    }
}

impl TryFrom<HarnessArgs> for WorkerConfig {
    type Error = ConfigError;

    fn try_from(args: HarnessArgs) -> Result<Self, Self::Error> {
        let get_job_url = args
            .get_job_url
            .ok_or(ConfigError::MissingSetting("RUNPOD_WEBHOOK_GET_JOB"))?;
        let post_output_url = args
            .post_output_url
            .ok_or(ConfigError::MissingSetting("RUNPOD_WEBHOOK_POST_OUTPUT"))?;
        if args.ping_interval_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "RUNPOD_PING_INTERVAL",
            });
        }

        Ok(Self {
            worker_id: args.worker_id.unwrap_or_else(|| "local".to_string()),
            get_job_url,
            post_output_url,
            ping_url: args.ping_url,
            ping_interval: Duration::from_millis(args.ping_interval_ms),
            api_key: args.api_key,
            poll_delay: Duration::from_secs(1),
        })
    }
}
