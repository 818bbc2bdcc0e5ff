// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding model loading
//!
//! [`load_model`] resolves the tokenizer and ONNX weights for a model
//! repository (downloading into the cache directory when needed), reads the
//! repository's pooling, truncation and normalization settings, and builds an
//! [`OnnxEmbeddingModel`]. [`SharedModel`] wraps loading in a one-time,
//! process-wide initialization so every job reuses the same handle.

use crate::config::{ModelConfig, DEFAULT_MAX_SEQ_LENGTH};
use crate::embeddings::onnx_model::OnnxOptions;
use crate::embeddings::pipeline::{
    pooling_config_path, ModelPipeline, ModuleList, PipelineFiles, DEFAULT_POOLING_DIR,
    MODULES_FILE, SENTENCE_CONFIG_FILE,
};
use crate::embeddings::{EmbeddingModel, OnnxEmbeddingModel};
use crate::errors::HandlerError;
use anyhow::{Context, Result};
use hf_hub::api::tokio::{ApiBuilder, ApiRepo};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local paths of the files a model needs
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub pipeline: PipelineFiles,
}

/// Resolves model files for `config`.
///
/// A `model_repo` naming an existing local directory is used in place;
/// anything else is treated as a HuggingFace repository id and fetched into
/// `models_cache` (cached files are reused without network access).
pub async fn fetch_model_files(config: &ModelConfig) -> Result<ModelFiles> {
    let local = Path::new(&config.model_repo);
    if local.is_dir() {
        info!("Using local model directory {}", local.display());
        let existing = |relative: &str| Some(local.join(relative)).filter(|p| p.is_file());

        let modules = existing(MODULES_FILE);
        let pooling_dir = pooling_dir(modules.as_deref())?;
        return Ok(ModelFiles {
            model_path: local.join(&config.onnx_file),
            tokenizer_path: local.join(TOKENIZER_FILE),
            pipeline: PipelineFiles {
                pooling_config: existing(&pooling_config_path(&pooling_dir)),
                sentence_config: existing(SENTENCE_CONFIG_FILE),
                modules,
            },
        });
    }

    std::fs::create_dir_all(&config.models_cache).with_context(|| {
        format!(
            "Failed to create models cache {}",
            config.models_cache.display()
        )
    })?;

    let api = ApiBuilder::new()
        .with_cache_dir(config.models_cache.clone())
        .with_token(config.hf_token.clone())
        .with_progress(false)
        .build()
        .context("Failed to initialize HuggingFace Hub client")?;
    let repo = api.model(config.model_repo.clone());

    info!(
        "Fetching {} into {}",
        config.model_repo,
        config.models_cache.display()
    );

    let tokenizer_path = repo
        .get(TOKENIZER_FILE)
        .await
        .with_context(|| format!("Failed to fetch {} from {}", TOKENIZER_FILE, config.model_repo))?;
    let model_path = repo
        .get(&config.onnx_file)
        .await
        .with_context(|| {
            format!(
                "Failed to fetch {} from {}",
                config.onnx_file, config.model_repo
            )
        })?;

    let modules = fetch_optional(&repo, MODULES_FILE).await;
    let pooling_dir = pooling_dir(modules.as_deref())?;
    let pipeline = PipelineFiles {
        pooling_config: fetch_optional(&repo, &pooling_config_path(&pooling_dir)).await,
        sentence_config: fetch_optional(&repo, SENTENCE_CONFIG_FILE).await,
        modules,
    };

    Ok(ModelFiles {
        model_path,
        tokenizer_path,
        pipeline,
    })
}

/// Fetches a file that not every repository ships
async fn fetch_optional(repo: &ApiRepo, file: &str) -> Option<PathBuf> {
    match repo.get(file).await {
        Ok(path) => Some(path),
        Err(e) => {
            debug!("{} not available: {}", file, e);
            None
        }
    }
}

fn pooling_dir(modules: Option<&Path>) -> Result<String> {
    match modules {
        Some(path) => Ok(ModuleList::from_file(path)?.pooling_dir().to_string()),
        None => Ok(DEFAULT_POOLING_DIR.to_string()),
    }
}

/// Loads the embedding model described by `config`
pub async fn load_model(config: &ModelConfig) -> Result<OnnxEmbeddingModel> {
    let started = Instant::now();
    let files = fetch_model_files(config).await?;
    let pipeline = ModelPipeline::from_files(&files.pipeline)?;

    // MAX_SEQ_LENGTH overrides the model's own setting
    let max_seq_length = config
        .max_seq_length
        .or(pipeline.max_seq_length)
        .unwrap_or(DEFAULT_MAX_SEQ_LENGTH);
    debug!("Model pipeline: {:?}", pipeline);

    let options = OnnxOptions {
        max_seq_length,
        batch_size: config.batch_size,
        intra_threads: config.onnx_threads,
        pooling: pipeline.pooling,
        normalize_output: pipeline.normalize,
    };

    let model = OnnxEmbeddingModel::new(
        config.model_repo.clone(),
        files.model_path,
        files.tokenizer_path,
        options,
    )
    .await?;

    info!(
        "✓ Loaded embedding model {} ({} dimensions) in {:?}",
        model.model_name(),
        model.dimension(),
        started.elapsed()
    );

    Ok(model)
}

type LoadFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn EmbeddingModel>>> + Send>>;
type Loader = Arc<dyn Fn() -> LoadFuture + Send + Sync>;

/// Process-wide, lazily loaded model handle
///
/// The first [`get`](Self::get) runs the loader; concurrent callers wait on
/// that single load. A failed load is not cached, so a later call retries.
#[derive(Clone)]
pub struct SharedModel {
    cell: Arc<OnceCell<Arc<dyn EmbeddingModel>>>,
    loader: Loader,
    load_attempts: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SharedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedModel")
            .field("loaded", &self.is_loaded())
            .field("load_attempts", &self.load_attempts())
            .finish_non_exhaustive()
    }
}

impl SharedModel {
    /// Loads the ONNX model for `config` on first use
    pub fn from_config(config: ModelConfig) -> Self {
        let config = Arc::new(config);
        Self::with_loader(move || {
            let config = Arc::clone(&config);
            async move {
                let model = load_model(&config).await?;
                Ok(Arc::new(model) as Arc<dyn EmbeddingModel>)
            }
        })
    }

    /// Uses a custom loader, invoked at most once per successful load
    pub fn with_loader<F, Fut>(loader: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn EmbeddingModel>>> + Send + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader: Arc::new(move || Box::pin(loader()) as LoadFuture),
            load_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wraps an already loaded model
    pub fn preloaded(model: Arc<dyn EmbeddingModel>) -> Self {
        let shared = Self::with_loader(|| async {
            Err::<Arc<dyn EmbeddingModel>, _>(anyhow::anyhow!("preloaded model has no loader"))
        });
        // A fresh cell cannot already be set
        let _ = shared.cell.set(model);
        shared
    }

    /// Returns the model, loading it if this is the first call
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingModel>, HandlerError> {
        self.cell
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::SeqCst);
                (self.loader)().await.map_err(|e| {
                    error!("✗ Failed to load embedding model: {:#}", e);
                    HandlerError::ModelLoad(format!("{:#}", e))
                })
            })
            .await
            .map(Arc::clone)
    }

    /// Whether the model has been loaded
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of times the loader has been invoked
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }
}
