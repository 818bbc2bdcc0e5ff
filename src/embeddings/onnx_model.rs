// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX Embedding Model Wrapper
//!
//! Runs a sentence-transformer encoder exported to ONNX (all-mpnet-base-v2 by
//! default) through ONNX Runtime.
//!
//! Features:
//! - GPU acceleration via CUDA (with automatic CPU fallback)
//! - HuggingFace tokenization with truncation to the model's max sequence length
//! - Fixed-size batches padded to the longest sequence in each batch
//! - Pooling chosen by the repository's Pooling module (mean by default)
//! - L2 normalization on request or when the pipeline ends in Normalize
//! - Output dimension discovered from the model at load time

use crate::embeddings::pipeline::Pooling;
use crate::embeddings::{l2_normalize, EmbeddingModel};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ndarray::{Array2, Axis, Ix2, Ix3};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info, warn};

/// Runtime knobs for [`OnnxEmbeddingModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnnxOptions {
    /// Token truncation length
    pub max_seq_length: usize,
    /// Sentences per inference call
    pub batch_size: usize,
    /// ONNX Runtime intra-op threads
    pub intra_threads: usize,
    /// Pooling applied to token-level outputs
    pub pooling: Pooling,
    /// Always L2-normalize, regardless of the per-call flag
    pub normalize_output: bool,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self {
            max_seq_length: crate::config::DEFAULT_MAX_SEQ_LENGTH,
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            intra_threads: crate::config::DEFAULT_ONNX_THREADS,
            pooling: Pooling::default(),
            normalize_output: false,
        }
    }
}

/// ONNX-based sentence embedding model
///
/// # Thread Safety
/// The session sits behind a mutex; concurrent callers serialize on inference.
/// Cloning is cheap and shares the same session.
#[derive(Clone)]
pub struct OnnxEmbeddingModel {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    model_name: String,
    dimension: usize,
    options: OnnxOptions,
    /// BERT-style graphs take `token_type_ids`; MPNet graphs do not
    uses_token_type_ids: bool,
    pad_token_id: i64,
}

impl std::fmt::Debug for OnnxEmbeddingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingModel")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("options", &self.options)
            .field("uses_token_type_ids", &self.uses_token_type_ids)
            .finish_non_exhaustive()
    }
}

/// Padded token tensors for one batch
struct BatchInputs {
    input_ids: Array2<i64>,
    attention_mask: Array2<i64>,
}

impl OnnxEmbeddingModel {
    /// Creates a model from an ONNX file and a `tokenizer.json`
    ///
    /// # Errors
    /// Returns error if:
    /// - Model or tokenizer file is missing or invalid
    /// - ONNX Runtime initialization fails
    /// - The validation inference yields an unexpected output shape
    ///
    /// # Example
    /// ```ignore
    /// let model = OnnxEmbeddingModel::new(
    ///     "sentence-transformers/all-mpnet-base-v2",
    ///     "/models/all-mpnet-base-v2/onnx/model.onnx",
    ///     "/models/all-mpnet-base-v2/tokenizer.json",
    ///     OnnxOptions::default(),
    /// ).await?;
    /// assert_eq!(model.dimension(), 768);
    /// ```
    pub async fn new<P: AsRef<Path>>(
        model_name: impl Into<String>,
        model_path: P,
        tokenizer_path: P,
        options: OnnxOptions,
    ) -> Result<Self> {
        let model_name = model_name.into();
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("ONNX model file not found: {}", model_path.display());
        }
        if !tokenizer_path.exists() {
            anyhow::bail!("Tokenizer file not found: {}", tokenizer_path.display());
        }
        if options.batch_size == 0 || options.max_seq_length == 0 {
            anyhow::bail!("batch_size and max_seq_length must be greater than 0");
        }
        options.pooling.validate()?;

        let session = build_session(model_path, options.intra_threads)?;

        let uses_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: options.max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;

        let pad_token_id = ["<pad>", "[PAD]"]
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
            .map(i64::from)
            .unwrap_or(0);

        let mut model = Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            model_name,
            dimension: 0,
            options,
            uses_token_type_ids,
            pad_token_id,
        };

        // Discover the output dimension with a validation inference
        let probe = model.run_batch(&["validation test".to_string()])?;
        let dimension = probe.first().map(Vec::len).unwrap_or(0);
        if dimension == 0 {
            anyhow::bail!("Model produced an empty embedding during validation");
        }
        model.dimension = dimension;

        info!(
            "✅ ONNX embedding model loaded: {} ({} dimensions, max_seq_length: {}, token_type_ids: {}, normalized: {})",
            model.model_name,
            model.dimension,
            model.options.max_seq_length,
            model.uses_token_type_ids,
            model.options.normalize_output
        );

        Ok(model)
    }

    /// Generates embeddings for multiple texts
    ///
    /// Texts are processed in chunks of `batch_size`; each chunk is padded to
    /// its longest sequence and run as one inference.
    pub async fn embed_batch(&self, texts: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.options.batch_size) {
            debug!("Running inference on batch of {} texts", chunk.len());
            embeddings.extend(self.run_batch(chunk)?);
        }

        let normalize = normalize || self.options.normalize_output;
        for (i, emb) in embeddings.iter_mut().enumerate() {
            if emb.len() != self.dimension {
                anyhow::bail!(
                    "Unexpected embedding dimension at index {}: {} (expected {})",
                    i,
                    emb.len(),
                    self.dimension
                );
            }
            if normalize {
                l2_normalize(emb);
            }
        }

        Ok(embeddings)
    }

    /// Output dimension of this model
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Model name
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn tokenize(&self, texts: &[String]) -> Result<BatchInputs> {
        let encodings = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| anyhow!("Tokenization failed: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let max_len = encodings
            .iter()
            .map(|enc| enc.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let padding_needed = max_len - ids.len();

            input_ids.extend(ids.iter().map(|&id| id as i64));
            input_ids.extend(std::iter::repeat(self.pad_token_id).take(padding_needed));

            attention_mask.extend(mask.iter().map(|&m| m as i64));
            attention_mask.extend(std::iter::repeat(0i64).take(padding_needed));
        }

        Ok(BatchInputs {
            input_ids: Array2::from_shape_vec((texts.len(), max_len), input_ids)
                .context("Failed to create batch input_ids array")?,
            attention_mask: Array2::from_shape_vec((texts.len(), max_len), attention_mask)
                .context("Failed to create batch attention_mask array")?,
        })
    }

    /// Tokenizes and runs one inference; returns pooled, un-normalized vectors
    fn run_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let BatchInputs {
            input_ids,
            attention_mask,
        } = self.tokenize(texts)?;
        let mask_for_pooling = attention_mask.clone();
        let token_type_ids = Array2::<i64>::zeros(input_ids.raw_dim());

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;

        let outputs = if self.uses_token_type_ids {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids)?,
                "attention_mask" => Value::from_array(attention_mask)?,
                "token_type_ids" => Value::from_array(token_type_ids)?
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => Value::from_array(input_ids)?,
                "attention_mask" => Value::from_array(attention_mask)?
            ])?
        };

        // Different exports name their outputs differently; the first one is
        // the token (or sentence) embedding tensor.
        let output = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        match output.ndim() {
            // [batch, seq_len, hidden_dim]: pool here
            3 => {
                let output = output
                    .into_dimensionality::<Ix3>()
                    .context("Unexpected token embedding shape")?;
                Ok((0..texts.len())
                    .map(|idx| {
                        let mask = mask_for_pooling.row(idx).to_vec();
                        self.options.pooling.apply(output.index_axis(Axis(0), idx), &mask)
                    })
                    .collect())
            }
            // [batch, hidden_dim]: already pooled by the graph
            2 => {
                let output = output
                    .into_dimensionality::<Ix2>()
                    .context("Unexpected sentence embedding shape")?;
                Ok(output.outer_iter().map(|row| row.to_vec()).collect())
            }
            _ => anyhow::bail!(
                "Model outputs unexpected dimensions: {:?} (expected [batch, seq_len, hidden] or [batch, hidden])",
                output.shape()
            ),
        }
    }
}

/// Builds a session, trying CUDA first and falling back to CPU
fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    info!("🚀 Initializing ONNX embedding model from {}", model_path.display());

    let cuda_result = Session::builder()
        .context("Failed to create session builder")?
        .with_execution_providers([CUDAExecutionProvider::default().build()])
        .context("Failed to set CUDA execution provider")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(intra_threads)
        .context("Failed to set intra threads")?
        .commit_from_file(model_path);

    match cuda_result {
        Ok(session) => {
            info!("✅ CUDA execution provider initialized");
            Ok(session)
        }
        Err(e) => {
            warn!("⚠️  CUDA execution provider failed: {}", e);
            warn!("   Falling back to CPU execution provider");
            Session::builder()
                .context("Failed to create session builder")?
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .context("Failed to set CPU execution provider")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(intra_threads)
                .context("Failed to set intra threads")?
                .commit_from_file(model_path)
                .with_context(|| {
                    format!("Failed to load ONNX model from {}", model_path.display())
                })
        }
    }
}

#[async_trait]
impl EmbeddingModel for OnnxEmbeddingModel {
    async fn encode(&self, sentences: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(sentences, normalize).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
