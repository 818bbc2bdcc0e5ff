// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Sentence embedding models
//!
//! [`EmbeddingModel`] is the seam between the job handler and inference.
//! The production implementation is [`OnnxEmbeddingModel`]; [`loader`] fetches
//! its weights and keeps one process-wide instance.

pub mod loader;
pub mod onnx_model;
pub mod pipeline;

pub use loader::{load_model, SharedModel};
pub use onnx_model::OnnxEmbeddingModel;
pub use pipeline::{ModelPipeline, Pooling};

use anyhow::Result;
use async_trait::async_trait;
use ndarray::ArrayView2;

/// A model mapping sentences to fixed-dimension vectors
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embeds `sentences`, one vector per sentence in input order.
    ///
    /// With `normalize` set, every vector is scaled to unit L2 norm.
    async fn encode(&self, sentences: &[String], normalize: bool) -> Result<Vec<Vec<f32>>>;

    /// Length of every vector this model produces
    fn dimension(&self) -> usize;

    /// Repository name the model was loaded from
    fn model_name(&self) -> &str;
}

/// Attention-mask-weighted mean over the token axis.
///
/// `tokens` is `[seq_len, hidden_dim]`; `mask` holds one entry per token
/// (1 for real tokens, 0 for padding).
pub fn mean_pool(tokens: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let seq_len = tokens.shape()[0].min(mask.len());
    let hidden_dim = tokens.shape()[1];

    let mut pooled = vec![0.0f32; hidden_dim];
    let mut sum_mask = 0.0f32;

    for i in 0..seq_len {
        let mask_value = mask[i] as f32;
        if mask_value == 0.0 {
            continue;
        }
        sum_mask += mask_value;
        for (j, value) in pooled.iter_mut().enumerate() {
            *value += tokens[[i, j]] * mask_value;
        }
    }

    let denom = sum_mask.max(1e-9);
    for value in &mut pooled {
        *value /= denom;
    }

    pooled
}

/// Scales `vector` to unit length in place. A zero vector is left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Euclidean norm of `vector`
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}
