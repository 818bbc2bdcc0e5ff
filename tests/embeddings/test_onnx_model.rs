// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! ONNX model tests against the real all-mpnet-base-v2 weights
//!
//! These download the model into a temporary cache on first run, so they are
//! ignored by default. Run with `cargo test -- --ignored`.

use embedding_worker::config::ModelConfig;
use embedding_worker::embeddings::{l2_norm, load_model, EmbeddingModel, OnnxEmbeddingModel};
use embedding_worker::{EmbeddingJobHandler, SharedModel};
use serde_json::json;
use std::sync::Arc;

const MPNET_DIMENSION: usize = 768;

fn test_config() -> ModelConfig {
    ModelConfig {
        models_cache: std::env::temp_dir().join("embedding-worker-test-cache"),
        ..Default::default()
    }
}

async fn load_default_model() -> OnnxEmbeddingModel {
    load_model(&test_config())
        .await
        .expect("Failed to load embedding model")
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot / (l2_norm(a) * l2_norm(b))
}

/// The default model discovers its 768-dimensional output at load time
#[tokio::test]
#[ignore]
async fn test_default_model_dimension() {
    let model = load_default_model().await;

    assert_eq!(model.dimension(), MPNET_DIMENSION);
    assert_eq!(model.model_name(), "sentence-transformers/all-mpnet-base-v2");
}

#[tokio::test]
#[ignore]
async fn test_hello_world_scenario() {
    let model = load_default_model().await;
    let handler = EmbeddingJobHandler::new(SharedModel::preloaded(Arc::new(model)));

    let matrix = handler
        .handle_input(&json!({"sentences": ["hello world"]}))
        .await
        .unwrap();

    assert_eq!(matrix.len(), 1);
    assert_eq!(matrix.rows()[0].len(), MPNET_DIMENSION);
    assert!(matrix.rows()[0].iter().all(|v| v.is_finite()));
}

#[tokio::test]
#[ignore]
async fn test_normalized_batch_scenario() {
    let model = load_default_model().await;

    let embeddings = model
        .encode(&["a".to_string(), "b".to_string()], true)
        .await
        .unwrap();

    assert_eq!(embeddings.len(), 2);
    for embedding in &embeddings {
        assert!((l2_norm(embedding) - 1.0).abs() < 1e-4);
    }
}

/// Batching and padding must not change a sentence's embedding
#[tokio::test]
#[ignore]
async fn test_batching_matches_single() {
    let model = load_default_model().await;
    let texts: Vec<String> = (0..40)
        .map(|i| format!("sentence number {} with {} extra words", i, "very ".repeat(i % 7)))
        .collect();

    let batched = model.embed_batch(&texts, false).await.unwrap();
    assert_eq!(batched.len(), texts.len());

    for index in [0, 17, 39] {
        let single = model
            .embed_batch(&texts[index..=index], false)
            .await
            .unwrap();
        let similarity = cosine_similarity(&batched[index], &single[0]);
        assert!(similarity > 0.9999, "text {} similarity {}", index, similarity);
    }
}

#[tokio::test]
#[ignore]
async fn test_semantic_similarity() {
    let model = load_default_model().await;

    let embeddings = model
        .embed_batch(
            &[
                "A cat sits on the mat".to_string(),
                "A kitten is resting on a rug".to_string(),
                "Quarterly revenue grew by ten percent".to_string(),
            ],
            true,
        )
        .await
        .unwrap();

    let related = cosine_similarity(&embeddings[0], &embeddings[1]);
    let unrelated = cosine_similarity(&embeddings[0], &embeddings[2]);
    assert!(
        related > unrelated,
        "related ({}) should exceed unrelated ({})",
        related,
        unrelated
    );
}

/// Inputs longer than the max sequence length are truncated, not rejected
#[tokio::test]
#[ignore]
async fn test_long_input_truncated() {
    let model = load_default_model().await;
    let long_text = "token ".repeat(5000);

    let embeddings = model.embed_batch(&[long_text], true).await.unwrap();

    assert_eq!(embeddings[0].len(), MPNET_DIMENSION);
}

/// all-mpnet-base-v2 ends in a Normalize module, so output is unit length
/// even when the job does not ask for normalization
#[tokio::test]
#[ignore]
async fn test_normalize_module_applied_without_flag() {
    let model = load_default_model().await;

    let embeddings = model
        .embed_batch(&["hello world".to_string()], false)
        .await
        .unwrap();

    assert!((l2_norm(&embeddings[0]) - 1.0).abs() < 1e-4);
}
