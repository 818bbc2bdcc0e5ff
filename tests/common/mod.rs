// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Shared test helpers

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use embedding_worker::embeddings::{l2_normalize, EmbeddingModel};
use embedding_worker::{EmbeddingJobHandler, SharedModel};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const TEST_DIMENSION: usize = 64;

/// Deterministic stand-in for a sentence transformer
///
/// Vectors are derived from a hash of the text, so equal texts embed equally
/// and different texts (almost surely) differ.
#[derive(Debug, Default)]
pub struct HashEmbeddingModel {
    pub dimension: usize,
    pub encode_calls: AtomicUsize,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            encode_calls: AtomicUsize::new(0),
        }
    }

    pub fn raw_embedding(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut current_seed = hasher.finish();

        (0..self.dimension)
            .map(|i| {
                current_seed =
                    (current_seed.wrapping_mul(1664525).wrapping_add(1013904223)) ^ (i as u64);
                // Range [-2, 2] so raw norms are clearly not 1
                ((current_seed as f64 / u64::MAX as f64) * 4.0 - 2.0) as f32
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbeddingModel {
    async fn encode(&self, sentences: &[String], normalize: bool) -> Result<Vec<Vec<f32>>> {
        self.encode_calls.fetch_add(1, Ordering::SeqCst);
        Ok(sentences
            .iter()
            .map(|text| {
                let mut embedding = self.raw_embedding(text);
                if normalize {
                    l2_normalize(&mut embedding);
                }
                embedding
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-test-model"
    }
}

/// Shared handle whose loader counts invocations and yields a hash model
pub fn counting_shared_model(dimension: usize) -> (SharedModel, Arc<AtomicUsize>) {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let shared = SharedModel::with_loader(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Arc::new(HashEmbeddingModel::new(dimension)) as Arc<dyn EmbeddingModel>)
        }
    });
    (shared, loads)
}

/// Handler backed by a lazily loaded hash model
pub fn test_handler() -> (EmbeddingJobHandler, Arc<AtomicUsize>) {
    let (shared, loads) = counting_shared_model(TEST_DIMENSION);
    (EmbeddingJobHandler::new(shared), loads)
}

pub fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}
