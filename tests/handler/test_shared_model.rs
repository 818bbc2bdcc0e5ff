// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Process-wide model handle tests
//!
//! The model must be loaded at most once, even when the first jobs arrive
//! concurrently, and a failed load must not poison later jobs.

use crate::common::{counting_shared_model, HashEmbeddingModel, TEST_DIMENSION};
use anyhow::anyhow;
use embedding_worker::embeddings::EmbeddingModel;
use embedding_worker::{HandlerError, SharedModel};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_concurrent_first_use_loads_once() {
    let (shared, loads) = counting_shared_model(TEST_DIMENSION);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let shared = shared.clone();
            tokio::spawn(async move { shared.get().await.map(|m| m.dimension()) })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), TEST_DIMENSION);
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(shared.load_attempts(), 1);
    assert!(shared.is_loaded());
}

#[tokio::test]
async fn test_clones_share_the_same_model() {
    let (shared, _) = counting_shared_model(TEST_DIMENSION);
    let clone = shared.clone();

    let a = shared.get().await.unwrap();
    let b = clone.get().await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn test_preloaded_never_invokes_loader() {
    let shared = SharedModel::preloaded(Arc::new(HashEmbeddingModel::new(16)));

    assert!(shared.is_loaded());
    let model = shared.get().await.unwrap();
    assert_eq!(model.dimension(), 16);
    assert_eq!(model.model_name(), "hash-test-model");
    assert_eq!(shared.load_attempts(), 0);
}

#[tokio::test]
async fn test_load_recovers_after_failure() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let shared = SharedModel::with_loader(move || {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(anyhow!("cache directory not writable"))
            } else {
                Ok(Arc::new(HashEmbeddingModel::new(TEST_DIMENSION)) as Arc<dyn EmbeddingModel>)
            }
        }
    });

    let err = shared.get().await.err().expect("first load should fail");
    assert!(matches!(err, HandlerError::ModelLoad(ref msg) if msg.contains("not writable")));

    let model = shared.get().await.unwrap();
    assert_eq!(model.dimension(), TEST_DIMENSION);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
