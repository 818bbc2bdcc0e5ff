// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Embedding matrix returned by a job
//!
//! Serializes directly to nested JSON arrays:
//!
//! ```json
//! [[0.013, -0.027, ...], [0.051, 0.004, ...]]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One vector per input sentence, in input order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct EmbeddingMatrix(pub Vec<Vec<f32>>);

impl EmbeddingMatrix {
    /// Number of vectors
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length of the vectors, or `None` for an empty matrix
    pub fn dimension(&self) -> Option<usize> {
        self.0.first().map(Vec::len)
    }

    /// Whether every vector has the same length
    pub fn is_rectangular(&self) -> bool {
        match self.dimension() {
            Some(dim) => self.0.iter().all(|row| row.len() == dim),
            None => true,
        }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.0
    }

    pub fn into_rows(self) -> Vec<Vec<f32>> {
        self.0
    }

    /// JSON text encoding, e.g. `[[0.1,0.2],[0.3,0.4]]`
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decoded nested-array form delivered as the job output
    pub fn to_json_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

impl From<Vec<Vec<f32>>> for EmbeddingMatrix {
    fn from(rows: Vec<Vec<f32>>) -> Self {
        Self(rows)
    }
}
