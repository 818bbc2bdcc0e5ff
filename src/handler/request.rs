// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Typed job input
//!
//! ```json
//! {
//!   "sentences": ["Hello world", "Another text"],
//!   "normalize_embeddings": true
//! }
//! ```

use crate::errors::HandlerError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Input of one embedding job
///
/// # Fields
/// - `sentences`: ordered texts to embed (required)
/// - `normalize_embeddings`: scale vectors to unit length (default `false`)
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmbedInput {
    pub sentences: Vec<String>,

    #[serde(default, deserialize_with = "null_as_false")]
    pub normalize_embeddings: bool,
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl EmbedInput {
    pub fn new(sentences: Vec<String>) -> Self {
        Self {
            sentences,
            normalize_embeddings: false,
        }
    }

    pub fn normalized(mut self, normalize: bool) -> Self {
        self.normalize_embeddings = normalize;
        self
    }

    /// Parses the `input` mapping of a job
    ///
    /// # Errors
    /// - [`HandlerError::InvalidInput`] if `input` is not an object or a field
    ///   has the wrong type
    /// - [`HandlerError::MissingField`] if `sentences` is absent
    pub fn from_job_input(input: &Value) -> Result<Self, HandlerError> {
        let object = input.as_object().ok_or_else(|| {
            HandlerError::InvalidInput(format!(
                "job input must be a JSON object, got {}",
                json_type_name(input)
            ))
        })?;

        if !object.contains_key("sentences") {
            return Err(HandlerError::MissingField("sentences".to_string()));
        }

        Self::deserialize(input).map_err(|e| HandlerError::InvalidInput(e.to_string()))
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
