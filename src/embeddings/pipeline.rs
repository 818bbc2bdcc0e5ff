// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Sentence-transformer pipeline settings
//!
//! A sentence-transformers repository describes what happens after the
//! encoder in three small JSON files:
//! - `modules.json`: module list (Transformer, Pooling, optional Normalize)
//! - `<pooling dir>/config.json`: which pooling strategies to apply
//! - `sentence_bert_config.json`: tokenizer truncation length
//!
//! All three are optional; a plain encoder repository gets mean pooling and
//! no normalization.

use anyhow::{Context, Result};
use ndarray::ArrayView2;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

pub const MODULES_FILE: &str = "modules.json";
pub const SENTENCE_CONFIG_FILE: &str = "sentence_bert_config.json";
pub const DEFAULT_POOLING_DIR: &str = "1_Pooling";
const POOLING_CONFIG_FILE: &str = "config.json";

/// Pooling strategies from a Pooling module's `config.json`
///
/// When several are enabled their outputs are concatenated in the order
/// cls, max, mean, mean_sqrt_len, last_token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Pooling {
    #[serde(rename = "pooling_mode_cls_token", default)]
    pub cls: bool,
    #[serde(rename = "pooling_mode_max_tokens", default)]
    pub max: bool,
    #[serde(rename = "pooling_mode_mean_tokens", default)]
    pub mean: bool,
    #[serde(rename = "pooling_mode_mean_sqrt_len_tokens", default)]
    pub mean_sqrt_len: bool,
    #[serde(rename = "pooling_mode_lasttoken", default)]
    pub last_token: bool,
    #[serde(rename = "pooling_mode_weightedmean_tokens", default)]
    pub weighted_mean: bool,
}

impl Default for Pooling {
    fn default() -> Self {
        Self::mean()
    }
}

impl Pooling {
    pub fn mean() -> Self {
        Self {
            cls: false,
            max: false,
            mean: true,
            mean_sqrt_len: false,
            last_token: false,
            weighted_mean: false,
        }
    }

    pub fn cls() -> Self {
        Self {
            cls: true,
            mean: false,
            ..Self::mean()
        }
    }

    pub fn max() -> Self {
        Self {
            max: true,
            mean: false,
            ..Self::mean()
        }
    }

    /// Rejects configurations this runtime cannot reproduce
    pub fn validate(&self) -> Result<()> {
        if self.weighted_mean {
            anyhow::bail!("Weighted-mean pooling is not supported");
        }
        if !(self.cls || self.max || self.mean || self.mean_sqrt_len || self.last_token) {
            anyhow::bail!("Pooling config enables no pooling mode");
        }
        Ok(())
    }

    /// Pools one sequence of token embeddings.
    ///
    /// `tokens` is `[seq_len, hidden_dim]`; `mask` is the attention mask (1 for
    /// real tokens, 0 for padding). Padding is always on the right.
    pub fn apply(&self, tokens: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
        let hidden_dim = tokens.shape()[1];
        let seq_len = tokens.shape()[0].min(mask.len());
        let real_tokens = mask[..seq_len].iter().filter(|&&m| m != 0).count();

        let mut pooled = Vec::with_capacity(hidden_dim);
        if self.cls {
            pooled.extend(tokens.row(0).iter().copied());
        }
        if self.max {
            pooled.extend(max_pool(tokens, mask));
        }
        if self.mean {
            pooled.extend(super::mean_pool(tokens, mask));
        }
        if self.mean_sqrt_len {
            let scale = (real_tokens as f32).sqrt();
            pooled.extend(super::mean_pool(tokens, mask).into_iter().map(|v| v * scale));
        }
        if self.last_token {
            let last = real_tokens.saturating_sub(1);
            pooled.extend(tokens.row(last).iter().copied());
        }
        pooled
    }
}

/// Per-dimension maximum over real tokens. All-padding input yields zeros.
pub fn max_pool(tokens: ArrayView2<'_, f32>, mask: &[i64]) -> Vec<f32> {
    let hidden_dim = tokens.shape()[1];
    let mut pooled = vec![f32::NEG_INFINITY; hidden_dim];
    let mut seen = false;

    for (row, &m) in tokens.outer_iter().zip(mask) {
        if m == 0 {
            continue;
        }
        seen = true;
        for (value, &token) in pooled.iter_mut().zip(row.iter()) {
            *value = value.max(token);
        }
    }

    if !seen {
        return vec![0.0; hidden_dim];
    }
    pooled
}

#[derive(Debug, Clone, Deserialize)]
struct ModuleEntry {
    #[serde(default)]
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SentenceConfig {
    max_seq_length: Option<usize>,
}

/// Module list from `modules.json`
#[derive(Debug, Clone, Default)]
pub struct ModuleList {
    modules: Vec<ModuleEntry>,
}

impl ModuleList {
    pub fn from_file(path: &Path) -> Result<Self> {
        let modules: Vec<ModuleEntry> = read_json(path)?;
        Ok(Self { modules })
    }

    /// Directory holding the Pooling module's `config.json`
    pub fn pooling_dir(&self) -> &str {
        self.modules
            .iter()
            .find(|m| m.kind.ends_with("Pooling") && !m.path.is_empty())
            .map(|m| m.path.as_str())
            .unwrap_or(DEFAULT_POOLING_DIR)
    }

    /// Whether the pipeline L2-normalizes its output
    pub fn normalizes(&self) -> bool {
        self.modules.iter().any(|m| m.kind.ends_with("Normalize"))
    }

    /// Modules beyond encoder, pooling and normalization (e.g. Dense)
    fn unsupported(&self) -> impl Iterator<Item = &str> {
        self.modules
            .iter()
            .map(|m| m.kind.as_str())
            .filter(|kind| {
                !["Transformer", "Pooling", "Normalize"]
                    .iter()
                    .any(|known| kind.ends_with(known))
            })
    }
}

/// Relative path of the pooling config inside a repository
pub fn pooling_config_path(pooling_dir: &str) -> String {
    format!("{}/{}", pooling_dir.trim_end_matches('/'), POOLING_CONFIG_FILE)
}

/// Pipeline files found for a model; each may be absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineFiles {
    pub modules: Option<std::path::PathBuf>,
    pub pooling_config: Option<std::path::PathBuf>,
    pub sentence_config: Option<std::path::PathBuf>,
}

/// Post-encoder behaviour of a sentence-transformers model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelPipeline {
    pub pooling: Pooling,
    /// Truncation length the model was trained with
    pub max_seq_length: Option<usize>,
    /// The pipeline ends in a Normalize module
    pub normalize: bool,
}

impl ModelPipeline {
    pub fn from_files(files: &PipelineFiles) -> Result<Self> {
        let modules = match &files.modules {
            Some(path) => ModuleList::from_file(path)?,
            None => ModuleList::default(),
        };
        for kind in modules.unsupported() {
            warn!("Ignoring unsupported sentence-transformers module {}", kind);
        }

        let pooling = match &files.pooling_config {
            Some(path) => read_json::<Pooling>(path)?,
            None => Pooling::default(),
        };
        pooling.validate()?;

        let max_seq_length = match &files.sentence_config {
            Some(path) => read_json::<SentenceConfig>(path)?.max_seq_length,
            None => None,
        };

        Ok(Self {
            pooling,
            max_seq_length,
            normalize: modules.normalizes(),
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
